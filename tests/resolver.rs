use std::sync::{Arc, Mutex};

use biodata_vfs::config::Config;
use biodata_vfs::error::Result;
use biodata_vfs::{Manager, Protocol, ResolveFlags, Resolver, VfsError, VfsPath};

#[derive(Default)]
struct MockResolver {
    calls: Mutex<Vec<String>>,
    local_hit: Option<String>,
    remote_hit: Option<String>,
    cache_hit: Option<String>,
}

impl MockResolver {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Resolver for MockResolver {
    fn local(&self, accession: &VfsPath) -> Result<Arc<VfsPath>> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("local:{}", accession.path_str()));
        match &self.local_hit {
            Some(path) => VfsPath::parse(path),
            None => Err(VfsError::PathNotFound(accession.path_str().to_string())),
        }
    }

    fn remote(&self, _protocol: Protocol, accession: &VfsPath) -> Result<Arc<VfsPath>> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("remote:{}", accession.path_str()));
        match &self.remote_hit {
            Some(path) => VfsPath::parse(path),
            None => Err(VfsError::PathNotFound(accession.path_str().to_string())),
        }
    }

    fn cache(&self, remote: &VfsPath, _size: u64) -> Result<Arc<VfsPath>> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("cache:{}", remote.path_str()));
        match &self.cache_hit {
            Some(path) => VfsPath::parse(path),
            None => Err(VfsError::PathNotFound(remote.path_str().to_string())),
        }
    }
}

fn manager_with(resolver: Arc<MockResolver>) -> Arc<Manager> {
    let manager = Manager::new(Config::default()).unwrap();
    manager.set_resolver(Some(resolver));
    manager
}

#[test]
fn bare_accession_consults_the_local_oracle() {
    let resolver = Arc::new(MockResolver {
        local_hit: Some("/repo/sra/SRR001656.sra".to_string()),
        ..Default::default()
    });
    let manager = manager_with(resolver.clone());

    let path = manager.make_path("SRR001656").unwrap();
    let resolved = manager.resolve_path(ResolveFlags::NONE, &path).unwrap();

    assert_eq!(resolver.calls(), vec!["local:SRR001656"]);
    assert_eq!(resolved.path_str(), "/repo/sra/SRR001656.sra");
}

#[test]
fn local_not_found_falls_through_to_remote() {
    let resolver = Arc::new(MockResolver {
        remote_hit: Some("https://sra.example.org/SRR001656".to_string()),
        ..Default::default()
    });
    let manager = manager_with(resolver.clone());

    let path = manager.make_path("ncbi-acc:SRR001656").unwrap();
    let resolved = manager.resolve_path(ResolveFlags::NONE, &path).unwrap();

    assert_eq!(
        resolver.calls(),
        vec!["local:SRR001656", "remote:SRR001656"]
    );
    assert_eq!(resolved.host(), "sra.example.org");
}

#[test]
fn remote_fallback_can_be_disabled() {
    let resolver = Arc::new(MockResolver::default());
    let manager = manager_with(resolver.clone());

    let path = manager.make_path("ncbi-acc:SRR001656").unwrap();
    let flags = ResolveFlags {
        no_acc_remote: true,
        ..ResolveFlags::NONE
    };
    let err = manager.resolve_path(flags, &path).unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(resolver.calls(), vec!["local:SRR001656"]);
}

#[test]
fn fully_disabled_accession_resolution() {
    let resolver = Arc::new(MockResolver::default());
    let manager = manager_with(resolver.clone());

    let path = manager.make_path("ncbi-acc:SRR001656").unwrap();
    let flags = ResolveFlags {
        no_acc_local: true,
        no_acc_remote: true,
        kdb_acc: false,
    };
    assert!(matches!(
        manager.resolve_path(flags, &path),
        Err(VfsError::SraNotAvailable)
    ));
    assert!(resolver.calls().is_empty());
}

#[test]
fn kdb_acc_tries_names_without_slashes() {
    let resolver = Arc::new(MockResolver::default());
    let manager = manager_with(resolver.clone());
    let flags = ResolveFlags {
        kdb_acc: true,
        ..ResolveFlags::NONE
    };

    // plain name: the oracle is consulted, misses, and the name resolves as
    // a filesystem path
    let path = manager.make_path("somefile").unwrap();
    let resolved = manager.resolve_path(flags, &path).unwrap();
    assert_eq!(
        resolver.calls(),
        vec!["local:somefile", "remote:somefile"]
    );
    assert!(resolved.path_str().ends_with("/somefile"));
    assert!(resolved.path_str().starts_with('/'));

    // a slash disqualifies the name as an accession
    let path = manager.make_path("some/file").unwrap();
    let resolved = manager.resolve_path(flags, &path).unwrap();
    assert_eq!(resolver.calls().len(), 2);
    assert!(resolved.path_str().ends_with("/some/file"));
}

#[test]
fn urls_pass_through_unchanged() {
    let manager = Manager::new(Config::default()).unwrap();
    let path = manager.make_path("https://example.org/data.sra").unwrap();
    let resolved = manager.resolve_path(ResolveFlags::NONE, &path).unwrap();
    assert!(Arc::ptr_eq(&path, &resolved));
}

#[test]
fn relative_paths_resolve_against_cwd() {
    let manager = Manager::new(Config::default()).unwrap();

    let path = manager.make_path("data/run.sra").unwrap();
    let resolved = manager.resolve_path(ResolveFlags::NONE, &path).unwrap();
    let expected = format!("{}/data/run.sra", manager.cwd());
    assert_eq!(resolved.path_str(), expected);

    let vfs = manager.make_path("ncbi-vfs:data/run.sra?enc").unwrap();
    let resolved = manager.resolve_path(ResolveFlags::NONE, &vfs).unwrap();
    assert_eq!(resolved.uri_type(), biodata_vfs::SchemeType::NcbiVfs);
    assert_eq!(resolved.path_str(), expected);
    assert_eq!(resolved.query(), "?enc");

    let absolute = manager.make_path("/data/run.sra").unwrap();
    let resolved = manager.resolve_path(ResolveFlags::NONE, &absolute).unwrap();
    assert!(Arc::ptr_eq(&absolute, &resolved));
}

#[test]
fn accession_without_resolver_is_unsupported() {
    let manager = Manager::new(Config::default()).unwrap();
    let path = manager.make_path("ncbi-acc:SRR001656").unwrap();
    assert!(matches!(
        manager.resolve_path(ResolveFlags::NONE, &path),
        Err(VfsError::SraUnsupported)
    ));
}

#[test]
fn relative_resolution_requires_an_existing_base() {
    let manager = Manager::new(Config::default()).unwrap();
    let base = manager.make_path("/definitely/not/a/dir").unwrap();
    let path = manager.make_path("x").unwrap();
    assert!(matches!(
        manager.resolve_path_relative(ResolveFlags::NONE, &base, &path),
        Err(VfsError::DirectoryNotFound(_))
    ));
}

#[test]
fn unsupported_and_legrefseq_schemes_do_not_resolve() {
    let manager = Manager::new(Config::default()).unwrap();
    for text in ["gopher://example.org/x", "x-ncbi-legrefseq:/a#b"] {
        let path = manager.make_path(text).unwrap();
        assert!(matches!(
            manager.resolve_path(ResolveFlags::NONE, &path),
            Err(VfsError::PathUnsupported(_))
        ));
    }
}
