use std::fs;
use std::sync::Arc;

use camino::Utf8PathBuf;

use biodata_vfs::config::Config;
use biodata_vfs::keystore::ENV_PWFILE;
use biodata_vfs::manager::Manager;
use biodata_vfs::VfsError;

fn utf8(path: &std::path::Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
}

fn manager() -> Arc<Manager> {
    Manager::new(Config::default()).unwrap()
}

// The environment is process-global, so every ordering check lives in one
// test body.
#[test]
fn key_sources_resolve_in_priority_order() {
    let dir = tempfile::tempdir().unwrap();
    let root = utf8(dir.path());

    let env_pw = root.join("env-pw");
    let mgr_pw = root.join("mgr-pw");
    let hint_pw = root.join("hint-pw");
    fs::write(&env_pw, b"from-env\n").unwrap();
    fs::write(&mgr_pw, b"from-manager\n").unwrap();
    fs::write(&hint_pw, b"from-hint\ntrailing lines ignored\n").unwrap();

    let mgr = manager();

    // nothing configured at all
    std::env::remove_var(ENV_PWFILE);
    let path = mgr.make_path("/data/x?enc").unwrap();
    assert!(matches!(
        mgr.acquire_key(&path),
        Err(VfsError::EncryptionKeyNotFound)
    ));

    // manager override
    mgr.set_pw_env(Some(mgr_pw.as_str()));
    assert_eq!(mgr.acquire_key(&path).unwrap(), b"from-manager".to_vec());

    // the environment variable beats the manager override
    std::env::set_var(ENV_PWFILE, env_pw.as_str());
    assert_eq!(mgr.acquire_key(&path).unwrap(), b"from-env".to_vec());

    // a per-path pwfile hint beats both, and is forgotten afterwards
    let hinted = mgr
        .make_path(&format!("/data/x?enc&pwfile={hint_pw}"))
        .unwrap();
    assert_eq!(mgr.acquire_key(&hinted).unwrap(), b"from-hint".to_vec());
    assert_eq!(mgr.acquire_key(&path).unwrap(), b"from-env".to_vec());

    // a hint pointing nowhere is an error, not a fallback
    let missing = mgr
        .make_path(&format!("/data/x?enc&pwfile={}", root.join("nope")))
        .unwrap();
    assert!(matches!(
        mgr.acquire_key(&missing),
        Err(VfsError::EncryptionKeyNotFound)
    ));

    std::env::remove_var(ENV_PWFILE);

    // get_krypto_password goes through the same chain
    mgr.set_pw_env(Some(mgr_pw.as_str()));
    assert_eq!(
        mgr.get_krypto_password().unwrap(),
        b"from-manager".to_vec()
    );
}
