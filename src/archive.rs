use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::sync::Arc;

use camino::Utf8PathBuf;
use tar::Archive;
use tracing::{error, info, warn};

use crate::error::{Result, VfsError};
use crate::vfile::{read_all_at, LocalFile, SliceFile, VFile, VFileReader};

pub const SRA_MAGIC: &[u8; 8] = b"NCBI.sra";

pub fn is_sra(prefix: &[u8]) -> bool {
    prefix.len() >= SRA_MAGIC.len() && &prefix[..SRA_MAGIC.len()] == SRA_MAGIC
}

/// Read-only directory-shaped view: a mounted archive, a local directory, or
/// a synthetic mount point.
pub trait DirView: Send + Sync {
    fn open_file(&self, path: &str) -> Result<Arc<dyn VFile>>;

    fn open_dir(&self, path: &str) -> Result<Arc<dyn DirView>>;

    fn list(&self, path: &str) -> Result<Vec<String>>;
}

impl std::fmt::Debug for dyn DirView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DirView")
    }
}

/// The SRA/KAR archive reader is an external collaborator; install one on
/// the manager to mount `NCBI.sra` archives.
pub trait SraReader: Send + Sync {
    fn open(&self, file: Arc<dyn VFile>, name: &str) -> Result<Arc<dyn DirView>>;
}

/// Plain directory on the local filesystem.
pub struct LocalDirView {
    root: Utf8PathBuf,
}

impl LocalDirView {
    pub fn new(root: Utf8PathBuf) -> Result<Self> {
        if !root.as_std_path().is_dir() {
            return Err(VfsError::DirectoryNotFound(root));
        }
        Ok(LocalDirView { root })
    }

    fn join(&self, path: &str) -> Utf8PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl DirView for LocalDirView {
    fn open_file(&self, path: &str) -> Result<Arc<dyn VFile>> {
        let full = self.join(path);
        if !full.as_std_path().is_file() {
            return Err(VfsError::FileNotFound(full));
        }
        Ok(Arc::new(LocalFile::open(&full)?))
    }

    fn open_dir(&self, path: &str) -> Result<Arc<dyn DirView>> {
        Ok(Arc::new(LocalDirView::new(self.join(path))?))
    }

    fn list(&self, path: &str) -> Result<Vec<String>> {
        let full = self.join(path);
        let mut names = Vec::new();
        for entry in fs::read_dir(full.as_std_path())? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}

struct TarIndex {
    /// entry path -> (data offset, length) within the archive stream
    entries: BTreeMap<String, (u64, u64)>,
    dirs: BTreeSet<String>,
}

/// TAR archive mounted as a directory; entries are windows into the
/// underlying stream, nothing is unpacked.
pub struct TarDirView {
    file: Arc<dyn VFile>,
    index: Arc<TarIndex>,
    prefix: String,
}

impl TarDirView {
    pub fn mount(file: Arc<dyn VFile>) -> Result<Self> {
        let mut entries = BTreeMap::new();
        let mut dirs = BTreeSet::new();

        let mut archive = Archive::new(VFileReader::new(file.clone()));
        for entry in archive.entries()? {
            let entry = entry?;
            let name = entry.path()?.to_string_lossy().into_owned();
            let name = name.trim_start_matches("./").trim_end_matches('/').to_string();
            if name.is_empty() {
                continue;
            }
            if entry.header().entry_type().is_dir() {
                dirs.insert(name);
                continue;
            }
            record_parents(&mut dirs, &name);
            entries.insert(name, (entry.raw_file_position(), entry.size()));
        }

        Ok(TarDirView {
            file,
            index: Arc::new(TarIndex { entries, dirs }),
            prefix: String::new(),
        })
    }

    fn qualify(&self, path: &str) -> String {
        let path = path.trim_matches('/');
        if self.prefix.is_empty() {
            path.to_string()
        } else if path.is_empty() {
            self.prefix.clone()
        } else {
            format!("{}/{}", self.prefix, path)
        }
    }
}

fn record_parents(dirs: &mut BTreeSet<String>, name: &str) {
    let mut at = 0usize;
    while let Some(pos) = name[at..].find('/') {
        dirs.insert(name[..at + pos].to_string());
        at += pos + 1;
    }
}

impl DirView for TarDirView {
    fn open_file(&self, path: &str) -> Result<Arc<dyn VFile>> {
        let key = self.qualify(path);
        match self.index.entries.get(&key) {
            Some((offset, len)) => Ok(Arc::new(SliceFile::new(self.file.clone(), *offset, *len))),
            None => Err(VfsError::FileNotFound(Utf8PathBuf::from(key))),
        }
    }

    fn open_dir(&self, path: &str) -> Result<Arc<dyn DirView>> {
        let key = self.qualify(path);
        if key.is_empty() || self.index.dirs.contains(&key) {
            return Ok(Arc::new(TarDirView {
                file: self.file.clone(),
                index: self.index.clone(),
                prefix: key,
            }));
        }
        Err(VfsError::DirectoryNotFound(Utf8PathBuf::from(key)))
    }

    fn list(&self, path: &str) -> Result<Vec<String>> {
        let key = self.qualify(path);
        if !key.is_empty() && !self.index.dirs.contains(&key) {
            return Err(VfsError::DirectoryNotFound(Utf8PathBuf::from(key)));
        }
        let prefix = if key.is_empty() {
            String::new()
        } else {
            format!("{key}/")
        };
        let mut names = BTreeSet::new();
        for name in self.index.entries.keys().chain(self.index.dirs.iter()) {
            if let Some(rest) = name.strip_prefix(&prefix) {
                if rest.is_empty() {
                    continue;
                }
                let child = rest.split('/').next().unwrap_or(rest);
                names.insert(child.to_string());
            }
        }
        Ok(names.into_iter().collect())
    }
}

/// Single-entry directory wrapping one stream, so archive readers see a
/// conventional (directory, name) pair for remote files.
pub struct MountPointDir {
    name: String,
    file: Arc<dyn VFile>,
}

impl MountPointDir {
    pub fn new(name: &str, file: Arc<dyn VFile>) -> Self {
        MountPointDir {
            name: name.trim_matches('/').to_string(),
            file,
        }
    }

    pub fn entry_name(&self) -> &str {
        &self.name
    }
}

impl DirView for MountPointDir {
    fn open_file(&self, path: &str) -> Result<Arc<dyn VFile>> {
        if path.trim_matches('/') == self.name {
            Ok(self.file.clone())
        } else {
            Err(VfsError::FileNotFound(Utf8PathBuf::from(path)))
        }
    }

    fn open_dir(&self, path: &str) -> Result<Arc<dyn DirView>> {
        Err(VfsError::DirectoryNotFound(Utf8PathBuf::from(path)))
    }

    fn list(&self, _path: &str) -> Result<Vec<String>> {
        Ok(vec![self.name.clone()])
    }
}

/// Turn an opened (and possibly decrypted) stream into a directory view by
/// archive magic: SRA/KAR goes to the installed reader, everything else is
/// tried as TAR.
pub fn transform_file_to_directory(
    file: Arc<dyn VFile>,
    path_str: &str,
    was_encrypted: bool,
    sra_reader: Option<&Arc<dyn SraReader>>,
) -> Result<Arc<dyn DirView>> {
    if !file.random_access() {
        error!("cannot use {path_str} as a database archive without random access");
        return Err(VfsError::NoRandomAccess);
    }

    let mut prefix = [0u8; 4096];
    let n = match read_all_at(file.as_ref(), 0, &mut prefix) {
        Ok(n) => n,
        Err(err) => {
            error!("error reading the head of {path_str} to use as a database object: {err}");
            return Err(err);
        }
    };

    if is_sra(&prefix[..n]) {
        return match sra_reader {
            Some(reader) => reader.open(file, path_str),
            None => Err(VfsError::SraUnsupported),
        };
    }

    match TarDirView::mount(file) {
        Ok(view) => Ok(Arc::new(view)),
        Err(err) => {
            if was_encrypted {
                warn!(
                    "could not use {path_str} as an archive: it was encrypted, so the password \
                     was possibly wrong, or it is not an SRA or TAR file ({err})"
                );
            } else {
                info!("could not use {path_str} as an archive: not identified as SRA or TAR ({err})");
            }
            Err(VfsError::NotArchive {
                path: path_str.to_string(),
                was_encrypted,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfile::MemFile;

    fn sample_tar() -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut add = |path: &str, data: &[u8]| {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, data).unwrap();
        };
        add("reads/001.fastq", b"@r1\nACGT\n+\n!!!!\n");
        add("reads/002.fastq", b"@r2\nTTTT\n+\n!!!!\n");
        add("meta.json", b"{}");
        builder.into_inner().unwrap()
    }

    #[test]
    fn tar_mounts_as_directory() {
        let data = sample_tar();
        let file: Arc<dyn VFile> = Arc::new(MemFile::new(data));
        let view = TarDirView::mount(file).unwrap();

        assert_eq!(view.list("").unwrap(), vec!["meta.json", "reads"]);
        assert_eq!(view.list("reads").unwrap(), vec!["001.fastq", "002.fastq"]);

        let entry = view.open_file("reads/001.fastq").unwrap();
        let mut buf = [0u8; 64];
        let n = read_all_at(entry.as_ref(), 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"@r1\nACGT\n+\n!!!!\n");
    }

    #[test]
    fn tar_subdirectory_view() {
        let data = sample_tar();
        let view = TarDirView::mount(Arc::new(MemFile::new(data))).unwrap();
        let reads = view.open_dir("reads").unwrap();
        assert_eq!(reads.list("").unwrap(), vec!["001.fastq", "002.fastq"]);
        assert!(reads.open_file("001.fastq").is_ok());
        assert!(view.open_dir("missing").is_err());
    }

    #[test]
    fn garbage_is_not_an_archive() {
        let file: Arc<dyn VFile> = Arc::new(MemFile::new(b"definitely not a tarball".to_vec()));
        let err = transform_file_to_directory(file, "x", false, None).unwrap_err();
        assert!(matches!(
            err,
            VfsError::NotArchive {
                was_encrypted: false,
                ..
            }
        ));
    }

    #[test]
    fn sra_magic_routes_to_the_reader_seam() {
        let mut data = SRA_MAGIC.to_vec();
        data.extend_from_slice(&[0u8; 64]);
        let file: Arc<dyn VFile> = Arc::new(MemFile::new(data));
        let err = transform_file_to_directory(file, "x.sra", false, None).unwrap_err();
        assert!(matches!(err, VfsError::SraUnsupported));
    }

    #[test]
    fn mount_point_has_one_entry() {
        let file: Arc<dyn VFile> = Arc::new(MemFile::new(b"payload".to_vec()));
        let mount = MountPointDir::new("run.sra", file);
        assert_eq!(mount.list("").unwrap(), vec!["run.sra"]);
        assert!(mount.open_file("run.sra").is_ok());
        assert!(mount.open_file("other").is_err());
    }
}
