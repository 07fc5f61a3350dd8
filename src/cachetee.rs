use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::{Result, VfsError};
use crate::vfile::{read_all_at, VFile};

pub const CACHE_BLOCK: usize = 32768 * 4;
pub const CACHE_CLUSTER: usize = 1;

struct TeeState {
    file: File,
    present: Vec<bool>,
}

/// Reads from an upstream stream and writes every fetched block into a sparse
/// local file at the matching offset, serving repeated reads from the local
/// copy. Concurrent opens of the same cache location are excluded by a lock
/// file next to it.
pub struct CacheTeeFile {
    upstream: Arc<dyn VFile>,
    size: u64,
    block: u64,
    state: Mutex<TeeState>,
    lock_path: Utf8PathBuf,
}

impl CacheTeeFile {
    pub fn new(
        upstream: Arc<dyn VFile>,
        cache_path: &Utf8Path,
        block: usize,
        _cluster: usize,
    ) -> Result<Self> {
        let size = upstream.size()?;
        if let Some(parent) = cache_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let lock_path = Utf8PathBuf::from(format!("{cache_path}.lock"));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(VfsError::PathIncorrect(format!(
                    "cache location is locked: {lock_path}"
                )));
            }
            Err(e) => return Err(e.into()),
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(cache_path)?;
        file.set_len(size)?;

        let block = block.max(1) as u64;
        let blocks = size.div_ceil(block) as usize;
        Ok(CacheTeeFile {
            upstream,
            size,
            block,
            state: Mutex::new(TeeState {
                file,
                present: vec![false; blocks],
            }),
            lock_path,
        })
    }
}

impl Drop for CacheTeeFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

impl VFile for CacheTeeFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let index = (offset / self.block) as usize;
        let block_start = index as u64 * self.block;
        let block_end = (block_start + self.block).min(self.size);
        let n = buf.len().min((block_end - offset) as usize);

        let mut state = self.state.lock().unwrap();
        if !state.present[index] {
            let mut block = vec![0u8; (block_end - block_start) as usize];
            let got = read_all_at(self.upstream.as_ref(), block_start, &mut block)?;
            if got < block.len() {
                return Err(VfsError::Http(format!(
                    "short read at {block_start}: {got} of {} bytes",
                    block.len()
                )));
            }
            state.file.seek(SeekFrom::Start(block_start))?;
            state.file.write_all(&block)?;
            state.present[index] = true;
            let within = (offset - block_start) as usize;
            buf[..n].copy_from_slice(&block[within..within + n]);
            return Ok(n);
        }

        state.file.seek(SeekFrom::Start(offset))?;
        state.file.read_exact(&mut buf[..n])?;
        Ok(n)
    }

    fn size(&self) -> Result<u64> {
        Ok(self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfile::MemFile;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFile {
        inner: MemFile,
        reads: AtomicUsize,
    }

    impl VFile for CountingFile {
        fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.read_at(offset, buf)
        }

        fn size(&self) -> Result<u64> {
            self.inner.size()
        }
    }

    #[test]
    fn repeated_reads_come_from_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Utf8PathBuf::from_path_buf(dir.path().join("c.cache")).unwrap();
        let data: Vec<u8> = (0..200_000u32).map(|v| (v % 253) as u8).collect();
        let upstream = Arc::new(CountingFile {
            inner: MemFile::new(data.clone()),
            reads: AtomicUsize::new(0),
        });
        let tee = CacheTeeFile::new(upstream.clone(), &cache, 4096, CACHE_CLUSTER).unwrap();

        let mut buf = vec![0u8; 1000];
        let n = read_all_at(&tee, 50_000, &mut buf).unwrap();
        assert_eq!(&buf[..n], &data[50_000..51_000]);
        let first_pass = upstream.reads.load(Ordering::SeqCst);
        assert!(first_pass > 0);

        let n = read_all_at(&tee, 50_000, &mut buf).unwrap();
        assert_eq!(&buf[..n], &data[50_000..51_000]);
        assert_eq!(upstream.reads.load(Ordering::SeqCst), first_pass);
    }

    #[test]
    fn cache_file_holds_fetched_blocks_at_matching_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Utf8PathBuf::from_path_buf(dir.path().join("c.cache")).unwrap();
        let data: Vec<u8> = (0..20_000u32).map(|v| (v % 241) as u8).collect();
        let upstream: Arc<dyn VFile> = Arc::new(MemFile::new(data.clone()));
        let tee = CacheTeeFile::new(upstream, &cache, 4096, CACHE_CLUSTER).unwrap();

        let mut buf = vec![0u8; 10];
        read_all_at(&tee, 8192, &mut buf).unwrap();
        drop(tee);

        let on_disk = fs::read(&cache).unwrap();
        assert_eq!(on_disk.len(), data.len());
        assert_eq!(&on_disk[8192..8192 + 4096], &data[8192..8192 + 4096]);
    }

    #[test]
    fn second_open_is_excluded_by_the_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Utf8PathBuf::from_path_buf(dir.path().join("c.cache")).unwrap();
        let upstream: Arc<dyn VFile> = Arc::new(MemFile::new(vec![0u8; 100]));
        let first = CacheTeeFile::new(upstream.clone(), &cache, 4096, 1).unwrap();
        assert!(CacheTeeFile::new(upstream.clone(), &cache, 4096, 1).is_err());
        drop(first);
        assert!(CacheTeeFile::new(upstream, &cache, 4096, 1).is_ok());
    }
}
