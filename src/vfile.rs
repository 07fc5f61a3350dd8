use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};

use camino::Utf8Path;

use crate::error::{Result, VfsError};

/// Capability set every stage of the open pipeline exposes. Wrapping stages
/// own their inner stage, so dropping the outermost handle cascades.
pub trait VFile: Send + Sync {
    /// Read up to `buf.len()` bytes at `offset`; returns 0 at end of stream.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    fn size(&self) -> Result<u64>;

    fn random_access(&self) -> bool {
        true
    }
}

impl std::fmt::Debug for dyn VFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VFile")
    }
}

/// Keep reading until the buffer is full or the stream ends.
pub fn read_all_at(file: &dyn VFile, offset: u64, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0usize;
    while total < buf.len() {
        let n = file.read_at(offset + total as u64, &mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

pub struct LocalFile {
    inner: Mutex<File>,
    size: u64,
}

impl LocalFile {
    pub fn open(path: &Utf8Path) -> Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(LocalFile {
            inner: Mutex::new(file),
            size,
        })
    }

    pub fn from_file(file: File) -> Result<Self> {
        let size = file.metadata()?.len();
        Ok(LocalFile {
            inner: Mutex::new(file),
            size,
        })
    }
}

impl VFile for LocalFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut file = self.inner.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        loop {
            match file.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn size(&self) -> Result<u64> {
        Ok(self.size)
    }
}

/// `/dev/null` read side: always at end of stream.
pub struct NullFile;

impl VFile for NullFile {
    fn read_at(&self, _offset: u64, _buf: &mut [u8]) -> Result<usize> {
        Ok(0)
    }

    fn size(&self) -> Result<u64> {
        Ok(0)
    }
}

/// Standard input as a forward-only stream.
pub struct StdinFile {
    state: Mutex<(io::Stdin, u64)>,
}

impl StdinFile {
    pub fn new() -> Self {
        StdinFile {
            state: Mutex::new((io::stdin(), 0)),
        }
    }
}

impl Default for StdinFile {
    fn default() -> Self {
        Self::new()
    }
}

impl VFile for StdinFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        if offset != state.1 {
            return Err(VfsError::NoRandomAccess);
        }
        let n = state.0.read(buf)?;
        state.1 += n as u64;
        Ok(n)
    }

    fn size(&self) -> Result<u64> {
        Err(VfsError::NoRandomAccess)
    }

    fn random_access(&self) -> bool {
        false
    }
}

/// In-memory stream, mostly a test double for pipeline stages.
pub struct MemFile {
    data: Vec<u8>,
}

impl MemFile {
    pub fn new(data: Vec<u8>) -> Self {
        MemFile { data }
    }
}

impl VFile for MemFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let len = self.data.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }
}

/// Fixed window into an underlying stream; archive entries are served as
/// slices of the archive file.
pub struct SliceFile {
    inner: Arc<dyn VFile>,
    offset: u64,
    len: u64,
}

impl SliceFile {
    pub fn new(inner: Arc<dyn VFile>, offset: u64, len: u64) -> Self {
        SliceFile { inner, offset, len }
    }
}

impl VFile for SliceFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.len {
            return Ok(0);
        }
        let avail = (self.len - offset) as usize;
        let want = buf.len().min(avail);
        self.inner.read_at(self.offset + offset, &mut buf[..want])
    }

    fn size(&self) -> Result<u64> {
        Ok(self.len)
    }

    fn random_access(&self) -> bool {
        self.inner.random_access()
    }
}

const BUF_PAGE: usize = 128 * 1024;

struct BufState {
    pages: HashMap<u64, Vec<u8>>,
    order: VecDeque<u64>,
    bytes: usize,
    /// next offset to pull from a forward-only inner stream
    next: u64,
    eof: Option<u64>,
}

/// Read-side buffer over another stage. Pages are fetched on demand within a
/// byte budget; a forward-only inner stream is consumed in order, which makes
/// the wrapper randomly accessible over everything fetched so far.
pub struct BufFile {
    inner: Arc<dyn VFile>,
    capacity: usize,
    sequential: bool,
    state: Mutex<BufState>,
}

impl BufFile {
    pub fn new(inner: Arc<dyn VFile>, capacity: usize) -> Self {
        let sequential = !inner.random_access();
        BufFile {
            inner,
            capacity: capacity.max(BUF_PAGE),
            sequential,
            state: Mutex::new(BufState {
                pages: HashMap::new(),
                order: VecDeque::new(),
                bytes: 0,
                next: 0,
                eof: None,
            }),
        }
    }

    fn fetch_page(&self, state: &mut BufState, index: u64) -> Result<()> {
        if state.pages.contains_key(&index) {
            return Ok(());
        }
        if self.sequential {
            // pull pages in order up to the one requested
            let mut at = state.next / BUF_PAGE as u64;
            while at <= index {
                if state.eof.is_some() {
                    break;
                }
                self.fetch_one(state, at)?;
                at += 1;
            }
        } else {
            self.fetch_one(state, index)?;
        }
        Ok(())
    }

    fn fetch_one(&self, state: &mut BufState, index: u64) -> Result<()> {
        let offset = index * BUF_PAGE as u64;
        let mut page = vec![0u8; BUF_PAGE];
        let n = read_all_at(self.inner.as_ref(), offset, &mut page)?;
        page.truncate(n);
        if n < BUF_PAGE {
            state.eof = Some(offset + n as u64);
        }
        state.next = offset + n as u64;
        state.bytes += page.len();
        state.order.push_back(index);
        state.pages.insert(index, page);
        while state.bytes > self.capacity {
            // a sequential stream cannot refetch evicted pages, keep them
            if self.sequential {
                break;
            }
            match state.order.pop_front() {
                Some(old) => {
                    if let Some(page) = state.pages.remove(&old) {
                        state.bytes -= page.len();
                    }
                }
                None => break,
            }
        }
        Ok(())
    }
}

impl VFile for BufFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.lock().unwrap();
        if let Some(eof) = state.eof {
            if offset >= eof {
                return Ok(0);
            }
        }
        let index = offset / BUF_PAGE as u64;
        self.fetch_page(&mut state, index)?;
        let page = match state.pages.get(&index) {
            Some(page) => page,
            None => return Ok(0),
        };
        let within = (offset - index * BUF_PAGE as u64) as usize;
        if within >= page.len() {
            return Ok(0);
        }
        let n = buf.len().min(page.len() - within);
        buf[..n].copy_from_slice(&page[within..within + n]);
        Ok(n)
    }

    fn size(&self) -> Result<u64> {
        self.inner.size()
    }
}

/// `Read + Seek` adapter for consumers that want a conventional stream, such
/// as the TAR index builder.
pub struct VFileReader {
    inner: Arc<dyn VFile>,
    pos: u64,
}

impl VFileReader {
    pub fn new(inner: Arc<dyn VFile>) -> Self {
        VFileReader { inner, pos: 0 }
    }
}

impl Read for VFileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self
            .inner
            .read_at(self.pos, buf)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for VFileReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let next = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
            SeekFrom::End(delta) => {
                let size = self
                    .inner
                    .size()
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
                size as i64 + delta
            }
        };
        if next < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start",
            ));
        }
        self.pos = next as u64;
        Ok(self.pos)
    }
}

/// Write-side handle; the write path needs nothing beyond `Write`.
pub type VFileWrite = Box<dyn Write + Send>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_windows_the_inner_stream() {
        let inner: Arc<dyn VFile> = Arc::new(MemFile::new(b"0123456789".to_vec()));
        let slice = SliceFile::new(inner, 2, 5);
        assert_eq!(slice.size().unwrap(), 5);
        let mut buf = [0u8; 16];
        let n = slice.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"23456");
        assert_eq!(slice.read_at(5, &mut buf).unwrap(), 0);
    }

    #[test]
    fn buffered_reads_match_inner() {
        let data: Vec<u8> = (0..100_000u32).map(|v| (v % 251) as u8).collect();
        let inner: Arc<dyn VFile> = Arc::new(MemFile::new(data.clone()));
        let buffed = BufFile::new(inner, 4 * BUF_PAGE);
        let mut buf = vec![0u8; 1000];
        let n = read_all_at(&buffed, 99_500, &mut buf).unwrap();
        assert_eq!(n, 500);
        assert_eq!(&buf[..n], &data[99_500..]);
    }

    #[test]
    fn reader_adapter_seeks() {
        let inner: Arc<dyn VFile> = Arc::new(MemFile::new(b"hello world".to_vec()));
        let mut reader = VFileReader::new(inner);
        reader.seek(SeekFrom::Start(6)).unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "world");
    }
}
