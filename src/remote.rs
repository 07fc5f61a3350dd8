use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_RANGE, RANGE, USER_AGENT};
use reqwest::StatusCode;

use crate::error::{Result, VfsError};
use crate::vfile::VFile;

/// Opens a URL as a readable byte stream.
pub trait RemoteTransport: Send + Sync {
    fn open(&self, uri: &str) -> Result<Arc<dyn VFile>>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("biodata-vfs/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| VfsError::Http(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| VfsError::Http(err.to_string()))?;
        Ok(HttpTransport { client })
    }
}

impl RemoteTransport for HttpTransport {
    fn open(&self, uri: &str) -> Result<Arc<dyn VFile>> {
        let lower = uri.to_ascii_lowercase();
        if !(lower.starts_with("http://") || lower.starts_with("https://")) {
            let scheme = uri.split(':').next().unwrap_or(uri);
            return Err(VfsError::PathUnsupported(scheme.to_string()));
        }
        let file = HttpFile::open(self.client.clone(), uri)?;
        Ok(Arc::new(file))
    }
}

/// Random access over HTTP(S) range requests. Request failures propagate to
/// the caller like any other pipeline error.
pub struct HttpFile {
    client: Client,
    url: String,
    size: u64,
}

impl HttpFile {
    fn open(client: Client, url: &str) -> Result<Self> {
        let response = client
            .get(url)
            .header(RANGE, HeaderValue::from_static("bytes=0-0"))
            .send()
            .map_err(|err| VfsError::Http(err.to_string()))?;
        let status = response.status();
        let size = match status {
            StatusCode::PARTIAL_CONTENT => response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_content_range_total)
                .ok_or_else(|| VfsError::Http(format!("unparsable content range from {url}")))?,
            status if status.is_success() => response.content_length().unwrap_or(0),
            status => {
                return Err(VfsError::HttpStatus {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }
        };
        Ok(HttpFile {
            client,
            url: url.to_string(),
            size,
        })
    }
}

impl VFile for HttpFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let end = (offset + buf.len() as u64).min(self.size) - 1;
        let range = format!("bytes={offset}-{end}");
        let response = self
            .client
            .get(&self.url)
            .header(RANGE, range.as_str())
            .send()
            .map_err(|err| VfsError::Http(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(VfsError::HttpStatus {
                status: status.as_u16(),
                url: self.url.clone(),
            });
        }
        let ranged = status == StatusCode::PARTIAL_CONTENT;
        let body = response
            .bytes()
            .map_err(|err| VfsError::Http(err.to_string()))?;
        let data: &[u8] = if ranged {
            &body
        } else {
            // the server ignored the range header and sent the whole entity
            if offset as usize >= body.len() {
                return Ok(0);
            }
            &body[offset as usize..]
        };
        let n = buf.len().min(data.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn size(&self) -> Result<u64> {
        Ok(self.size)
    }
}

fn parse_content_range_total(value: &str) -> Option<u64> {
    // "bytes 0-0/12345"
    value.rsplit_once('/')?.1.trim().parse().ok()
}
