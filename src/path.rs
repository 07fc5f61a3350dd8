use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Result, VfsError};
use crate::parser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemeType {
    None,
    File,
    NcbiFile,
    NcbiVfs,
    NcbiAcc,
    NcbiObj,
    NcbiLegrefseq,
    Http,
    Https,
    Ftp,
    Fasp,
    NotSupported,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathType {
    Invalid,
    Oid,
    Accession,
    NameOrOid,
    NameOrAccession,
    Name,
    RelPath,
    FullPath,
    UncPath,
    HostName,
    Endpoint,
    Auth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostType {
    None,
    Dns,
    Ipv4,
    Ipv6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathOption {
    Encrypted,
    PwPath,
    PwFd,
    ReadGroup,
    VdbCtx,
    GapTicket,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone)]
pub struct VfsPath {
    pub(crate) text: String,
    pub(crate) from_uri: bool,
    pub(crate) scheme_type: SchemeType,
    pub(crate) scheme: Span,
    pub(crate) scheme_override: Option<&'static str>,
    pub(crate) auth: Span,
    pub(crate) host: Span,
    pub(crate) host_type: HostType,
    pub(crate) ipv4: u32,
    pub(crate) ipv6: [u16; 8],
    pub(crate) port_name: Span,
    pub(crate) port_num: u16,
    pub(crate) missing_port: bool,
    pub(crate) path: Span,
    pub(crate) path_type: PathType,
    pub(crate) query: Span,
    pub(crate) fragment: Span,
    pub(crate) obj_id: u32,
    pub(crate) acc_code: u32,
}

impl VfsPath {
    pub(crate) fn empty(text: String) -> Self {
        VfsPath {
            text,
            from_uri: false,
            scheme_type: SchemeType::None,
            scheme: Span::default(),
            scheme_override: None,
            auth: Span::default(),
            host: Span::default(),
            host_type: HostType::None,
            ipv4: 0,
            ipv6: [0; 8],
            port_name: Span::default(),
            port_num: 0,
            missing_port: false,
            path: Span::default(),
            path_type: PathType::Invalid,
            query: Span::default(),
            fragment: Span::default(),
            obj_id: 0,
            acc_code: 0,
        }
    }

    pub fn parse(text: &str) -> Result<Arc<VfsPath>> {
        parser::parse(text).map(Arc::new)
    }

    fn slice(&self, span: Span) -> &str {
        &self.text[span.start..span.end]
    }

    fn check_valid(&self) -> Result<()> {
        if self.path_type == PathType::Invalid {
            return Err(VfsError::PathInvalid);
        }
        Ok(())
    }

    pub fn from_uri(&self) -> bool {
        self.from_uri
    }

    pub fn path_type(&self) -> PathType {
        self.path_type
    }

    pub fn host_type(&self) -> HostType {
        self.host_type
    }

    /// Scheme classification as seen by the open pipeline: paths not built
    /// from a URI always classify as `None`, whatever scheme a serializer
    /// would synthesize for them.
    pub fn uri_type(&self) -> SchemeType {
        if self.path_type == PathType::Invalid {
            SchemeType::Invalid
        } else if !self.from_uri {
            SchemeType::None
        } else {
            self.scheme_type
        }
    }

    pub fn scheme(&self) -> Result<&str> {
        self.check_valid()?;
        if let Some(s) = self.scheme_override {
            return Ok(s);
        }
        if !self.scheme.is_empty() {
            return Ok(self.slice(self.scheme));
        }
        self.synthesized_scheme()
    }

    fn synthesized_scheme(&self) -> Result<&'static str> {
        match self.path_type {
            PathType::Oid => Ok("ncbi-obj"),
            PathType::Accession => Ok("ncbi-acc"),
            PathType::NameOrOid
            | PathType::NameOrAccession
            | PathType::Name
            | PathType::RelPath
            | PathType::FullPath => {
                if !self.query.is_empty() || !self.fragment.is_empty() {
                    Ok("ncbi-file")
                } else {
                    Ok("file")
                }
            }
            PathType::UncPath => Ok("ncbi-file"),
            _ => Err(VfsError::TypeIncorrect),
        }
    }

    pub fn auth(&self) -> &str {
        self.slice(self.auth)
    }

    pub fn host(&self) -> &str {
        self.slice(self.host)
    }

    pub fn port_name(&self) -> &str {
        self.slice(self.port_name)
    }

    pub fn port_num(&self) -> u16 {
        self.port_num
    }

    pub fn missing_port(&self) -> bool {
        self.missing_port
    }

    pub fn ipv4(&self) -> u32 {
        self.ipv4
    }

    pub fn ipv6(&self) -> [u16; 8] {
        self.ipv6
    }

    /// Hierarchical path portion; for OID paths this is the digit run.
    pub fn path_str(&self) -> &str {
        self.slice(self.path)
    }

    /// Raw query including the leading `?`, or empty.
    pub fn query(&self) -> &str {
        self.slice(self.query)
    }

    /// Raw fragment including the leading `#`, or empty.
    pub fn fragment(&self) -> &str {
        self.slice(self.fragment)
    }

    /// Fragment without the `#` marker.
    pub fn fragment_value(&self) -> &str {
        let f = self.fragment();
        f.strip_prefix('#').unwrap_or(f)
    }

    pub fn obj_id(&self) -> u32 {
        self.obj_id
    }

    pub fn acc_code(&self) -> u32 {
        self.acc_code
    }

    /// Whether the path portion can be handed to the OS filesystem.
    pub fn is_fs_compatible(&self) -> bool {
        matches!(
            self.path_type,
            PathType::NameOrAccession
                | PathType::Name
                | PathType::RelPath
                | PathType::UncPath
                | PathType::FullPath
        )
    }

    /// Case-insensitive lookup of a raw query parameter. A parameter present
    /// without `=` matches with an empty value.
    pub fn param(&self, name: &str) -> Result<&str> {
        self.check_valid()?;
        if name.is_empty() {
            return Err(VfsError::EmptyParam);
        }
        let query = self.query();
        let body = query.strip_prefix('?').unwrap_or("");
        for entry in body.split('&') {
            match entry.split_once('=') {
                Some((key, value)) => {
                    if key.eq_ignore_ascii_case(name) {
                        return Ok(value);
                    }
                }
                None => {
                    if entry.eq_ignore_ascii_case(name) {
                        return Ok("");
                    }
                }
            }
        }
        Err(VfsError::ParamNotFound(name.to_string()))
    }

    /// Recognized query options form a closed set; everything else in the
    /// query is ignored.
    pub fn option(&self, option: PathOption) -> Result<&str> {
        let (first, second) = match option {
            PathOption::Encrypted => ("enc", Some("encrypt")),
            PathOption::PwPath => ("pwfile", None),
            PathOption::PwFd => ("pwfile", None),
            PathOption::ReadGroup => ("readgroup", None),
            PathOption::VdbCtx => ("vdb-ctx", None),
            PathOption::GapTicket => ("tic", None),
        };
        match self.param(first) {
            Ok(value) => Ok(value),
            Err(VfsError::ParamNotFound(_)) => match second {
                Some(name) => self.param(name),
                None => Err(VfsError::ParamNotFound(first.to_string())),
            },
            Err(other) => Err(other),
        }
    }

    fn host_section(&self, prefix: &str) -> String {
        match self.host_type {
            HostType::None | HostType::Dns => format!("{prefix}{}", self.host()),
            HostType::Ipv4 => format!(
                "{prefix}{}.{}.{}.{}",
                (self.ipv4 >> 24) & 0xFF,
                (self.ipv4 >> 16) & 0xFF,
                (self.ipv4 >> 8) & 0xFF,
                self.ipv4 & 0xFF
            ),
            HostType::Ipv6 => {
                let g = &self.ipv6;
                let groups = format!(
                    "{:x}:{:x}:{:x}:{:x}:{:x}:{:x}:{:x}:{:x}",
                    g[0], g[1], g[2], g[3], g[4], g[5], g[6], g[7]
                );
                if prefix.is_empty() {
                    groups
                } else {
                    format!("{prefix}[{groups}]")
                }
            }
        }
    }

    fn port_section(&self) -> String {
        if !self.port_name.is_empty() {
            format!(":{}", self.port_name())
        } else if self.port_num != 0 {
            format!(":{}", self.port_num)
        } else if self.missing_port {
            ":".to_string()
        } else {
            String::new()
        }
    }

    /// Render the full URI, synthesizing a scheme when the input had none.
    pub fn to_uri(&self) -> Result<String> {
        self.check_valid()?;
        let mut out = String::with_capacity(self.text.len() + 16);
        out.push_str(self.scheme()?);
        out.push(':');

        let has_auth = !self.auth.is_empty();
        if has_auth {
            out.push_str("//");
            out.push_str(self.auth());
        }
        let host = self.host_section(if has_auth { "@" } else { "//" });
        let has_host = host.len() > if has_auth { 1 } else { 2 };
        out.push_str(&host);
        if has_host {
            out.push_str(&self.port_section());
        }

        match self.path_type {
            PathType::Oid => {
                if !has_host {
                    out.truncate(out.len() - 2);
                } else {
                    out.push('/');
                }
                out.push_str(&self.obj_id.to_string());
            }
            PathType::Accession
            | PathType::NameOrOid
            | PathType::NameOrAccession
            | PathType::Name
            | PathType::RelPath
            | PathType::UncPath => {
                out.truncate(out.len() - 2);
                out.push_str(self.path_str());
            }
            PathType::FullPath => out.push_str(self.path_str()),
            _ => {}
        }
        out.push_str(self.query());
        out.push_str(self.fragment());
        Ok(out)
    }

    /// Render respecting the original source of the path: plain POSIX paths
    /// stay plain, URIs stay URIs.
    pub fn to_path_string(&self) -> Result<String> {
        self.check_valid()?;
        if self.from_uri || !self.query.is_empty() || !self.fragment.is_empty() {
            return self.to_uri();
        }
        match self.path_type {
            PathType::HostName => Ok(self.host_section("")),
            PathType::Endpoint => Ok(format!("{}{}", self.host_section(""), self.port_section())),
            PathType::Oid => Ok(self.obj_id.to_string()),
            _ => Ok(self.path_str().to_string()),
        }
    }

    fn copy_out(value: &str, buf: &mut [u8]) -> Result<usize> {
        let bytes = value.as_bytes();
        if bytes.len() > buf.len() {
            return Err(VfsError::BufferInsufficient {
                need: bytes.len(),
                have: buf.len(),
            });
        }
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(bytes.len())
    }

    pub fn read_uri(&self, buf: &mut [u8]) -> Result<usize> {
        Self::copy_out(&self.to_uri()?, buf)
    }

    pub fn read_scheme(&self, buf: &mut [u8]) -> Result<usize> {
        Self::copy_out(self.scheme()?, buf)
    }

    pub fn read_auth(&self, buf: &mut [u8]) -> Result<usize> {
        self.check_valid()?;
        Self::copy_out(self.auth(), buf)
    }

    pub fn read_host(&self, buf: &mut [u8]) -> Result<usize> {
        self.check_valid()?;
        Self::copy_out(&self.host_section(""), buf)
    }

    pub fn read_port_name(&self, buf: &mut [u8]) -> Result<usize> {
        self.check_valid()?;
        Self::copy_out(self.port_name(), buf)
    }

    pub fn read_path(&self, buf: &mut [u8]) -> Result<usize> {
        self.check_valid()?;
        match self.path_type {
            PathType::Oid => Self::copy_out(&self.obj_id.to_string(), buf),
            _ => Self::copy_out(self.path_str(), buf),
        }
    }

    pub fn read_query(&self, buf: &mut [u8]) -> Result<usize> {
        self.check_valid()?;
        let q = self.query();
        Self::copy_out(q.strip_prefix('?').unwrap_or(q), buf)
    }

    pub fn read_param(&self, name: &str, buf: &mut [u8]) -> Result<usize> {
        Self::copy_out(self.param(name)?, buf)
    }

    pub fn read_fragment(&self, buf: &mut [u8]) -> Result<usize> {
        self.check_valid()?;
        Self::copy_out(self.fragment_value(), buf)
    }
}

impl FromStr for VfsPath {
    type Err = VfsError;

    fn from_str(value: &str) -> Result<Self> {
        parser::parse(value)
    }
}

impl fmt::Display for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_path_string() {
            Ok(s) => write!(f, "{s}"),
            Err(_) => write!(f, "<invalid path>"),
        }
    }
}
