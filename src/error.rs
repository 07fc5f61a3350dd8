use std::io;

use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VfsError>;

#[derive(Debug, Error, Diagnostic)]
pub enum VfsError {
    #[error("empty input string")]
    EmptyString,

    #[error("unexpected character {ch:?} at offset {at}")]
    UnexpectedChar { ch: char, at: usize },

    #[error("input truncated inside required structure")]
    InsufficientData,

    #[error("numeric component out of range: {0}")]
    ExcessiveData(String),

    #[error("required parameter is empty")]
    EmptyParam,

    #[error("query parameter not found: {0}")]
    ParamNotFound(String),

    #[error("buffer too small: need {need} bytes, have {have}")]
    BufferInsufficient { need: usize, have: usize },

    #[error("path is invalid")]
    PathInvalid,

    #[error("path scheme not supported: {0}")]
    PathUnsupported(String),

    #[error("path not usable for this operation: {0}")]
    PathIncorrect(String),

    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("accession resolution not available")]
    SraNotAvailable,

    #[error("accession resolution not supported without a resolver")]
    SraUnsupported,

    #[error("file not found: {0}")]
    FileNotFound(Utf8PathBuf),

    #[error("bad file path: {0}")]
    FileInvalid(Utf8PathBuf),

    #[error("not a regular file: {0}")]
    FileIncorrect(Utf8PathBuf),

    #[error("unknown file type: {0}")]
    FileUnknown(Utf8PathBuf),

    #[error("directory not found: {0}")]
    DirectoryNotFound(Utf8PathBuf),

    #[error("path names a file, not a directory: {0}")]
    DirectoryReadonly(Utf8PathBuf),

    #[error("not a directory: {0}")]
    DirectoryIncorrect(Utf8PathBuf),

    #[error("password directory permits group or world access: {0}")]
    DirectoryExcessive(Utf8PathBuf),

    #[error("encryption key not found")]
    EncryptionKeyNotFound,

    #[error("encryption key invalid: {0}")]
    EncryptionKeyInvalid(String),

    #[error("decryption failed; the password may be wrong")]
    EncryptionIncorrect,

    #[error("password exceeds {max} bytes")]
    SizeExcessive { max: usize },

    #[error("path type carries no scheme")]
    TypeIncorrect,

    #[error("input does not have the expected shape: {0}")]
    TokenIncorrect(String),

    #[error("{path}: not recognized as an SRA or TAR archive{}", archive_hint(.was_encrypted))]
    NotArchive { path: String, was_encrypted: bool },

    #[error("stream does not support random access")]
    NoRandomAccess,

    #[error("object id {0} is not registered")]
    ObjectNotFound(u32),

    #[error("filesystem error: {0}")]
    Io(#[from] io::Error),

    #[error("remote request failed: {0}")]
    Http(String),

    #[error("remote returned status {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("configuration error: {0}")]
    Config(String),
}

fn archive_hint(was_encrypted: &bool) -> &'static str {
    if *was_encrypted {
        "; the file was encrypted, so the password may be wrong"
    } else {
        ""
    }
}

impl VfsError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            VfsError::PathNotFound(_)
                | VfsError::FileNotFound(_)
                | VfsError::DirectoryNotFound(_)
                | VfsError::ObjectNotFound(_)
                | VfsError::ParamNotFound(_)
        )
    }
}
