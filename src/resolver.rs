use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::Result;
use crate::path::VfsPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Fasp,
}

/// Flags steering accession resolution. `kdb_acc` lets scheme-less names be
/// tried as accessions before falling back to the filesystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveFlags {
    pub no_acc_local: bool,
    pub no_acc_remote: bool,
    pub kdb_acc: bool,
}

impl ResolveFlags {
    pub const NONE: ResolveFlags = ResolveFlags {
        no_acc_local: false,
        no_acc_remote: false,
        kdb_acc: false,
    };

    pub fn no_acc(&self) -> bool {
        self.no_acc_local && self.no_acc_remote
    }
}

/// The resolver oracle. `local` answers with a concrete filesystem path,
/// `remote` with a URL, `cache` with a local location a remote stream may be
/// teed into. For one accession query at most one of local/remote holds.
pub trait Resolver: Send + Sync {
    fn local(&self, accession: &VfsPath) -> Result<Arc<VfsPath>>;

    fn remote(&self, protocol: Protocol, accession: &VfsPath) -> Result<Arc<VfsPath>>;

    fn cache(&self, remote: &VfsPath, size: u64) -> Result<Arc<VfsPath>>;
}

/// Lexical resolution of `rel` against an absolute base directory; `.` and
/// `..` collapse without touching the filesystem.
pub(crate) fn resolve_against(base: &Utf8Path, rel: &str) -> Utf8PathBuf {
    let mut stack: Vec<&str> = Vec::new();
    if !rel.starts_with('/') {
        for part in base.as_str().split('/') {
            push_part(&mut stack, part);
        }
    }
    for part in rel.split('/') {
        push_part(&mut stack, part);
    }
    Utf8PathBuf::from(format!("/{}", stack.join("/")))
}

fn push_part<'a>(stack: &mut Vec<&'a str>, part: &'a str) {
    match part {
        "" | "." => {}
        ".." => {
            stack.pop();
        }
        other => stack.push(other),
    }
}
