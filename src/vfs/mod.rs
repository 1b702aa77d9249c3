//! Virtual filesystem layer.
//!
//! # Responsibilities
//! - Uniform file access over a directory tree or a zip archive
//! - Keep every resolved path inside the configured root (the "false root")
//! - Mutation (unlink/mkdir/rmdir/create) on the OS backend only
//!
//! # Data Flow
//! ```text
//! request path ("/css/../../site.css")
//!     → normalize()          "/site.css"   (.. at depth 0 is dropped)
//!     → backend lookup       root.join("site.css") | archive index["site.css"]
//!     → stat / open
//! ```
//!
//! # Design Decisions
//! - Backends are stateless; directory navigation lives in [`DirCursor`],
//!   which is owned by whoever needs it for the length of one request
//! - Paths are accepted with or without a leading `/`
//! - Existence queries never fail, they answer `false`

pub mod archive;
pub mod cursor;
pub mod os;

use std::io::{Read, Write};
use thiserror::Error;

pub use archive::ArchiveFilesystem;
pub use cursor::DirCursor;
pub use os::OsFilesystem;

/// File metadata as seen by the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: i64,
    /// Unix-style mode bits including the file type.
    pub mode: u32,
}

/// How a file is opened for writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Create or truncate.
    Truncate,
    /// Create or append.
    Append,
}

/// Errors raised by filesystem backends.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("{0} is not implemented for this filesystem")]
    NotImplemented(&'static str),

    #[error("archive error: {0}")]
    Archive(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A readable byte stream handed out by [`VirtualFilesystem::open`].
pub type FileReader = Box<dyn Read + Send>;

/// A writable byte stream handed out by [`VirtualFilesystem::create`].
pub type FileWriter = Box<dyn Write + Send>;

/// Uniform access to a tree of files rooted somewhere the caller cannot escape.
pub trait VirtualFilesystem: Send + Sync + std::fmt::Debug {
    /// Human-readable origin, used in logs.
    fn describe(&self) -> String;

    fn isfile(&self, path: &str) -> bool;

    fn isdir(&self, path: &str) -> bool;

    fn stat(&self, path: &str) -> Result<Stat, FsError>;

    /// Open a file for reading.
    fn open(&self, path: &str) -> Result<FileReader, FsError>;

    /// Names of the entries directly below `path`, sorted.
    fn listdir(&self, path: &str) -> Result<Vec<String>, FsError>;

    fn create(&self, path: &str, mode: WriteMode) -> Result<FileWriter, FsError> {
        let _ = (path, mode);
        Err(FsError::NotImplemented("create"))
    }

    fn unlink(&self, path: &str) -> Result<(), FsError> {
        let _ = path;
        Err(FsError::NotImplemented("unlink"))
    }

    fn mkdir(&self, path: &str) -> Result<(), FsError> {
        let _ = path;
        Err(FsError::NotImplemented("mkdir"))
    }

    fn rmdir(&self, path: &str) -> Result<(), FsError> {
        let _ = path;
        Err(FsError::NotImplemented("rmdir"))
    }
}

/// Collapse `/` runs, `.` and `..` segments.
///
/// For absolute paths a `..` at depth 0 is dropped, so the result never
/// climbs above `/`. Relative paths keep leading `..` segments; the empty
/// relative path normalizes to `""`.
pub fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Resolve `relative` against `base` without touching any filesystem.
///
/// The result is always absolute and normalized.
pub fn resolve(base: &str, relative: &str) -> String {
    if relative.starts_with('/') {
        normalize(relative)
    } else {
        normalize(&format!("/{}/{}", base, relative))
    }
}

/// Key form of a path: normalized, rooted, then stripped of the leading `/`.
pub(crate) fn rooted_key(path: &str) -> String {
    normalize(&format!("/{}", path))
        .trim_start_matches('/')
        .to_string()
}
