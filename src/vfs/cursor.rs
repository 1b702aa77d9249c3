//! Current-directory navigation for directory-browsing callers.

use super::{resolve, FsError, VirtualFilesystem};

/// A current-directory cursor over a filesystem.
///
/// The filesystem itself stays stateless; a cursor is created per request
/// and dropped with it.
#[derive(Debug)]
pub struct DirCursor<'a> {
    fs: &'a dyn VirtualFilesystem,
    current: String,
}

impl<'a> DirCursor<'a> {
    pub fn new(fs: &'a dyn VirtualFilesystem) -> Self {
        Self { fs, current: "/".to_string() }
    }

    pub fn current_directory(&self) -> &str {
        &self.current
    }

    /// Absolute path of `path` relative to the current directory.
    pub fn resolve(&self, path: &str) -> String {
        resolve(&self.current, path)
    }

    /// Change directory. Any failure leaves the cursor where it was.
    pub fn cwd(&mut self, path: &str) -> bool {
        let target = self.resolve(path);
        if self.fs.isdir(&target) {
            self.current = target;
            true
        } else {
            false
        }
    }

    pub fn cdup(&mut self) -> bool {
        self.cwd("..")
    }

    pub fn isfile(&self, path: &str) -> bool {
        self.fs.isfile(&self.resolve(path))
    }

    pub fn isdir(&self, path: &str) -> bool {
        self.fs.isdir(&self.resolve(path))
    }

    pub fn listdir(&self) -> Result<Vec<String>, FsError> {
        self.fs.listdir(&self.current)
    }
}
