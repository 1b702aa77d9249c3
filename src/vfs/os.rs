//! Directory-backed filesystem.

use std::fs::{self, File, Metadata, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use super::{rooted_key, FileReader, FileWriter, FsError, Stat, VirtualFilesystem, WriteMode};

/// A filesystem rooted at a real directory.
///
/// Every path is re-rooted under `root` after normalization, so `..`
/// sequences can never reach a file outside of it.
#[derive(Debug, Clone)]
pub struct OsFilesystem {
    root: PathBuf,
}

impl OsFilesystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a request path to the OS path it names.
    pub fn translate(&self, path: &str) -> PathBuf {
        let key = rooted_key(path);
        if key.is_empty() {
            self.root.clone()
        } else {
            self.root.join(key)
        }
    }

    fn metadata(&self, path: &str) -> Result<Metadata, FsError> {
        fs::metadata(self.translate(path)).map_err(|e| map_io(path, e))
    }
}

impl VirtualFilesystem for OsFilesystem {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn isfile(&self, path: &str) -> bool {
        self.metadata(path).map(|m| m.is_file()).unwrap_or(false)
    }

    fn isdir(&self, path: &str) -> bool {
        self.metadata(path).map(|m| m.is_dir()).unwrap_or(false)
    }

    fn stat(&self, path: &str) -> Result<Stat, FsError> {
        let meta = self.metadata(path)?;
        let mtime = match meta.modified()?.duration_since(UNIX_EPOCH) {
            Ok(after) => after.as_secs() as i64,
            Err(before) => -(before.duration().as_secs() as i64),
        };
        Ok(Stat {
            size: if meta.is_dir() { 0 } else { meta.len() },
            mtime,
            mode: mode_bits(&meta),
        })
    }

    fn open(&self, path: &str) -> Result<FileReader, FsError> {
        let file = File::open(self.translate(path)).map_err(|e| map_io(path, e))?;
        Ok(Box::new(file))
    }

    fn listdir(&self, path: &str) -> Result<Vec<String>, FsError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.translate(path)).map_err(|e| map_io(path, e))? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn create(&self, path: &str, mode: WriteMode) -> Result<FileWriter, FsError> {
        let mut options = OpenOptions::new();
        options.create(true);
        match mode {
            WriteMode::Truncate => options.write(true).truncate(true),
            WriteMode::Append => options.append(true),
        };
        let file = options.open(self.translate(path)).map_err(|e| map_io(path, e))?;
        Ok(Box::new(file))
    }

    fn unlink(&self, path: &str) -> Result<(), FsError> {
        fs::remove_file(self.translate(path)).map_err(|e| map_io(path, e))
    }

    fn mkdir(&self, path: &str) -> Result<(), FsError> {
        fs::create_dir(self.translate(path)).map_err(|e| map_io(path, e))
    }

    fn rmdir(&self, path: &str) -> Result<(), FsError> {
        fs::remove_dir(self.translate(path)).map_err(|e| map_io(path, e))
    }
}

fn map_io(path: &str, err: io::Error) -> FsError {
    if err.kind() == io::ErrorKind::NotFound {
        FsError::NotFound(path.to_string())
    } else {
        FsError::Io(err)
    }
}

#[cfg(unix)]
fn mode_bits(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn mode_bits(meta: &Metadata) -> u32 {
    match (meta.is_dir(), meta.permissions().readonly()) {
        (true, _) => 0o040755,
        (false, true) => 0o100444,
        (false, false) => 0o100644,
    }
}
