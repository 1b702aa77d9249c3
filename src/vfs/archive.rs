//! Zip-archive-backed filesystem.
//!
//! # Design Decisions
//! - The entry index is built once when the archive is opened
//! - `open()` is lazy: the entry is inflated into memory under `read_lock`
//!   on the first read, since the zip reader is positioned and cannot serve
//!   two reads at once
//! - Directories without an explicit entry are synthesized from file paths
//! - Mutation is not supported

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use zip::ZipArchive;

use super::{rooted_key, FileReader, FsError, Stat, VirtualFilesystem};

const DIR_MODE: u32 = 0o040755;
const FILE_MODE: u32 = 0o100644;

#[derive(Debug, Clone, Copy)]
struct ArchiveEntry {
    index: usize,
    stat: Stat,
}

/// Read-only filesystem over the contents of a zip file.
pub struct ArchiveFilesystem {
    source: PathBuf,
    files: HashMap<String, ArchiveEntry>,
    directories: BTreeSet<String>,
    read_lock: Arc<Mutex<ZipArchive<File>>>,
}

impl ArchiveFilesystem {
    /// Open `path` and index every entry.
    pub fn open_archive(path: impl AsRef<Path>) -> Result<Self, FsError> {
        let source = path.as_ref().to_path_buf();
        let file = File::open(&source)?;
        let mut archive = ZipArchive::new(file).map_err(archive_error)?;

        let mut files = HashMap::new();
        let mut directories = BTreeSet::new();
        directories.insert(String::new());

        for index in 0..archive.len() {
            let entry = archive.by_index(index).map_err(archive_error)?;
            let key = rooted_key(entry.name());
            if key.is_empty() {
                continue;
            }

            add_parents(&mut directories, &key);
            if entry.is_dir() {
                directories.insert(key);
                continue;
            }

            let stat = Stat {
                size: entry.size(),
                mtime: zip_mtime(entry.last_modified()),
                mode: entry.unix_mode().unwrap_or(FILE_MODE),
            };
            files.insert(key, ArchiveEntry { index, stat });
        }

        tracing::debug!(
            archive = %source.display(),
            files = files.len(),
            directories = directories.len(),
            "Archive indexed"
        );

        Ok(Self {
            source,
            files,
            directories,
            read_lock: Arc::new(Mutex::new(archive)),
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

impl std::fmt::Debug for ArchiveFilesystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveFilesystem")
            .field("source", &self.source)
            .field("files", &self.files.len())
            .finish()
    }
}

impl VirtualFilesystem for ArchiveFilesystem {
    fn describe(&self) -> String {
        format!("zip:{}", self.source.display())
    }

    fn isfile(&self, path: &str) -> bool {
        self.files.contains_key(&rooted_key(path))
    }

    fn isdir(&self, path: &str) -> bool {
        self.directories.contains(&rooted_key(path))
    }

    fn stat(&self, path: &str) -> Result<Stat, FsError> {
        let key = rooted_key(path);
        if let Some(entry) = self.files.get(&key) {
            return Ok(entry.stat);
        }
        if self.directories.contains(&key) {
            return Ok(Stat { size: 0, mtime: 0, mode: DIR_MODE });
        }
        Err(FsError::NotFound(path.to_string()))
    }

    fn open(&self, path: &str) -> Result<FileReader, FsError> {
        let entry = self
            .files
            .get(&rooted_key(path))
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;

        Ok(Box::new(EntryReader {
            archive: Arc::clone(&self.read_lock),
            index: entry.index,
            size: entry.stat.size,
            inflated: None,
        }))
    }

    fn listdir(&self, path: &str) -> Result<Vec<String>, FsError> {
        let key = rooted_key(path);
        if !self.directories.contains(&key) {
            return Err(FsError::NotFound(path.to_string()));
        }
        let prefix = if key.is_empty() { String::new() } else { format!("{}/", key) };

        let mut names: BTreeSet<String> = BTreeSet::new();
        let candidates = self.files.keys().chain(self.directories.iter());
        for candidate in candidates {
            if let Some(rest) = candidate.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    names.insert(rest.to_string());
                }
            }
        }
        Ok(names.into_iter().collect())
    }
}

/// One archive entry, inflated on the first read.
struct EntryReader {
    archive: Arc<Mutex<ZipArchive<File>>>,
    index: usize,
    size: u64,
    inflated: Option<Cursor<Vec<u8>>>,
}

impl EntryReader {
    fn inflate(&self) -> io::Result<Vec<u8>> {
        let mut archive = self.archive.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut file = archive
            .by_index(self.index)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let mut buf = Vec::with_capacity(self.size as usize);
        file.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl Read for EntryReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.inflated.is_none() {
            self.inflated = Some(Cursor::new(self.inflate()?));
        }
        match self.inflated.as_mut() {
            Some(cursor) => cursor.read(out),
            None => Ok(0),
        }
    }
}

fn add_parents(directories: &mut BTreeSet<String>, key: &str) {
    let mut end = 0;
    while let Some(pos) = key[end..].find('/') {
        end += pos;
        directories.insert(key[..end].to_string());
        end += 1;
    }
}

fn zip_mtime(dt: zip::DateTime) -> i64 {
    NaiveDate::from_ymd_opt(i32::from(dt.year()), u32::from(dt.month()), u32::from(dt.day()))
        .and_then(|date| {
            date.and_hms_opt(u32::from(dt.hour()), u32::from(dt.minute()), u32::from(dt.second()))
        })
        .map(|naive| naive.and_utc().timestamp())
        .unwrap_or(0)
}

fn archive_error(err: zip::result::ZipError) -> FsError {
    FsError::Archive(err.to_string())
}
