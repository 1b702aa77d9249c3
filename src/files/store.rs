//! File stores: one static handler per configured root.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::files::handler::{DeliveryCounters, StaticFileHandler, DEFAULT_INDEX_FILES};
use crate::http::date::DateCodec;
use crate::http::{status, Request};
use crate::vfs::{ArchiveFilesystem, FsError, OsFilesystem, VirtualFilesystem};

/// Ordered set of roots served under one context.
///
/// Roots are tried in the order they were added; the first whose handler
/// can serve the path answers the request.
#[derive(Debug)]
pub struct FileStore {
    handlers: Vec<StaticFileHandler>,
    roots: Vec<PathBuf>,
    index_files: Vec<String>,
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FileStore {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            roots: Vec::new(),
            index_files: DEFAULT_INDEX_FILES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Index names for roots added after this call.
    pub fn with_index_files(mut self, names: Vec<String>) -> Self {
        self.index_files = names;
        self
    }

    /// Add a directory, or a zip archive when the path ends in `.zip`.
    pub fn add_root(&mut self, path: impl AsRef<Path>) -> Result<&mut Self, FsError> {
        let path = path.as_ref();
        let is_zip = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("zip"));
        let filesystem: Arc<dyn VirtualFilesystem> = if is_zip {
            Arc::new(ArchiveFilesystem::open_archive(path)?)
        } else {
            Arc::new(OsFilesystem::new(path))
        };
        self.roots.push(path.to_path_buf());
        Ok(self.add_filesystem(filesystem))
    }

    pub fn add_filesystem(&mut self, filesystem: Arc<dyn VirtualFilesystem>) -> &mut Self {
        tracing::debug!(fs = %filesystem.describe(), "File store root added");
        let handler = StaticFileHandler::new(filesystem).with_index_files(self.index_files.clone());
        self.handlers.push(handler);
        self
    }

    /// First root added by path, if any.
    pub fn primary_root(&self) -> Option<PathBuf> {
        self.roots.first().cloned()
    }

    pub fn handlers(&self) -> &[StaticFileHandler] {
        &self.handlers
    }

    /// Summed delivery counters over all roots.
    pub fn counters(&self) -> DeliveryCounters {
        self.handlers.iter().map(StaticFileHandler::counters).fold(
            DeliveryCounters::default(),
            |acc, c| DeliveryCounters {
                hits: acc.hits + c.hits,
                files: acc.files + c.files,
                cache: acc.cache + c.cache,
            },
        )
    }

    pub fn handle(&self, req: &mut Request, dates: &DateCodec) {
        match self.handlers.iter().find(|h| h.can_handle(req)) {
            Some(handler) => handler.handle_request(req, dates),
            None => {
                tracing::debug!(path = %req.path, "No file store root has the path");
                req.error(status::NOT_FOUND);
            }
        }
    }
}
