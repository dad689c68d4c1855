//! Per-session configuration.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::decode::{HeaderDecoder, PassthroughDecoder};
use super::headers::DEFAULT_MAX_HEADER_SIZE;
use super::limits::ProgressListener;
use super::scanner::DEFAULT_BUFFER_SIZE;

/// Default size above which items spill to a temp file (10 KiB).
pub const DEFAULT_MEMORY_THRESHOLD: usize = 10 * 1024;

/// Configuration for one multipart parse session.
///
/// Limits left unset are unbounded.
#[derive(Clone)]
pub struct MultipartConfig {
    buffer_size: usize,
    memory_threshold: usize,
    repository: PathBuf,
    max_request_size: Option<u64>,
    max_file_size: Option<u64>,
    max_header_size: usize,
    max_parts: Option<usize>,
    progress: Option<Arc<dyn ProgressListener>>,
    header_decoder: Arc<dyn HeaderDecoder>,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            memory_threshold: DEFAULT_MEMORY_THRESHOLD,
            repository: std::env::temp_dir(),
            max_request_size: None,
            max_file_size: None,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            max_parts: None,
            progress: None,
            header_decoder: Arc::new(PassthroughDecoder),
        }
    }
}

impl fmt::Debug for MultipartConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipartConfig")
            .field("buffer_size", &self.buffer_size)
            .field("memory_threshold", &self.memory_threshold)
            .field("repository", &self.repository)
            .field("max_request_size", &self.max_request_size)
            .field("max_file_size", &self.max_file_size)
            .field("max_header_size", &self.max_header_size)
            .field("max_parts", &self.max_parts)
            .field("progress", &self.progress.is_some())
            .finish_non_exhaustive()
    }
}

impl MultipartConfig {
    /// Create a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Size of the scanner's read-ahead window; must exceed boundary length + 4.
    #[must_use]
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Items larger than this many bytes are stored in a temp file.
    #[must_use]
    pub fn memory_threshold(mut self, size: usize) -> Self {
        self.memory_threshold = size;
        self
    }

    /// Directory that receives temp files.
    #[must_use]
    pub fn repository(mut self, dir: impl Into<PathBuf>) -> Self {
        self.repository = dir.into();
        self
    }

    #[must_use]
    pub fn max_request_size(mut self, size: Option<u64>) -> Self {
        self.max_request_size = size;
        self
    }

    #[must_use]
    pub fn max_file_size(mut self, size: Option<u64>) -> Self {
        self.max_file_size = size;
        self
    }

    #[must_use]
    pub fn max_header_size(mut self, size: usize) -> Self {
        self.max_header_size = size;
        self
    }

    #[must_use]
    pub fn max_parts(mut self, count: Option<usize>) -> Self {
        self.max_parts = count;
        self
    }

    /// Observer called after every read from the source and on every new part.
    #[must_use]
    pub fn progress(mut self, listener: impl ProgressListener + 'static) -> Self {
        self.progress = Some(Arc::new(listener));
        self
    }

    /// Decoder used for `filename` parameters.
    #[must_use]
    pub fn header_decoder(mut self, decoder: impl HeaderDecoder + 'static) -> Self {
        self.header_decoder = Arc::new(decoder);
        self
    }

    pub fn get_buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn get_memory_threshold(&self) -> usize {
        self.memory_threshold
    }

    pub fn get_repository(&self) -> &Path {
        &self.repository
    }

    pub fn get_max_request_size(&self) -> Option<u64> {
        self.max_request_size
    }

    pub fn get_max_file_size(&self) -> Option<u64> {
        self.max_file_size
    }

    pub fn get_max_header_size(&self) -> usize {
        self.max_header_size
    }

    pub fn get_max_parts(&self) -> Option<usize> {
        self.max_parts
    }

    pub(crate) fn progress_listener(&self) -> Option<Arc<dyn ProgressListener>> {
        self.progress.clone()
    }

    pub(crate) fn decoder(&self) -> Arc<dyn HeaderDecoder> {
        self.header_decoder.clone()
    }
}
