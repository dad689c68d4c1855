//! Error taxonomy for multipart decoding.

use std::io;

use thiserror::Error;

/// Errors raised while decoding a multipart body or materializing its items.
#[derive(Debug, Error)]
pub enum MultipartError {
    /// The request is not `multipart/*`, or carries no usable boundary.
    #[error("invalid multipart content type: {0}")]
    InvalidContentType(String),

    /// The session configuration cannot work (e.g. buffer too small for the boundary).
    #[error("invalid multipart configuration: {0}")]
    InvalidConfig(String),

    /// Boundary not found, or the body ended in the middle of a part.
    #[error("malformed multipart stream: {0}")]
    MalformedStream(String),

    /// A part's header block is larger than the configured maximum.
    #[error("part header block exceeds {limit} bytes (read {actual})")]
    HeaderSizeLimit { limit: usize, actual: usize },

    /// The request body is larger than the configured maximum.
    #[error("request size {actual} exceeds the configured maximum of {limit} bytes")]
    RequestSizeLimit { limit: u64, actual: u64 },

    /// A single part is larger than the configured maximum.
    #[error("field {field_name:?} has size {actual}, exceeding the configured maximum of {limit} bytes")]
    FileSizeLimit {
        field_name: Option<String>,
        file_name: Option<String>,
        actual: u64,
        limit: u64,
    },

    /// More parts than the configured maximum.
    #[error("request has more than {limit} parts")]
    PartCountLimit { limit: usize },

    /// The declared file name carries a NUL byte.
    #[error("invalid file name: {}", .name.replace('\0', "\\0"))]
    InvalidFileName { name: String },

    /// A header parameter could not be decoded.
    #[error("unsupported header encoding: {0}")]
    UnsupportedEncoding(String),

    /// `next_part` was called after the last part was handed out.
    #[error("no more parts in this multipart stream")]
    IterationExhausted,

    /// An earlier fatal error left the session unusable.
    #[error("multipart session was aborted by an earlier error")]
    SessionAborted,

    /// The temp-file registry no longer accepts new files.
    #[error("temp file repository has been shut down")]
    RepositoryClosed,

    /// Transport or filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),
}

/// Result type for multipart operations.
pub type Result<T> = std::result::Result<T, MultipartError>;

impl MultipartError {
    /// Whether the error leaves the parse session unusable.
    ///
    /// File size violations and bad file names only affect the current part.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::FileSizeLimit { .. }
                | Self::InvalidFileName { .. }
                | Self::UnsupportedEncoding(_)
                | Self::IterationExhausted
                | Self::RepositoryClosed
        )
    }
}

impl From<io::Error> for MultipartError {
    /// Unwraps errors that crossed a [`std::io::Read`] boundary back into their variant.
    fn from(err: io::Error) -> Self {
        match err.downcast::<MultipartError>() {
            Ok(inner) => inner,
            Err(err) => Self::Io(err),
        }
    }
}

impl From<MultipartError> for io::Error {
    fn from(err: MultipartError) -> Self {
        match err {
            MultipartError::Io(inner) => inner,
            other => io::Error::other(other),
        }
    }
}
