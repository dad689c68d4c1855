//! Streaming `multipart/form-data` decoding.
//!
//! The decoder reads a request body once, front to back, through a fixed-size
//! window. Parts are handed out one at a time and their content is streamed
//! from the same window, so memory use does not depend on the body size.
//!
//! ## Architecture
//!
//! - `scanner`: boundary detection over the read-ahead window
//! - `headers`: header block reading and parameter parsing
//! - `reader`: the part iteration state machine
//! - `limits`: request/part accounting and progress reporting
//! - `decode`: pluggable decoding of file name parameters
//!
//! ## Wire format
//!
//! ```text
//! preamble
//! --boundary CRLF
//! headers CRLF
//! CRLF
//! content
//! CRLF --boundary CRLF
//! ...
//! CRLF --boundary-- epilogue
//! ```
//!
//! A part whose `Content-Type` is `multipart/mixed` is entered transparently:
//! its inner parts that carry a file name are yielded under the enclosing
//! field name.

mod config;
mod decode;
mod error;
mod headers;
mod limits;
mod reader;
mod scanner;

pub use config::{DEFAULT_MEMORY_THRESHOLD, MultipartConfig};
pub use decode::{HeaderDecoder, PassthroughDecoder, decode_rfc5987};
pub use error::{MultipartError, Result};
pub use headers::{
    CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, DEFAULT_MAX_HEADER_SIZE, HeaderParams,
    PartHeaders, boundary_from_content_type, parse_header_block, read_header_block,
};
pub use limits::{Progress, ProgressListener};
pub use reader::{MultipartReader, Part};
pub use scanner::{BoundaryScanner, DEFAULT_BUFFER_SIZE};
