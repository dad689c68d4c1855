//! # formsplit
//!
//! A streaming `multipart/form-data` decoder (RFC 1867/2388).
//!
//! The request body is read once, front to back, through a fixed-size window.
//! Parts can be consumed as raw streams, or drained into items that stay in
//! memory while small and move to a temp file once they pass a threshold.
//! Request size, part size, header size and part count limits are enforced
//! while reading.
//!
//! ## Features
//!
//! - Lazy, pull-based iteration over parts with bounded memory use
//! - Items spilled to uniquely named temp files, deleted on drop or shutdown
//! - Limits with precise errors, and a progress observer
//! - Nested `multipart/mixed` parts and RFC 5987 `filename*` parameters
//! - A CLI for captured request bodies (optionally gzip-compressed) and HTTP URLs
//!
//! ## Example
//!
//! ```no_run
//! use formsplit::{ItemFactory, LocalFileSource, MultipartConfig, parse_request};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = MultipartConfig::new()
//!         .memory_threshold(64 * 1024)
//!         .max_file_size(Some(10 * 1024 * 1024));
//!     let factory = ItemFactory::new(&config);
//!
//!     let source = LocalFileSource::open("request.bin".as_ref())?;
//!     let items = parse_request(
//!         source,
//!         "multipart/form-data; boundary=AaB03x",
//!         &config,
//!         &factory,
//!     )?;
//!     for item in &items {
//!         println!("{:?} {:?} {} bytes", item.field_name(), item.file_name(), item.size());
//!     }
//!
//!     factory.cleaner().shutdown();
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod io;
pub mod multipart;
pub mod store;
pub mod upload;

pub use cli::Cli;
pub use io::{ByteSource, HttpBodySource, LocalFileSource, ReaderSource};
pub use multipart::{MultipartConfig, MultipartError, MultipartReader, Part, PartHeaders};
pub use store::{FileCleaner, FileItem, ItemFactory};
pub use upload::{parse_parameter_map, parse_request};
