//! Lazy, single-pass iteration over the parts of a multipart body.
//!
//! ## States
//!
//! ```text
//! BeforeFirst ──advance──▶ Located ──next_part──▶ Current ──advance──▶ Located ...
//!                             │                                 │
//!                             └────────────▶ Exhausted ◀────────┘
//! any fatal error ──▶ Failed
//! ```
//!
//! `advance` is the only operation that moves the scanner between parts. A
//! [`Part`] mutably borrows its reader, so at most one part stream is live and
//! the borrow checker rejects calling `next_part` while one is held.

use std::io::{self, Read};
use std::mem;
use std::sync::Arc;

use crate::io::ByteSource;

use super::config::MultipartConfig;
use super::decode::HeaderDecoder;
use super::error::{MultipartError, Result};
use super::headers::{
    PartHeaders, RawFileName, boundary_from_content_type, parse_header_block, read_header_block,
};
use super::limits::{Accountant, MeteredSource, Progress};
use super::scanner::BoundaryScanner;

enum State {
    BeforeFirst,
    /// Headers of the next part are parsed; the part has not been handed out
    Located(LocatedPart),
    /// A part was handed out; its body may be partly unread
    Current,
    Exhausted,
    Failed,
}

struct LocatedPart {
    headers: PartHeaders,
    field_name: Option<String>,
    raw_file_name: Option<RawFileName>,
}

/// Pull-based multipart decoder.
///
/// ## Example
///
/// ```no_run
/// use std::io::Read;
/// use formsplit::{MultipartConfig, MultipartReader, ReaderSource};
///
/// # fn main() -> formsplit::multipart::Result<()> {
/// let body = std::fs::File::open("request.bin")?;
/// let mut reader = MultipartReader::from_content_type(
///     ReaderSource::new(body),
///     "multipart/form-data; boundary=AaB03x",
///     &MultipartConfig::default(),
/// )?;
///
/// while reader.has_next()? {
///     let mut part = reader.next_part()?;
///     let mut content = Vec::new();
///     part.read_to_end(&mut content)?;
///     println!("{:?}: {} bytes", part.field_name(), content.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct MultipartReader<S> {
    scanner: BoundaryScanner<MeteredSource<S>>,
    /// Boundary of the outermost body
    boundary: Vec<u8>,
    /// Field name of the enclosing `multipart/mixed` part, while inside one
    nested_field: Option<String>,
    skip_preamble: bool,
    state: State,
    max_file_size: Option<u64>,
    max_header_size: usize,
    decoder: Arc<dyn HeaderDecoder>,
}

impl<S: ByteSource> MultipartReader<S> {
    /// Create a reader for `boundary` (without its `--` prefix).
    ///
    /// # Errors
    ///
    /// Fails with [`MultipartError::InvalidConfig`] when the buffer is too
    /// small for the boundary, and with [`MultipartError::RequestSizeLimit`]
    /// when the source declares a length above `max_request_size`.
    pub fn new(source: S, boundary: &[u8], config: &MultipartConfig) -> Result<Self> {
        let accountant = Accountant::new(
            source.content_length(),
            config.get_max_request_size(),
            config.get_max_parts(),
            config.progress_listener(),
        )?;
        let scanner = BoundaryScanner::new(
            MeteredSource::new(source, accountant),
            boundary,
            config.get_buffer_size(),
        )?;

        Ok(Self {
            scanner,
            boundary: boundary.to_vec(),
            nested_field: None,
            skip_preamble: true,
            state: State::BeforeFirst,
            max_file_size: config.get_max_file_size(),
            max_header_size: config.get_max_header_size(),
            decoder: config.decoder(),
        })
    }

    /// Create a reader from the request's `Content-Type` header value.
    ///
    /// # Errors
    ///
    /// Fails with [`MultipartError::InvalidContentType`] before reading any
    /// byte if the type is not `multipart/*` or has no boundary.
    pub fn from_content_type(
        source: S,
        content_type: &str,
        config: &MultipartConfig,
    ) -> Result<Self> {
        let boundary = boundary_from_content_type(content_type)?;
        Self::new(source, &boundary, config)
    }

    /// Whether another part follows, locating it if needed.
    ///
    /// Any unread content of the previous part is discarded first.
    pub fn has_next(&mut self) -> Result<bool> {
        match self.state {
            State::Located(_) => Ok(true),
            State::Exhausted => Ok(false),
            State::Failed => Err(self.aborted()),
            State::BeforeFirst | State::Current => self.advance().map_err(|e| self.fail(e)),
        }
    }

    /// Hand out the next part.
    ///
    /// # Errors
    ///
    /// Returns [`MultipartError::IterationExhausted`] once the closing
    /// boundary has been consumed.
    pub fn next_part(&mut self) -> Result<Part<'_, S>> {
        if !self.has_next()? {
            return Err(MultipartError::IterationExhausted);
        }

        match mem::replace(&mut self.state, State::Current) {
            State::Located(located) => Ok(Part {
                headers: located.headers,
                field_name: located.field_name,
                raw_file_name: located.raw_file_name,
                bytes_read: 0,
                finished: false,
                reader: self,
            }),
            other => {
                self.state = other;
                Err(MultipartError::IterationExhausted)
            }
        }
    }

    /// Bytes read and parts seen so far.
    pub fn progress(&self) -> Progress {
        self.scanner.source().accountant().progress()
    }

    /// Boundary of the outermost body.
    pub fn boundary(&self) -> &[u8] {
        &self.boundary
    }

    /// Move the scanner to the next part and parse its headers.
    fn advance(&mut self) -> Result<bool> {
        if matches!(self.state, State::Current) {
            self.scanner.discard_body_data()?;
        }

        loop {
            let more = if mem::take(&mut self.skip_preamble) {
                self.scanner.find_first_boundary()?
            } else {
                self.scanner.read_boundary()?
            };

            if !more {
                if self.nested_field.take().is_some() {
                    // Inner body closed: skip its epilogue and resume the outer one.
                    self.scanner.set_boundary(&self.boundary)?;
                    self.scanner.discard_body_data()?;
                    continue;
                }
                tracing::debug!(parts = self.progress().items, "multipart stream exhausted");
                self.state = State::Exhausted;
                return Ok(false);
            }

            let block = read_header_block(&mut self.scanner, self.max_header_size)?;
            let headers = parse_header_block(&block);

            if self.nested_field.is_none() {
                if let Some((field_name, sub_boundary)) = nested_mixed(&headers)? {
                    tracing::debug!(field = %field_name, "entering nested multipart/mixed part");
                    self.scanner.set_boundary(&sub_boundary)?;
                    self.nested_field = Some(field_name);
                    self.skip_preamble = true;
                    continue;
                }
            }

            let raw_file_name = headers.raw_file_name();
            if self.nested_field.is_some() && raw_file_name.is_none() {
                // Inner parts of a file set only count when they carry a file.
                self.scanner.discard_body_data()?;
                continue;
            }
            let field_name = self.nested_field.clone().or_else(|| headers.field_name());
            self.scanner.source_mut().accountant_mut().note_item()?;

            tracing::debug!(
                field = ?field_name,
                file = ?raw_file_name.as_ref().map(|raw| raw.value.as_str()),
                "located multipart part"
            );
            self.state = State::Located(LocatedPart {
                headers,
                field_name,
                raw_file_name,
            });
            return Ok(true);
        }
    }

    /// Error for calls on a failed session. A request size violation is
    /// raised again as is; other failures become `SessionAborted`.
    fn aborted(&self) -> MultipartError {
        match self.scanner.source().accountant().check_active() {
            Err(err) => err,
            Ok(()) => MultipartError::SessionAborted,
        }
    }

    /// Poison the session on fatal errors; pass the error through.
    fn fail(&mut self, err: MultipartError) -> MultipartError {
        if err.is_fatal() {
            tracing::debug!(error = %err, "multipart session aborted");
            self.state = State::Failed;
        }
        err
    }
}

/// Field name and inner boundary of a `multipart/mixed` form-data part.
fn nested_mixed(headers: &PartHeaders) -> Result<Option<(String, Vec<u8>)>> {
    let Some(content_type) = headers.content_type() else {
        return Ok(None);
    };
    if !content_type
        .trim_start()
        .to_ascii_lowercase()
        .starts_with("multipart/mixed")
    {
        return Ok(None);
    }
    let Some(field_name) = headers.field_name() else {
        return Ok(None);
    };

    let boundary = boundary_from_content_type(content_type).map_err(|_| {
        MultipartError::MalformedStream(format!(
            "nested multipart part {field_name:?} has no boundary"
        ))
    })?;
    Ok(Some((field_name, boundary)))
}

/// One part of a multipart body.
///
/// The content is read straight from the request stream and can be read
/// only once. Dropping the part without reading it is fine: the reader skips
/// the rest when it advances.
pub struct Part<'a, S> {
    reader: &'a mut MultipartReader<S>,
    headers: PartHeaders,
    field_name: Option<String>,
    raw_file_name: Option<RawFileName>,
    bytes_read: u64,
    finished: bool,
}

impl<S: ByteSource> Part<'_, S> {
    pub fn headers(&self) -> &PartHeaders {
        &self.headers
    }

    /// Form field name; inside a `multipart/mixed` part, the enclosing field's.
    pub fn field_name(&self) -> Option<&str> {
        self.field_name.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.content_type()
    }

    /// True for plain form fields, false for file uploads.
    pub fn is_form_field(&self) -> bool {
        self.raw_file_name.is_none()
    }

    /// Decoded file name, or `None` for plain form fields.
    ///
    /// # Errors
    ///
    /// Returns [`MultipartError::InvalidFileName`] if the name contains a NUL
    /// byte and [`MultipartError::UnsupportedEncoding`] if it cannot be
    /// decoded. Neither affects the part's headers or content.
    pub fn file_name(&self) -> Result<Option<String>> {
        let Some(raw) = &self.raw_file_name else {
            return Ok(None);
        };

        let name = if raw.extended {
            self.reader.decoder.decode_extended(&raw.value)?
        } else {
            self.reader.decoder.decode_value(&raw.value)?
        };
        if name.contains('\0') {
            return Err(MultipartError::InvalidFileName { name });
        }
        Ok(Some(name))
    }

    /// Content bytes handed out so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Read the next chunk of content; 0 means the part is finished.
    ///
    /// # Errors
    ///
    /// Returns [`MultipartError::FileSizeLimit`] when the part outgrows
    /// `max_file_size`. The rest of the part is discarded first, so the
    /// reader can still move on to the next part.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        if matches!(self.reader.state, State::Failed) {
            return Err(self.reader.aborted());
        }
        if self.finished {
            return Ok(0);
        }

        if let Some(limit) = self.reader.max_file_size {
            if self.bytes_read == 0 {
                if let Some(declared) = self.headers.content_length().filter(|&d| d > limit) {
                    self.discard_rest()?;
                    return Err(self.size_error(declared, limit));
                }
            }
        }

        let n = self
            .reader
            .scanner
            .read_body_data(buf)
            .map_err(|e| self.reader.fail(e))?;
        if n == 0 {
            self.finished = true;
            return Ok(0);
        }

        let total = self.bytes_read + n as u64;
        if let Some(limit) = self.reader.max_file_size {
            if total > limit {
                let rest = self.discard_rest()?;
                return Err(self.size_error(total + rest, limit));
            }
        }

        self.bytes_read = total;
        Ok(n)
    }

    /// Discard the unread content, returning how many bytes were skipped.
    pub fn skip(&mut self) -> Result<u64> {
        if self.finished {
            return Ok(0);
        }
        self.discard_rest()
    }

    fn discard_rest(&mut self) -> Result<u64> {
        let skipped = self
            .reader
            .scanner
            .discard_body_data()
            .map_err(|e| self.reader.fail(e))?;
        self.finished = true;
        Ok(skipped)
    }

    fn size_error(&self, actual: u64, limit: u64) -> MultipartError {
        tracing::debug!(field = ?self.field_name, actual, limit, "part exceeds file size limit");
        MultipartError::FileSizeLimit {
            field_name: self.field_name.clone(),
            file_name: self.raw_file_name.as_ref().map(|raw| raw.value.clone()),
            actual,
            limit,
        }
    }
}

impl<S: ByteSource> Read for Part<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_chunk(buf).map_err(io::Error::from)
    }
}
