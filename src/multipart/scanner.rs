//! Boundary-seeking reader over a forward-only byte source.
//!
//! The scanner owns a fixed-size window over the source. Body data is handed
//! out up to, but never including, the next `CRLF--boundary` delimiter.
//!
//! ## Buffer Layout
//!
//! ```text
//! 0        head                 tail        capacity
//! |consumed|   unread input     |   free    |
//! ```
//!
//! When no delimiter is visible, the last `len(delimiter)` unread bytes are
//! held back as a pad: they may be the start of a delimiter that continues past
//! `tail`. A refill first shifts the unread bytes to offset 0, then reads into
//! the free space, then searches again.

use memchr::memmem;

use crate::io::ByteSource;

use super::error::{MultipartError, Result};

/// Default window size in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// `CRLF` plus the two dashes that open every delimiter.
const DELIMITER_PREFIX: &[u8] = b"\r\n--";

/// Streaming boundary scanner.
///
/// ## Usage
///
/// Typically driven by [`MultipartReader`](super::MultipartReader) rather than
/// directly:
///
/// ```ignore
/// let mut scanner = BoundaryScanner::new(source, b"xyz", 4096)?;
/// let mut more = scanner.find_first_boundary()?;
/// while more {
///     let headers = read_header_block(&mut scanner, 10240)?;
///     scanner.discard_body_data()?;
///     more = scanner.read_boundary()?;
/// }
/// ```
#[derive(Debug)]
pub struct BoundaryScanner<S> {
    /// The underlying data source
    source: S,
    /// Read-ahead window
    buffer: Box<[u8]>,
    /// First unread byte in `buffer`
    head: usize,
    /// One past the last valid byte in `buffer`
    tail: usize,
    /// `CRLF--boundary`
    delimiter: Vec<u8>,
    /// 2 while looking for the first delimiter, which needs no leading CRLF
    delimiter_start: usize,
    /// Set when the last delimiter read was the closing `--boundary--`
    last_boundary: bool,
}

impl<S: ByteSource> BoundaryScanner<S> {
    /// Create a scanner for `boundary` (without its `--` prefix).
    ///
    /// # Errors
    ///
    /// Returns [`MultipartError::InvalidConfig`] if the boundary is empty or
    /// the buffer cannot hold `len(boundary) + 4` bytes plus one byte of data.
    pub fn new(source: S, boundary: &[u8], buffer_size: usize) -> Result<Self> {
        let delimiter = build_delimiter(boundary, buffer_size)?;
        Ok(Self {
            source,
            buffer: vec![0u8; buffer_size].into_boxed_slice(),
            head: 0,
            tail: 0,
            delimiter,
            delimiter_start: 0,
            last_boundary: false,
        })
    }

    /// Switch to a different boundary, keeping any buffered input.
    ///
    /// Used when entering and leaving a nested `multipart/mixed` body.
    pub fn set_boundary(&mut self, boundary: &[u8]) -> Result<()> {
        self.delimiter = build_delimiter(boundary, self.buffer.len())?;
        Ok(())
    }

    /// The boundary currently searched for, without prefix.
    pub fn boundary(&self) -> &[u8] {
        &self.delimiter[DELIMITER_PREFIX.len()..]
    }

    /// Skip the preamble and consume the first delimiter line.
    ///
    /// The first delimiter may start at offset 0, so it is matched without the
    /// leading CRLF. Returns `true` if a part follows, `false` if the first
    /// delimiter is already the closing one.
    ///
    /// # Errors
    ///
    /// Returns [`MultipartError::MalformedStream`] if the source ends before a
    /// delimiter is found.
    pub fn find_first_boundary(&mut self) -> Result<bool> {
        self.delimiter_start = 2;
        let found = match self.discard_body_data() {
            Ok(skipped) => {
                if skipped > 0 {
                    tracing::trace!(skipped, "skipped multipart preamble");
                }
                self.read_boundary()
            }
            Err(MultipartError::MalformedStream(_)) => Err(MultipartError::MalformedStream(
                format!(
                    "boundary {:?} not found in request body",
                    String::from_utf8_lossy(self.boundary())
                ),
            )),
            Err(other) => Err(other),
        };
        self.delimiter_start = 0;
        found
    }

    /// Consume the delimiter at the current position and the two bytes after it.
    ///
    /// Returns `true` when another part follows (`CRLF`), `false` when the
    /// delimiter closes the stream (`--`).
    pub fn read_boundary(&mut self) -> Result<bool> {
        let pattern_len = self.delimiter.len() - self.delimiter_start;
        if !self.buffer[self.head..self.tail].starts_with(self.pattern()) {
            return Err(MultipartError::MalformedStream(
                "expected a boundary at the current position".to_string(),
            ));
        }
        self.head += pattern_len;

        match [self.read_byte()?, self.read_byte()?] {
            [b'\r', b'\n'] => {
                self.last_boundary = false;
                Ok(true)
            }
            [b'-', b'-'] => {
                self.last_boundary = true;
                Ok(false)
            }
            _ => Err(MultipartError::MalformedStream(
                "unexpected characters follow a boundary".to_string(),
            )),
        }
    }

    /// Whether the delimiter consumed last was the closing one.
    pub fn is_last_boundary(&self) -> bool {
        self.last_boundary
    }

    /// Copy body bytes preceding the next delimiter into `dst`.
    ///
    /// Returns 0 exactly when the delimiter is next (or `dst` is empty).
    ///
    /// # Errors
    ///
    /// Returns [`MultipartError::MalformedStream`] if the source ends before the
    /// delimiter shows up.
    pub fn read_body_data(&mut self, dst: &mut [u8]) -> Result<usize> {
        if dst.is_empty() {
            return Ok(0);
        }

        loop {
            let (available, at_delimiter) = self.available();
            if available > 0 {
                let n = available.min(dst.len());
                dst[..n].copy_from_slice(&self.buffer[self.head..self.head + n]);
                self.head += n;
                return Ok(n);
            }
            if at_delimiter {
                return Ok(0);
            }
            self.refill()?;
        }
    }

    /// Skip body bytes up to the next delimiter, returning how many were skipped.
    pub fn discard_body_data(&mut self) -> Result<u64> {
        let mut discarded = 0u64;
        loop {
            let (available, at_delimiter) = self.available();
            self.head += available;
            discarded += available as u64;
            if at_delimiter {
                return Ok(discarded);
            }
            self.refill()?;
        }
    }

    /// Read one byte, refilling the window when empty.
    pub(crate) fn read_byte(&mut self) -> Result<u8> {
        if self.head == self.tail && self.fill()? == 0 {
            return Err(MultipartError::MalformedStream(
                "no more data is available".to_string(),
            ));
        }
        let byte = self.buffer[self.head];
        self.head += 1;
        Ok(byte)
    }

    pub(crate) fn source(&self) -> &S {
        &self.source
    }

    pub(crate) fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    fn pattern(&self) -> &[u8] {
        &self.delimiter[self.delimiter_start..]
    }

    /// Bytes that can be handed out now, and whether a delimiter ends them.
    fn available(&self) -> (usize, bool) {
        let window = &self.buffer[self.head..self.tail];
        match memmem::find(window, self.pattern()) {
            Some(offset) => (offset, true),
            None => {
                let pad = window.len().min(self.pattern().len());
                (window.len() - pad, false)
            }
        }
    }

    /// Compact and read more input while a delimiter may still be pending.
    fn refill(&mut self) -> Result<()> {
        if self.fill()? == 0 {
            return Err(MultipartError::MalformedStream(
                "stream ended unexpectedly".to_string(),
            ));
        }
        Ok(())
    }

    /// Shift unread bytes to offset 0 and read into the free space.
    fn fill(&mut self) -> Result<usize> {
        if self.head > 0 {
            self.buffer.copy_within(self.head..self.tail, 0);
            self.tail -= self.head;
            self.head = 0;
        }

        let n = self.source.read(&mut self.buffer[self.tail..])?;
        self.tail += n;
        tracing::trace!(read = n, buffered = self.tail, "refilled multipart window");
        Ok(n)
    }
}

fn build_delimiter(boundary: &[u8], buffer_size: usize) -> Result<Vec<u8>> {
    if boundary.is_empty() {
        return Err(MultipartError::InvalidConfig(
            "boundary must not be empty".to_string(),
        ));
    }

    let delimiter_len = boundary.len() + DELIMITER_PREFIX.len();
    if buffer_size <= delimiter_len {
        return Err(MultipartError::InvalidConfig(format!(
            "buffer size {buffer_size} must exceed boundary length + 4 ({delimiter_len})"
        )));
    }

    let mut delimiter = Vec::with_capacity(delimiter_len);
    delimiter.extend_from_slice(DELIMITER_PREFIX);
    delimiter.extend_from_slice(boundary);
    Ok(delimiter)
}
