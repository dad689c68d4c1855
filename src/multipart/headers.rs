//! Part header block parsing.
//!
//! A header block starts right after a delimiter line and ends with a blank
//! line. It is read byte by byte from the scanner so that no body bytes are
//! consumed, bounded by `max_header_size`.

use crate::io::ByteSource;

use super::error::{MultipartError, Result};
use super::scanner::BoundaryScanner;

/// Default cap on a single part's header block (10 KiB).
pub const DEFAULT_MAX_HEADER_SIZE: usize = 10 * 1024;

/// Blank-line terminator of a header block.
const HEADER_TERMINATOR: &[u8; 4] = b"\r\n\r\n";

pub const CONTENT_DISPOSITION: &str = "Content-Disposition";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const CONTENT_LENGTH: &str = "Content-Length";

/// Ordered, case-insensitive multi-map of part headers.
///
/// Names keep the case of their first occurrence; values keep insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartHeaders {
    entries: Vec<(String, Vec<String>)>,
}

impl PartHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, grouping it with earlier values of the same name.
    pub fn add(&mut self, name: &str, value: &str) {
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some((_, values)) => values.push(value.to_string()),
            None => self
                .entries
                .push((name.to_string(), vec![value.to_string()])),
        }
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    /// All values for `name`, in the order they appeared.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    /// Header names in first-seen order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// `(name, value)` pairs, grouped by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().flat_map(|(name, values)| {
            values
                .iter()
                .map(move |value| (name.as_str(), value.as_str()))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get(CONTENT_TYPE)
    }

    /// Declared `Content-Length` of the part, if present and numeric.
    pub fn content_length(&self) -> Option<u64> {
        self.get(CONTENT_LENGTH)
            .and_then(|value| value.trim().parse().ok())
    }

    /// Field name from a `form-data` disposition.
    pub fn field_name(&self) -> Option<String> {
        let params = HeaderParams::parse(self.get(CONTENT_DISPOSITION)?);
        if !params.main().eq_ignore_ascii_case("form-data") {
            return None;
        }
        params.get("name").map(|name| name.trim().to_string())
    }

    /// Undecoded file name from a `form-data` or `attachment` disposition.
    ///
    /// `filename*` (RFC 5987) wins over `filename` when both are present.
    pub(crate) fn raw_file_name(&self) -> Option<RawFileName> {
        let params = HeaderParams::parse(self.get(CONTENT_DISPOSITION)?);
        let kind = params.main();
        if !kind.eq_ignore_ascii_case("form-data") && !kind.eq_ignore_ascii_case("attachment") {
            return None;
        }

        if let Some(value) = params.get("filename*") {
            return Some(RawFileName {
                value: value.to_string(),
                extended: true,
            });
        }
        params.get("filename").map(|value| RawFileName {
            value: value.trim().to_string(),
            extended: false,
        })
    }
}

/// A `filename` parameter as it appeared on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawFileName {
    pub value: String,
    /// Came from `filename*` and needs RFC 5987 decoding
    pub extended: bool,
}

/// A header value split into its leading token and `;`-separated parameters.
///
/// Parameter names are lower-cased; quoted values lose their quotes but keep
/// backslashes, since browsers send raw Windows paths inside quotes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderParams {
    main: String,
    params: Vec<(String, String)>,
}

impl HeaderParams {
    pub fn parse(value: &str) -> Self {
        let mut segments = split_unquoted(value, b';').into_iter();
        let main = segments.next().unwrap_or_default().trim().to_string();

        let params = segments
            .filter_map(|segment| {
                let (name, value) = match segment.split_once('=') {
                    Some((name, value)) => (name, unquote(value.trim())),
                    None => (segment, ""),
                };
                let name = name.trim();
                (!name.is_empty()).then(|| (name.to_ascii_lowercase(), value.to_string()))
            })
            .collect();

        Self { main, params }
    }

    pub fn main(&self) -> &str {
        &self.main
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Extract the boundary from a request `Content-Type`.
///
/// # Errors
///
/// Returns [`MultipartError::InvalidContentType`] unless the type is
/// `multipart/*` with a non-empty `boundary` parameter.
pub fn boundary_from_content_type(content_type: &str) -> Result<Vec<u8>> {
    let params = HeaderParams::parse(content_type);
    if !params.main().to_ascii_lowercase().starts_with("multipart/") {
        return Err(MultipartError::InvalidContentType(format!(
            "expected multipart/*, got {:?}",
            content_type.trim()
        )));
    }

    match params.get("boundary") {
        Some(boundary) if !boundary.is_empty() => Ok(boundary.as_bytes().to_vec()),
        _ => Err(MultipartError::InvalidContentType(
            "missing boundary parameter".to_string(),
        )),
    }
}

/// Read the raw header block following a delimiter line.
///
/// The delimiter line's own CRLF counts toward the blank-line terminator, so a
/// part without headers ends its block after a single CRLF.
///
/// # Errors
///
/// Returns [`MultipartError::HeaderSizeLimit`] once the block grows past
/// `max_size`, and [`MultipartError::MalformedStream`] if the body ends first.
pub fn read_header_block<S: ByteSource>(
    scanner: &mut BoundaryScanner<S>,
    max_size: usize,
) -> Result<Vec<u8>> {
    let mut block = Vec::new();
    let mut matched = 2;

    while matched < HEADER_TERMINATOR.len() {
        let byte = scanner.read_byte()?;
        if block.len() >= max_size {
            return Err(MultipartError::HeaderSizeLimit {
                limit: max_size,
                actual: block.len() + 1,
            });
        }
        block.push(byte);

        matched = if byte == HEADER_TERMINATOR[matched] {
            matched + 1
        } else if byte == b'\r' {
            1
        } else {
            0
        };
    }

    Ok(block)
}

/// Parse a raw header block into [`PartHeaders`].
///
/// Continuation lines (leading space or tab) fold into the previous value;
/// lines without a colon are ignored.
pub fn parse_header_block(block: &[u8]) -> PartHeaders {
    let text = match std::str::from_utf8(block) {
        Ok(text) => text.to_string(),
        // Not UTF-8: map each byte to the code point of the same value.
        Err(_) => block.iter().map(|&b| char::from(b)).collect(),
    };

    let mut headers = PartHeaders::new();
    let mut pending: Option<(String, String)> = None;

    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            continue;
        }

        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = pending.as_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }

        if let Some((name, value)) = pending.take() {
            headers.add(&name, &value);
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if !name.is_empty() {
                pending = Some((name.to_string(), value.trim().to_string()));
            }
        }
    }

    if let Some((name, value)) = pending {
        headers.add(&name, &value);
    }
    headers
}

fn split_unquoted(value: &str, separator: u8) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut quoted = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, &b) in value.as_bytes().iter().enumerate() {
        if b == b'"' && !escaped {
            quoted = !quoted;
        } else if b == separator && !quoted {
            segments.push(&value[start..i]);
            start = i + 1;
        }
        escaped = !escaped && b == b'\\';
    }
    segments.push(&value[start..]);
    segments
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}
