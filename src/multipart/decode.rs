//! Header parameter decoding seam.
//!
//! Charset conversion and RFC 2047 encoded words are left to the embedding
//! application; it plugs them in through [`HeaderDecoder`]. The default
//! decoder passes plain values through and understands only UTF-8 and
//! US-ASCII RFC 5987 extended values.

use super::error::{MultipartError, Result};

/// Decodes header parameter values the parser needs as text.
pub trait HeaderDecoder: Send + Sync {
    /// Decode a plain parameter value, e.g. `filename="..."`.
    fn decode_value(&self, raw: &str) -> Result<String> {
        Ok(raw.to_string())
    }

    /// Decode an RFC 5987 extended value, e.g. `filename*=UTF-8''...`.
    fn decode_extended(&self, raw: &str) -> Result<String> {
        decode_rfc5987(raw)
    }
}

/// The default [`HeaderDecoder`].
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughDecoder;

impl HeaderDecoder for PassthroughDecoder {}

/// Decode `charset'language'percent-encoded` for UTF-8 and US-ASCII.
///
/// # Errors
///
/// Returns [`MultipartError::UnsupportedEncoding`] for other charsets, bad
/// escapes, or bytes that are not valid in the declared charset.
pub fn decode_rfc5987(raw: &str) -> Result<String> {
    let mut pieces = raw.splitn(3, '\'');
    let (Some(charset), Some(_language), Some(encoded)) =
        (pieces.next(), pieces.next(), pieces.next())
    else {
        return Err(MultipartError::UnsupportedEncoding(format!(
            "malformed extended value {raw:?}"
        )));
    };

    let ascii_only = charset.eq_ignore_ascii_case("us-ascii");
    if !ascii_only && !charset.eq_ignore_ascii_case("utf-8") {
        return Err(MultipartError::UnsupportedEncoding(format!(
            "charset {charset:?} is not supported"
        )));
    }

    let bytes = percent_decode(encoded).ok_or_else(|| {
        MultipartError::UnsupportedEncoding(format!("bad percent escape in {encoded:?}"))
    })?;
    if ascii_only && !bytes.is_ascii() {
        return Err(MultipartError::UnsupportedEncoding(
            "non-ASCII byte in US-ASCII value".to_string(),
        ));
    }

    String::from_utf8(bytes).map_err(|_| {
        MultipartError::UnsupportedEncoding("invalid UTF-8 in extended value".to_string())
    })
}

fn percent_decode(encoded: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(encoded.len());
    let mut bytes = encoded.bytes();
    while let Some(b) = bytes.next() {
        if b == b'%' {
            let hi = char::from(bytes.next()?).to_digit(16)?;
            let lo = char::from(bytes.next()?).to_digit(16)?;
            out.push((hi * 16 + lo) as u8);
        } else {
            out.push(b);
        }
    }
    Some(out)
}
