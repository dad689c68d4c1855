mod http;
mod local;

pub use http::HttpBodySource;
pub use local::LocalFileSource;

use std::io::{self, Read};

/// Trait for forward-only reading of a request body
pub trait ByteSource {
    /// Read up to `buf.len()` bytes into the buffer; `Ok(0)` marks the end of the body
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Body length declared by the transport, if any
    fn content_length(&self) -> Option<u64> {
        None
    }
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn content_length(&self) -> Option<u64> {
        (**self).content_length()
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn content_length(&self) -> Option<u64> {
        (**self).content_length()
    }
}

/// Adapts any [`Read`] implementation into a [`ByteSource`]
pub struct ReaderSource<R> {
    inner: R,
    content_length: Option<u64>,
}

impl<R: Read> ReaderSource<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            content_length: None,
        }
    }

    /// Attach the length declared by the transport (e.g. a `Content-Length` header)
    pub fn with_content_length(mut self, length: u64) -> Self {
        self.content_length = Some(length);
        self
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> ByteSource for ReaderSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.inner.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    fn content_length(&self) -> Option<u64> {
        self.content_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_source_reports_declared_length() {
        let source = ReaderSource::new(&b"abc"[..]).with_content_length(3);
        assert_eq!(source.content_length(), Some(3));

        let source = ReaderSource::new(&b"abc"[..]);
        assert_eq!(source.content_length(), None);
    }

    #[test]
    fn test_reader_source_reads_until_end() {
        let mut source = ReaderSource::new(&b"abc"[..]);
        let mut buf = [0u8; 8];
        assert_eq!(source.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(source.read(&mut buf).unwrap(), 0);
    }
}
