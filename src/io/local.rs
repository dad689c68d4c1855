use super::ByteSource;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

/// Captured request body on the local filesystem
///
/// Files ending in `.gz` are decompressed on the fly; their declared length is
/// unknown since only the compressed size is on disk.
pub struct LocalFileSource {
    reader: BufReader<Box<dyn Read + Send>>,
    size: Option<u64>,
}

impl LocalFileSource {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let gzipped = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));

        let (inner, size): (Box<dyn Read + Send>, _) = if gzipped {
            (Box::new(GzDecoder::new(file)), None)
        } else {
            let size = file.metadata()?.len();
            (Box::new(file), Some(size))
        };

        Ok(Self {
            reader: BufReader::new(inner),
            size,
        })
    }

    /// Guess the boundary from the first line of the body, without consuming it
    ///
    /// Returns `None` unless the body starts with `--boundary` followed by a line break.
    pub fn sniff_boundary(&mut self) -> io::Result<Option<Vec<u8>>> {
        let head = self.reader.fill_buf()?;
        Ok(boundary_from_first_line(head))
    }
}

impl ByteSource for LocalFileSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }

    fn content_length(&self) -> Option<u64> {
        self.size
    }
}

pub(crate) fn boundary_from_first_line(head: &[u8]) -> Option<Vec<u8>> {
    let line_end = memchr::memchr(b'\n', head)?;
    let line = head[..line_end].strip_suffix(b"\r").unwrap_or(&head[..line_end]);
    let boundary = line.strip_prefix(b"--")?;
    if boundary.is_empty() || boundary.iter().any(|b| b.is_ascii_whitespace()) {
        return None;
    }
    Some(boundary.to_vec())
}
