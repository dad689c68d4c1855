//! Materialized parts.

use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};
use std::path::{Path, PathBuf};

use crate::io::ByteSource;
use crate::multipart::{HeaderParams, MultipartConfig, MultipartError, Part, PartHeaders, Result};

use super::cleaner::{FileCleaner, TempFile};
use super::deferred::{Contents, DeferredOutput};

/// Chunk size used when draining a part into an item.
const COPY_BUFFER_SIZE: usize = 8 * 1024;

/// Creates [`FileItem`]s from parts, all sharing one temp directory and cleaner.
#[derive(Debug, Clone)]
pub struct ItemFactory {
    threshold: usize,
    repository: PathBuf,
    cleaner: FileCleaner,
}

impl ItemFactory {
    /// Factory with the config's threshold and repository and a fresh cleaner.
    pub fn new(config: &MultipartConfig) -> Self {
        Self::with_cleaner(config, FileCleaner::new())
    }

    /// Factory that registers its temp files with an existing cleaner.
    pub fn with_cleaner(config: &MultipartConfig, cleaner: FileCleaner) -> Self {
        Self {
            threshold: config.get_memory_threshold(),
            repository: config.get_repository().to_path_buf(),
            cleaner,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn repository(&self) -> &Path {
        &self.repository
    }

    pub fn cleaner(&self) -> &FileCleaner {
        &self.cleaner
    }

    /// Drain `part` into a new item.
    ///
    /// # Errors
    ///
    /// Fails with whatever reading the part raises (notably
    /// [`MultipartError::FileSizeLimit`], after which the part has been
    /// discarded) and with I/O errors from the temp file. A temp file created
    /// for a failed drain is deleted before returning.
    pub fn create_item<S: ByteSource>(&self, part: &mut Part<'_, S>) -> Result<FileItem> {
        let file_name = part.file_name()?;
        let mut output =
            DeferredOutput::new(self.threshold, self.repository.clone(), self.cleaner.clone());

        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let n = part.read_chunk(&mut buf)?;
            if n == 0 {
                break;
            }
            output.write(&buf[..n])?;
        }

        let size = output.written();
        let storage = match output.finish()? {
            Contents::Memory(bytes) => Storage::Memory(bytes),
            Contents::Disk(temp) => Storage::Temp(temp),
        };

        Ok(FileItem {
            field_name: part.field_name().map(str::to_string),
            file_name,
            form_field: part.is_form_field(),
            headers: part.headers().clone(),
            size,
            storage,
        })
    }
}

#[derive(Debug)]
enum Storage {
    Memory(Vec<u8>),
    Temp(TempFile),
    /// Moved out of the repository by [`FileItem::write_to`]
    Stored(PathBuf),
    Deleted,
}

/// A form field or uploaded file whose content has been fully read.
///
/// Small items live in memory; larger ones in a temp file that is removed
/// when the item is deleted or dropped.
#[derive(Debug)]
pub struct FileItem {
    field_name: Option<String>,
    file_name: Option<String>,
    form_field: bool,
    headers: PartHeaders,
    size: u64,
    storage: Storage,
}

impl FileItem {
    pub fn field_name(&self) -> Option<&str> {
        self.field_name.as_deref()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.content_type()
    }

    pub fn headers(&self) -> &PartHeaders {
        &self.headers
    }

    pub fn is_form_field(&self) -> bool {
        self.form_field
    }

    /// Content length in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self.storage, Storage::Memory(_))
    }

    /// Backing file, for items that are not in memory.
    pub fn store_location(&self) -> Option<&Path> {
        match &self.storage {
            Storage::Temp(temp) => Some(temp.path()),
            Storage::Stored(path) => Some(path),
            Storage::Memory(_) | Storage::Deleted => None,
        }
    }

    /// The full content.
    pub fn get(&self) -> Result<Vec<u8>> {
        match &self.storage {
            Storage::Memory(bytes) => Ok(bytes.clone()),
            _ => {
                let mut content = Vec::with_capacity(usize::try_from(self.size).unwrap_or(0));
                self.open()?.read_to_end(&mut content)?;
                Ok(content)
            }
        }
    }

    /// Stream the content.
    pub fn open(&self) -> Result<Box<dyn Read + '_>> {
        match &self.storage {
            Storage::Memory(bytes) => Ok(Box::new(Cursor::new(bytes.as_slice()))),
            Storage::Temp(temp) => Ok(Box::new(BufReader::new(File::open(temp.path())?))),
            Storage::Stored(path) => Ok(Box::new(BufReader::new(File::open(path)?))),
            Storage::Deleted => Err(deleted()),
        }
    }

    /// The content as text, using the `charset` of the content type.
    ///
    /// ISO-8859-1 and US-ASCII are mapped byte for byte; anything else is
    /// read as UTF-8 with invalid sequences replaced.
    pub fn string(&self) -> Result<String> {
        let content = self.get()?;
        let charset = self
            .content_type()
            .map(HeaderParams::parse)
            .and_then(|params| params.get("charset").map(str::to_ascii_lowercase));

        match charset.as_deref() {
            Some("iso-8859-1" | "latin1" | "us-ascii") => {
                Ok(content.iter().map(|&b| char::from(b)).collect())
            }
            _ => Ok(String::from_utf8_lossy(&content).into_owned()),
        }
    }

    /// Write the content to `dest`.
    ///
    /// A temp file is renamed into place when possible (copied otherwise), and
    /// the item then reads from `dest`.
    pub fn write_to(&mut self, dest: &Path) -> Result<()> {
        match &mut self.storage {
            Storage::Memory(bytes) => std::fs::write(dest, bytes)?,
            Storage::Temp(temp) => {
                temp.persist(dest)?;
                self.storage = Storage::Stored(dest.to_path_buf());
            }
            Storage::Stored(path) if path.as_path() != dest => {
                std::fs::copy(path.as_path(), dest)?;
            }
            Storage::Stored(_) => {}
            Storage::Deleted => return Err(deleted()),
        }
        Ok(())
    }

    /// Remove the temp file, if any. Safe to call repeatedly.
    ///
    /// Files already moved out by [`FileItem::write_to`] are left alone.
    pub fn delete(&mut self) {
        if let Storage::Temp(temp) = &mut self.storage {
            temp.delete();
            self.storage = Storage::Deleted;
        }
    }
}

fn deleted() -> MultipartError {
    MultipartError::Io(io::Error::new(
        io::ErrorKind::NotFound,
        "item content was deleted",
    ))
}
