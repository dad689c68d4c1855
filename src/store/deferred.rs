//! Output that stays in memory up to a threshold, then moves to a temp file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use crate::multipart::Result;

use super::cleaner::{FileCleaner, TempFile};

/// Where a finished output ended up.
pub(crate) enum Contents {
    Memory(Vec<u8>),
    Disk(TempFile),
}

/// Writer first, so it is closed before the temp file is removed on drop.
struct Spilled {
    out: BufWriter<File>,
    temp: TempFile,
}

pub(crate) struct DeferredOutput {
    threshold: usize,
    written: u64,
    memory: Vec<u8>,
    disk: Option<Spilled>,
    repository: PathBuf,
    cleaner: FileCleaner,
}

impl DeferredOutput {
    pub(crate) fn new(threshold: usize, repository: PathBuf, cleaner: FileCleaner) -> Self {
        Self {
            threshold,
            written: 0,
            memory: Vec::new(),
            disk: None,
            repository,
            cleaner,
        }
    }

    /// Append `chunk`, spilling to disk the moment the total would pass the threshold.
    pub(crate) fn write(&mut self, chunk: &[u8]) -> Result<()> {
        if self.disk.is_none() && self.written + chunk.len() as u64 > self.threshold as u64 {
            self.spill()?;
        }

        match &mut self.disk {
            Some(spilled) => spilled.out.write_all(chunk)?,
            None => self.memory.extend_from_slice(chunk),
        }
        self.written += chunk.len() as u64;
        Ok(())
    }

    pub(crate) fn written(&self) -> u64 {
        self.written
    }

    #[cfg(test)]
    fn is_in_memory(&self) -> bool {
        self.disk.is_none()
    }

    pub(crate) fn finish(self) -> Result<Contents> {
        match self.disk {
            None => Ok(Contents::Memory(self.memory)),
            Some(Spilled { out, temp }) => {
                out.into_inner().map_err(|e| e.into_error())?;
                Ok(Contents::Disk(temp))
            }
        }
    }

    fn spill(&mut self) -> Result<()> {
        let (temp, file) = TempFile::create(&self.repository, &self.cleaner)?;
        let mut out = BufWriter::new(file);
        out.write_all(&self.memory)?;
        tracing::debug!(
            path = %temp.path().display(),
            buffered = self.memory.len(),
            threshold = self.threshold,
            "spilling item to disk"
        );
        self.memory = Vec::new();
        self.disk = Some(Spilled { out, temp });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(threshold: usize, dir: &tempfile::TempDir) -> DeferredOutput {
        DeferredOutput::new(threshold, dir.path().to_path_buf(), FileCleaner::new())
    }

    #[test]
    fn test_stays_in_memory_up_to_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = output(8, &dir);
        out.write(b"1234").unwrap();
        out.write(b"5678").unwrap();
        assert!(out.is_in_memory());
        assert_eq!(out.written(), 8);

        match out.finish().unwrap() {
            Contents::Memory(bytes) => assert_eq!(bytes, b"12345678"),
            Contents::Disk(_) => panic!("expected in-memory contents"),
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_spills_once_past_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = output(8, &dir);
        out.write(b"12345").unwrap();
        out.write(b"6789").unwrap();
        assert!(!out.is_in_memory());
        out.write(b"abc").unwrap();

        match out.finish().unwrap() {
            Contents::Disk(temp) => {
                assert_eq!(std::fs::read(temp.path()).unwrap(), b"123456789abc");
            }
            Contents::Memory(_) => panic!("expected disk contents"),
        }
    }
}
