//! Request-level size accounting and progress reporting.
//!
//! Every byte pulled from the underlying [`ByteSource`] goes through a
//! [`MeteredSource`], which counts it against `max_request_size` and reports
//! progress to the configured [`ProgressListener`]. Per-part limits live in the
//! part stream, not here.

use std::fmt;
use std::io;
use std::sync::Arc;

use crate::io::ByteSource;

use super::error::{MultipartError, Result};

/// Observer notified as a multipart body is consumed.
///
/// `bytes_read` and `items` never decrease between two calls for one session.
pub trait ProgressListener: Send + Sync {
    fn update(&self, bytes_read: u64, content_length: Option<u64>, items: usize);
}

impl<F> ProgressListener for F
where
    F: Fn(u64, Option<u64>, usize) + Send + Sync,
{
    fn update(&self, bytes_read: u64, content_length: Option<u64>, items: usize) {
        self(bytes_read, content_length, items)
    }
}

/// Snapshot of how far a session has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Bytes pulled from the source so far
    pub bytes_read: u64,
    /// Length declared by the transport, if any
    pub content_length: Option<u64>,
    /// Parts located so far
    pub items: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccountState {
    Active,
    Aborted { limit: u64, actual: u64 },
}

/// Tracks cumulative bytes and part count against the configured ceilings.
pub(crate) struct Accountant {
    bytes_read: u64,
    items: usize,
    content_length: Option<u64>,
    max_request_size: Option<u64>,
    max_parts: Option<usize>,
    listener: Option<Arc<dyn ProgressListener>>,
    state: AccountState,
}

impl fmt::Debug for Accountant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accountant")
            .field("bytes_read", &self.bytes_read)
            .field("items", &self.items)
            .field("content_length", &self.content_length)
            .field("max_request_size", &self.max_request_size)
            .field("max_parts", &self.max_parts)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Accountant {
    pub(crate) fn new(
        content_length: Option<u64>,
        max_request_size: Option<u64>,
        max_parts: Option<usize>,
        listener: Option<Arc<dyn ProgressListener>>,
    ) -> Result<Self> {
        // Reject up front when the transport already told us the body is too big.
        if let (Some(limit), Some(declared)) = (max_request_size, content_length) {
            if declared > limit {
                return Err(MultipartError::RequestSizeLimit {
                    limit,
                    actual: declared,
                });
            }
        }

        Ok(Self {
            bytes_read: 0,
            items: 0,
            content_length,
            max_request_size,
            max_parts,
            listener,
            state: AccountState::Active,
        })
    }

    /// Fails with the original violation once the accountant is aborted.
    pub(crate) fn check_active(&self) -> Result<()> {
        match self.state {
            AccountState::Active => Ok(()),
            AccountState::Aborted { limit, actual } => {
                Err(MultipartError::RequestSizeLimit { limit, actual })
            }
        }
    }

    pub(crate) fn note_bytes_read(&mut self, count: usize) -> Result<()> {
        self.check_active()?;
        self.bytes_read += count as u64;

        if let Some(limit) = self.max_request_size {
            if self.bytes_read > limit {
                let actual = self.bytes_read;
                self.state = AccountState::Aborted { limit, actual };
                tracing::debug!(limit, actual, "request size limit exceeded");
                return Err(MultipartError::RequestSizeLimit { limit, actual });
            }
        }

        self.notify();
        Ok(())
    }

    pub(crate) fn note_item(&mut self) -> Result<()> {
        self.items += 1;
        if let Some(limit) = self.max_parts {
            if self.items > limit {
                return Err(MultipartError::PartCountLimit { limit });
            }
        }
        self.notify();
        Ok(())
    }

    pub(crate) fn progress(&self) -> Progress {
        Progress {
            bytes_read: self.bytes_read,
            content_length: self.content_length,
            items: self.items,
        }
    }

    fn notify(&self) {
        if let Some(listener) = &self.listener {
            listener.update(self.bytes_read, self.content_length, self.items);
        }
    }
}

/// A [`ByteSource`] wrapper that feeds every read through an [`Accountant`].
#[derive(Debug)]
pub(crate) struct MeteredSource<S> {
    inner: S,
    accountant: Accountant,
}

impl<S: ByteSource> MeteredSource<S> {
    pub(crate) fn new(inner: S, accountant: Accountant) -> Self {
        Self { inner, accountant }
    }

    pub(crate) fn accountant(&self) -> &Accountant {
        &self.accountant
    }

    pub(crate) fn accountant_mut(&mut self) -> &mut Accountant {
        &mut self.accountant
    }
}

impl<S: ByteSource> ByteSource for MeteredSource<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.accountant.check_active()?;
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.accountant.note_bytes_read(n)?;
        }
        Ok(n)
    }

    fn content_length(&self) -> Option<u64> {
        self.inner.content_length()
    }
}
