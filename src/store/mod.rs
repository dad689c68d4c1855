//! Item storage: drained parts kept in memory or spilled to temp files.
//!
//! An [`ItemFactory`] drains a [`Part`](crate::multipart::Part) into a
//! [`FileItem`]. Content up to the memory threshold stays in a buffer; the
//! first write that would pass it moves everything into a uniquely named
//! temp file in the repository directory. Temp files belong to their item and
//! are deleted when it is deleted or dropped. The shared [`FileCleaner`]
//! tracks the ones still alive and removes them on shutdown.

mod cleaner;
mod deferred;
mod item;

pub use cleaner::FileCleaner;
pub use item::{FileItem, ItemFactory};
