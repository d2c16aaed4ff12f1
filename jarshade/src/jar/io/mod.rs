//! I/O modules for archive reading and writing
//!
//! This module contains the archive walker feeding the relocation engine,
//! the deterministic archive builder it writes to, and small helpers for
//! output file naming.

pub mod files;
pub mod walker;
pub mod writer;

// Re-export commonly used I/O functionality
pub use files::repackaged_path;
pub use walker::{ArchiveEntry, ArchiveWalker, Entries, EntryMeta};
pub use writer::ArchiveBuilder;
