//! Java archive shading library
//!
//! Moves the classes of a jar under a package prefix and renames every
//! reference to them, so the result can live on the same classpath as an
//! unshaded copy of the same library. The functionality is organized into
//! several sub-modules:
//!
//! - `core`: class file renaming, reassembly and verification
//! - `io`: archive reading and deterministic archive writing
//! - `relocation`: entry classification, path rules and the recursive engine
//!
//! # Example Usage
//!
//! ```no_run
//! use jarshade::jar::relocate;
//!
//! let input = std::fs::read("tool.jar")?;
//! let shaded = relocate(&input, "com/host/shaded/")?;
//! std::fs::write("tool-repackaged.jar", shaded)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

// Sub-modules
pub mod core;
pub mod io;
pub mod relocation;

// Re-export the most commonly used functionality for convenience
pub use core::{remap_class, ClassFormatError};
pub use io::{ArchiveBuilder, ArchiveEntry, ArchiveWalker};
pub use relocation::{relocate, EntryKind, RelocationContext, RelocationPrefix, Relocator};
