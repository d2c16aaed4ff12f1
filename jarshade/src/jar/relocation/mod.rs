//! Relocation of whole archives
//!
//! - `classify`: decides what an archive entry is
//! - `context`: relocation prefix and the known class names per nesting level
//! - `paths`: where each entry lands in the output
//! - `services`: service-provider declaration rewriting
//! - `engine`: the recursive walk tying it all together

pub mod classify;
pub mod context;
pub mod engine;
pub mod paths;
pub mod services;

pub use classify::EntryKind;
pub use context::{RelocationContext, RelocationPrefix};
pub use engine::{relocate, Relocator};
pub use paths::output_path;
pub use services::rewrite_service_declaration;
