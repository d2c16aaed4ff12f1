pub mod error;
pub mod jar;
pub mod types;

pub use error::RelocateError;
pub use jar::{relocate, Relocator};
pub use types::{
    NestedStorage, RelocationEvent, RelocationOptions, RelocationReport, Stage, StageProgress,
};
