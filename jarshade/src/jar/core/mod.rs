//! Core class file operations
//!
//! This module contains the pieces needed to rename classes inside compiled
//! Java bytecode: finding the symbolic constants of a parsed class, descriptor
//! and signature rewriting, reassembly, and a structural check of the result.

pub mod assembly;
pub mod classfile;
pub mod descriptor;
pub mod verify;

// Re-export commonly used core functionality
pub use assembly::{reasm, ReasmError};
pub use classfile::{class_name, parse_class, remap_class, ClassFormatError, RemappedClass};
pub use descriptor::{remap_class_operand, remap_descriptor, remap_signature, Rename};
pub use verify::verify_class;
