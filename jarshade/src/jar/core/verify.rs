use krakatau2::lib::classfile;

use crate::jar::core::classfile::{ClassFormatError, PARSER_OPTIONS};

/// Runs the full class parser over `data` so that a rewrite which left the
/// class structurally broken fails loudly instead of producing a jar that
/// only blows up at class-load time.
pub fn verify_class(data: &[u8]) -> Result<(), ClassFormatError> {
    classfile::parse(data, PARSER_OPTIONS)
        .map(|_| ())
        .map_err(|err| ClassFormatError::Rejected(format!("{:?}", err)))
}
