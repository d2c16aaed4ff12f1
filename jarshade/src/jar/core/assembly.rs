use krakatau2::lib::{assemble, classfile::parse::Class, AssemblerOptions, DisassemblerOptions};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReasmError {
    #[error("Assemble error: {0:?}")]
    Assemble(krakatau2::lib::AssembleError),
    #[error("Disassemble error: {0}")]
    Disassemble(std::io::Error),
    #[error("Source parse error: {0}")]
    SourceParse(#[from] std::str::Utf8Error),
    #[error("Assembler produced no class")]
    NoOutput,
}

/// Serializes a (possibly modified) class by disassembling it in roundtrip
/// mode and assembling the source back to bytecode. Roundtrip mode keeps
/// constant pool indices, so attributes referring to them stay valid.
pub fn reasm(class: &Class<'_>) -> Result<Vec<u8>, ReasmError> {
    let mut out = Vec::new();

    krakatau2::lib::disassemble::disassemble(
        &mut out,
        class,
        DisassemblerOptions { roundtrip: true },
    )
    .map_err(ReasmError::Disassemble)?;

    let source = std::str::from_utf8(&out)?;
    let mut assembled = assemble(source, AssemblerOptions {}).map_err(ReasmError::Assemble)?;
    let (_name, data) = assembled.pop().ok_or(ReasmError::NoOutput)?;

    Ok(data)
}
