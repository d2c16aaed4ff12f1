use std::str::Utf8Error;

use crate::jar::relocation::context::RelocationPrefix;

/// Prefixes the provider named on the first line of a service declaration.
///
/// Only the first line is looked at; providers listed further down keep
/// their original names. Returns `Ok(None)` when the first line is blank or
/// a comment.
pub fn rewrite_service_declaration(
    content: &[u8],
    prefix: &RelocationPrefix,
) -> Result<Option<Vec<u8>>, Utf8Error> {
    let text = std::str::from_utf8(content)?;
    let first_line = text.split('\n').next().unwrap_or_default();
    let provider = first_line.trim_start();
    let trimmed = provider.trim_end();

    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let insert_at = first_line.len() - provider.len();
    let mut rewritten = String::with_capacity(text.len() + prefix.dotted().len());
    rewritten.push_str(&text[..insert_at]);
    rewritten.push_str(prefix.dotted());
    rewritten.push_str(&text[insert_at..]);
    Ok(Some(rewritten.into_bytes()))
}
