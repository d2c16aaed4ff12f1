use std::path::{Path, PathBuf};

/// `libs/tool-1.2.jar` -> `libs/tool-1.2-repackaged.jar`
pub fn repackaged_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = input
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_else(|| "jar".to_owned());
    input.with_file_name(format!("{stem}-repackaged.{extension}"))
}
