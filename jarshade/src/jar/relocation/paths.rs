use crate::jar::relocation::{
    classify::{EntryKind, META_INF, SERVICES_DIR},
    context::RelocationPrefix,
};

/// Entries in the default package and everything under `META-INF/` keep
/// their location. The latter holds the manifest, signatures and licenses
/// that tooling looks up by fixed path.
pub fn is_relocatable_path(path: &str) -> bool {
    path.contains('/') && !path.starts_with(META_INF)
}

/// Classes under `META-INF/`, multi-release variants included, are copied
/// without renaming: their names would no longer match their fixed paths.
/// Default package classes stay put but their references are renamed.
pub fn rewrites_symbols(path: &str) -> bool {
    !path.starts_with(META_INF)
}

/// Where an entry of the given kind lands in the output archive. `None`
/// means the entry is not written at all.
pub fn output_path(kind: EntryKind, path: &str, prefix: &RelocationPrefix) -> Option<String> {
    match kind {
        EntryKind::ModuleDescriptor => None,
        EntryKind::ClassFile | EntryKind::NestedArchive | EntryKind::PlainResource => {
            if is_relocatable_path(path) {
                Some(prefix.apply(path))
            } else {
                Some(path.to_owned())
            }
        }
        EntryKind::ServiceDeclaration => Some(service_path(path, prefix)),
        EntryKind::Directory => Some(path.to_owned()),
    }
}

/// `META-INF/services/com.example.Api` -> `META-INF/services/shaded.com.example.Api`
pub fn service_path(path: &str, prefix: &RelocationPrefix) -> String {
    let service = path.rsplit('/').next().unwrap_or(path);
    format!("{}{}{}", SERVICES_DIR, prefix.dotted(), service)
}
