pub const META_INF: &str = "META-INF/";
pub const SERVICES_DIR: &str = "META-INF/services/";

const MODULE_DESCRIPTOR: &str = "module-info.class";
const CLASS_SUFFIX: &str = ".class";
const ARCHIVE_SUFFIX: &str = ".jar";

/// What an archive entry is, as far as relocation is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// `module-info.class`, dropped: a shaded module descriptor is invalid
    ModuleDescriptor,
    /// Provider list under `META-INF/services/`, relocated by content
    ServiceDeclaration,
    ClassFile,
    /// Jar-in-jar, relocated recursively
    NestedArchive,
    PlainResource,
    Directory,
}

impl EntryKind {
    /// The rules overlap (`module-info.class` is also a `.class`, a service
    /// file may end in `.jar`), so their priority is spelled out here in one
    /// place.
    pub fn classify(path: &str, is_directory: bool) -> Self {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        if is_directory {
            EntryKind::Directory
        } else if file_name == MODULE_DESCRIPTOR {
            EntryKind::ModuleDescriptor
        } else if path.starts_with(SERVICES_DIR) {
            EntryKind::ServiceDeclaration
        } else if path.ends_with(CLASS_SUFFIX) {
            EntryKind::ClassFile
        } else if path.ends_with(ARCHIVE_SUFFIX) {
            EntryKind::NestedArchive
        } else {
            EntryKind::PlainResource
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::ModuleDescriptor => "module descriptor",
            EntryKind::ServiceDeclaration => "service declaration",
            EntryKind::ClassFile => "class file",
            EntryKind::NestedArchive => "nested archive",
            EntryKind::PlainResource => "resource",
            EntryKind::Directory => "directory",
        }
    }
}

/// JAR signature files, invalidated by any relocation
pub fn is_signature_file(path: &str) -> bool {
    let Some(name) = path.strip_prefix(META_INF) else {
        return false;
    };
    if name.contains('/') {
        return false;
    }
    let upper = name.to_ascii_uppercase();
    [".SF", ".RSA", ".DSA", ".EC"]
        .iter()
        .any(|ext| upper.ends_with(ext))
}
