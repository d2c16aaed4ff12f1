use thiserror::Error;
use zip::result::ZipError;

use crate::jar::core::ClassFormatError;

#[derive(Debug, Error)]
pub enum RelocateError {
    #[error("Malformed archive {archive}: {source}")]
    MalformedArchive {
        archive: String,
        #[source]
        source: ZipError,
    },
    #[error("Malformed class file {path}: {source}")]
    MalformedClassFile {
        path: String,
        #[source]
        source: ClassFormatError,
    },
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid relocation prefix {0:?}")]
    InvalidPrefix(String),
}

impl RelocateError {
    /// Maps a zip error raised while reading `archive`. Plain I/O failures
    /// stay I/O failures, everything else means the container is corrupt.
    pub fn from_zip(archive: &str, err: ZipError) -> Self {
        match err {
            ZipError::Io(err) => RelocateError::Io(err),
            source => RelocateError::MalformedArchive {
                archive: archive.to_owned(),
                source,
            },
        }
    }
}
