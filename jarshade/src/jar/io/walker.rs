use std::io::{Read, Seek};

use zip::{read::ZipArchive, result::ZipError, CompressionMethod, DateTime};

use crate::error::RelocateError;

/// Source-entry attributes carried over to the output so that relocation is
/// reproducible byte for byte
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryMeta {
    pub compression: CompressionMethod,
    pub last_modified: Option<DateTime>,
    pub unix_mode: Option<u32>,
}

impl Default for EntryMeta {
    fn default() -> Self {
        Self {
            compression: CompressionMethod::Deflated,
            last_modified: None,
            unix_mode: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub path: String,
    pub is_directory: bool,
    /// `None` for directories
    pub content: Option<Vec<u8>>,
    pub meta: EntryMeta,
}

/// Read-only view over a zip-compatible archive
pub struct ArchiveWalker<R> {
    label: String,
    zip: ZipArchive<R>,
}

impl<R: Read + Seek> ArchiveWalker<R> {
    /// `label` names the archive in errors, e.g. `app.jar!/lib/dep.jar`
    pub fn open(label: impl Into<String>, reader: R) -> Result<Self, RelocateError> {
        let label = label.into();
        let zip = ZipArchive::new(reader).map_err(|err| RelocateError::from_zip(&label, err))?;
        Ok(Self { label, zip })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn len(&self) -> usize {
        self.zip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zip.is_empty()
    }

    /// Archive comment from the end of central directory record
    pub fn comment(&self) -> &[u8] {
        self.zip.comment()
    }

    /// Entry paths straight from the central directory, nothing is inflated
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.zip.file_names()
    }

    /// Entries in storage order. Every call starts again from the first one.
    pub fn entries(&mut self) -> Entries<'_, R> {
        Entries {
            walker: self,
            next: 0,
        }
    }

    fn read_entry(&mut self, index: usize) -> Result<ArchiveEntry, RelocateError> {
        let mut file = self
            .zip
            .by_index(index)
            .map_err(|err| RelocateError::from_zip(&self.label, err))?;

        let path = file.name().to_owned();
        let is_directory = file.is_dir();
        let meta = EntryMeta {
            compression: file.compression(),
            last_modified: file.last_modified(),
            unix_mode: file.unix_mode(),
        };

        let content = if is_directory {
            None
        } else {
            let mut buffer = Vec::new();
            // Inflate or CRC failures mean the container is corrupt
            file.read_to_end(&mut buffer)
                .map_err(|err| RelocateError::MalformedArchive {
                    archive: format!("{}!/{}", self.label, path),
                    source: ZipError::Io(err),
                })?;
            Some(buffer)
        };

        Ok(ArchiveEntry {
            path,
            is_directory,
            content,
            meta,
        })
    }
}

pub struct Entries<'w, R> {
    walker: &'w mut ArchiveWalker<R>,
    next: usize,
}

impl<R: Read + Seek> Iterator for Entries<'_, R> {
    type Item = Result<ArchiveEntry, RelocateError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.walker.len() {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(self.walker.read_entry(index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.walker.len().saturating_sub(self.next);
        (left, Some(left))
    }
}
