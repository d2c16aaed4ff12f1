use std::{
    collections::HashSet,
    io::{self, Read, Seek, Write},
};

use tracing::warn;
use zip::{write::FileOptions, CompressionMethod, ZipWriter};

use crate::{error::RelocateError, jar::io::walker::EntryMeta};

/// Output archive writer. Entries land in the order they are added; a path
/// that was already written is skipped and reported back as `false`.
pub struct ArchiveBuilder<W: Write + Seek> {
    zip: ZipWriter<W>,
    written: HashSet<String>,
}

impl<W: Write + Seek> ArchiveBuilder<W> {
    pub fn new(inner: W) -> Self {
        Self {
            zip: ZipWriter::new(inner),
            written: HashSet::new(),
        }
    }

    pub fn add_directory(&mut self, path: &str, meta: &EntryMeta) -> Result<bool, RelocateError> {
        if !self.claim(path) {
            return Ok(false);
        }
        self.zip
            .add_directory(path, file_options(meta))
            .map_err(io::Error::from)?;
        Ok(true)
    }

    pub fn add_file(
        &mut self,
        path: &str,
        meta: &EntryMeta,
        content: &[u8],
    ) -> Result<bool, RelocateError> {
        if !self.claim(path) {
            return Ok(false);
        }
        self.zip
            .start_file(path, file_options(meta))
            .map_err(io::Error::from)?;
        self.zip.write_all(content)?;
        Ok(true)
    }

    /// Same as [`ArchiveBuilder::add_file`] but streams the content
    pub fn add_file_from_reader(
        &mut self,
        path: &str,
        meta: &EntryMeta,
        content: &mut impl Read,
    ) -> Result<bool, RelocateError> {
        if !self.claim(path) {
            return Ok(false);
        }
        self.zip
            .start_file(path, file_options(meta))
            .map_err(io::Error::from)?;
        io::copy(content, &mut self.zip)?;
        Ok(true)
    }

    /// Replaces the archive comment written by [`ArchiveBuilder::finish`]
    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.zip.set_comment(comment.into());
    }

    pub fn finish(self) -> Result<W, RelocateError> {
        Ok(self.zip.finish().map_err(io::Error::from)?)
    }

    fn claim(&mut self, path: &str) -> bool {
        if self.written.insert(path.to_owned()) {
            return true;
        }
        warn!("Duplicate entry {}, keeping the first one", path);
        false
    }
}

fn file_options(meta: &EntryMeta) -> FileOptions<'static, ()> {
    let compression = match meta.compression {
        CompressionMethod::Stored => CompressionMethod::Stored,
        // Whatever the source used, we only write deflate
        _ => CompressionMethod::Deflated,
    };
    let options = FileOptions::default()
        .compression_method(compression)
        .last_modified_time(meta.last_modified.unwrap_or_default());
    match meta.unix_mode {
        Some(mode) => options.unix_permissions(mode),
        None => options,
    }
}
