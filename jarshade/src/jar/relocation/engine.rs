use std::{
    fs::File,
    io::{BufReader, BufWriter, Cursor, Read, Seek, Write},
    path::Path,
};

use tracing::{debug, info, warn};

use crate::{
    error::RelocateError,
    jar::{
        core::{remap_class, verify_class, ClassFormatError},
        io::{ArchiveBuilder, ArchiveEntry, ArchiveWalker, EntryMeta},
        relocation::{
            classify::{is_signature_file, EntryKind},
            context::{RelocationContext, RelocationPrefix},
            paths::{is_relocatable_path, output_path, rewrites_symbols},
            services::rewrite_service_declaration,
        },
    },
    types::{
        NestedStorage, RelocationEvent, RelocationOptions, RelocationReport, Stage, StageProgress,
    },
};

const INPUT_LABEL: &str = "<input>";

/// Relocates `input` under `prefix` with default options
pub fn relocate(input: &[u8], prefix: &str) -> Result<Vec<u8>, RelocateError> {
    let relocator = Relocator::new(RelocationOptions::new(prefix))?;
    let (output, _) = relocator.relocate_bytes(input, |_| {})?;
    Ok(output)
}

/// Shades whole archives: moves their classes under a package prefix and
/// renames every reference to them, recursing into jar-in-jar entries.
///
/// A relocator holds no state between runs, so one instance can be shared
/// between threads.
#[derive(Debug, Clone)]
pub struct Relocator {
    options: RelocationOptions,
    prefix: RelocationPrefix,
}

/// A rebuilt nested archive waiting to be embedded into its parent
enum NestedOutput {
    Memory(Vec<u8>),
    Spilled(File),
}

impl Relocator {
    pub fn new(options: RelocationOptions) -> Result<Self, RelocateError> {
        let prefix = RelocationPrefix::parse(&options.prefix)?;
        Ok(Self { options, prefix })
    }

    pub fn options(&self) -> &RelocationOptions {
        &self.options
    }

    pub fn prefix(&self) -> &RelocationPrefix {
        &self.prefix
    }

    pub fn relocate_bytes(
        &self,
        input: &[u8],
        mut report_progress: impl FnMut(RelocationEvent),
    ) -> Result<(Vec<u8>, RelocationReport), RelocateError> {
        let walker = ArchiveWalker::open(INPUT_LABEL, Cursor::new(input))?;
        let builder = ArchiveBuilder::new(Cursor::new(Vec::new()));
        let root = RelocationContext::new(self.prefix.clone());

        let (output, report) =
            self.relocate_archive(walker, builder, &root, 0, &mut report_progress)?;
        Ok((output.into_inner(), report))
    }

    /// Streams `input` to `output`. The archive is staged in a temporary
    /// file next to `output` and only moved into place once complete, so a
    /// failed run leaves `output` as it was and `output` may be `input`.
    pub fn relocate_file(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        mut report_progress: impl FnMut(RelocationEvent),
    ) -> Result<RelocationReport, RelocateError> {
        let (input, output) = (input.as_ref(), output.as_ref());

        let walker = ArchiveWalker::open(
            input.display().to_string(),
            BufReader::new(File::open(input)?),
        )?;
        let out_dir = match output.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let staged = tempfile::NamedTempFile::new_in(out_dir)?;

        let builder = ArchiveBuilder::new(BufWriter::new(staged));
        let root = RelocationContext::new(self.prefix.clone());
        let (writer, report) =
            self.relocate_archive(walker, builder, &root, 0, &mut report_progress)?;
        let staged = writer.into_inner().map_err(|err| err.into_error())?;
        staged.as_file().sync_all()?;
        staged.persist(output).map_err(|err| err.error)?;

        Ok(report)
    }

    /// Two passes over one archive level: entry paths first, to learn which
    /// classes belong to it, then every entry in storage order.
    fn relocate_archive<R, W>(
        &self,
        mut walker: ArchiveWalker<R>,
        builder: ArchiveBuilder<W>,
        parent: &RelocationContext,
        depth: usize,
        report_progress: &mut dyn FnMut(RelocationEvent),
    ) -> Result<(W, RelocationReport), RelocateError>
    where
        R: Read + Seek,
        W: Write + Seek,
    {
        report_progress(RelocationEvent::new(
            depth,
            Stage::CollectingClassNames,
            StageProgress::Unknown,
        ));
        let marker = self.prefix.marker();
        let already_relocated = walker.comment() == marker.as_bytes();
        let ctx = parent.extend(relocatable_class_paths(&walker));
        if already_relocated {
            info!(
                "{}: already relocated under {}, copying as is",
                walker.label(),
                self.prefix
            );
        }
        debug!(
            "{}: {} entries, {} known classes",
            walker.label(),
            walker.len(),
            ctx.known_classes()
        );

        let mut report = RelocationReport::new(self.prefix.slashed());
        report.already_relocated = already_relocated;
        let mut pass = ArchivePass {
            relocator: self,
            label: walker.label().to_owned(),
            ctx,
            depth,
            builder,
            report,
        };

        let total = walker.len().max(1) as f32;
        for (index, entry) in walker.entries().enumerate() {
            report_progress(RelocationEvent::new(
                depth,
                Stage::RelocatingEntries,
                StageProgress::Percentage(index as f32 / total),
            ));
            let entry = entry?;
            if already_relocated {
                pass.copy_entry(entry)?;
            } else {
                pass.relocate_entry(entry, report_progress)?;
            }
        }

        report_progress(RelocationEvent::new(
            depth,
            Stage::Finishing,
            StageProgress::Unknown,
        ));
        let ArchivePass {
            label,
            mut builder,
            report,
            ..
        } = pass;
        builder.set_comment(marker);
        let inner = builder.finish()?;
        info!(
            "{}: {} classes rewritten, {} entries moved, {} dropped",
            label,
            report.classes_rewritten,
            report.entries_moved,
            report.dropped.len()
        );
        report_progress(RelocationEvent::new(
            depth,
            Stage::Finishing,
            StageProgress::Done,
        ));

        Ok((inner, report))
    }

    /// Relocates a jar-in-jar into a fresh archive. The child context only
    /// lives for this call.
    fn relocate_nested(
        &self,
        label: String,
        content: Vec<u8>,
        parent: &RelocationContext,
        depth: usize,
        report_progress: &mut dyn FnMut(RelocationEvent),
    ) -> Result<(NestedOutput, RelocationReport), RelocateError> {
        let spill = match self.options.nested_storage {
            NestedStorage::InMemory => false,
            NestedStorage::SpillToDisk { threshold } => content.len() as u64 > threshold,
        };

        if !spill {
            let walker = ArchiveWalker::open(label, Cursor::new(content.as_slice()))?;
            let builder = ArchiveBuilder::new(Cursor::new(Vec::new()));
            let (output, report) =
                self.relocate_archive(walker, builder, parent, depth, report_progress)?;
            return Ok((NestedOutput::Memory(output.into_inner()), report));
        }

        debug!("{}: spilling {} bytes to disk", label, content.len());
        // Anonymous temp files, gone as soon as they are dropped
        let mut spilled_in = tempfile::tempfile()?;
        spilled_in.write_all(&content)?;
        drop(content);
        spilled_in.rewind()?;

        let walker = ArchiveWalker::open(label, BufReader::new(spilled_in))?;
        let builder = ArchiveBuilder::new(BufWriter::new(tempfile::tempfile()?));
        let (output, report) =
            self.relocate_archive(walker, builder, parent, depth, report_progress)?;
        let mut spilled_out = output.into_inner().map_err(|err| err.into_error())?;
        spilled_out.rewind()?;
        Ok((NestedOutput::Spilled(spilled_out), report))
    }
}

/// Class entries that will be moved under the prefix. Names outside this set
/// are never renamed, which keeps every class name in step with its path.
fn relocatable_class_paths<R: Read + Seek>(walker: &ArchiveWalker<R>) -> Vec<String> {
    walker
        .paths()
        .filter(|path| {
            EntryKind::classify(path, path.ends_with('/')) == EntryKind::ClassFile
                && is_relocatable_path(path)
        })
        .map(ToOwned::to_owned)
        .collect()
}

/// State of the second pass over one archive level
struct ArchivePass<'r, W: Write + Seek> {
    relocator: &'r Relocator,
    label: String,
    ctx: RelocationContext,
    depth: usize,
    builder: ArchiveBuilder<W>,
    report: RelocationReport,
}

impl<W: Write + Seek> ArchivePass<'_, W> {
    fn relocate_entry(
        &mut self,
        entry: ArchiveEntry,
        report_progress: &mut dyn FnMut(RelocationEvent),
    ) -> Result<(), RelocateError> {
        let kind = EntryKind::classify(&entry.path, entry.is_directory);
        let Some(target) = output_path(kind, &entry.path, self.ctx.prefix()) else {
            debug!("Dropping {} {}", kind.as_str(), entry.path);
            self.report.dropped.push(entry.path);
            return Ok(());
        };
        debug!("{} {} -> {}", kind.as_str(), entry.path, target);

        let ArchiveEntry {
            path,
            content,
            meta,
            ..
        } = entry;
        let content = content.unwrap_or_default();

        match kind {
            EntryKind::ModuleDescriptor => {
                self.report.dropped.push(path);
                Ok(())
            }
            EntryKind::Directory => {
                if self.builder.add_directory(&target, &meta)? {
                    self.report.entries_unchanged += 1;
                } else {
                    self.report.duplicates.push(target);
                }
                Ok(())
            }
            EntryKind::PlainResource => {
                if self.relocator.options.strip_signatures && is_signature_file(&path) {
                    debug!("Stripping signature file {}", path);
                    self.report.dropped.push(path);
                    return Ok(());
                }
                self.write(&path, target, &meta, &content, false)
            }
            EntryKind::ClassFile if !rewrites_symbols(&path) => {
                debug!("Copying {} without renaming", path);
                self.write(&path, target, &meta, &content, false)
            }
            EntryKind::ClassFile => {
                let rewritten = self.relocate_class(&path, &content)?;
                let changed = rewritten.is_some();
                let bytes = rewritten.as_deref().unwrap_or(content.as_slice());
                self.write(&path, target, &meta, bytes, changed)
            }
            EntryKind::ServiceDeclaration => {
                let rewritten = match rewrite_service_declaration(&content, self.ctx.prefix()) {
                    Ok(rewritten) => rewritten,
                    Err(err) => {
                        warn!("Service declaration {} is not UTF-8 ({}), copying as is", path, err);
                        None
                    }
                };
                let changed = rewritten.is_some();
                if changed {
                    self.report.services_rewritten += 1;
                }
                let bytes = rewritten.as_deref().unwrap_or(content.as_slice());
                self.write(&path, target, &meta, bytes, changed)
            }
            EntryKind::NestedArchive => {
                let nested_label = self.entry_label(&path);
                let (output, nested_report) = self.relocator.relocate_nested(
                    nested_label,
                    content,
                    &self.ctx,
                    self.depth + 1,
                    report_progress,
                )?;
                let written = match output {
                    NestedOutput::Memory(bytes) => self.builder.add_file(&target, &meta, &bytes)?,
                    NestedOutput::Spilled(mut file) => {
                        self.builder.add_file_from_reader(&target, &meta, &mut file)?
                    }
                };
                self.report.nested.insert(path.clone(), nested_report);
                self.count(&path, target, written, true);
                Ok(())
            }
        }
    }

    /// Writes an entry of an archive relocated before, unchanged
    fn copy_entry(&mut self, entry: ArchiveEntry) -> Result<(), RelocateError> {
        let ArchiveEntry {
            path,
            is_directory,
            content,
            meta,
        } = entry;
        let written = if is_directory {
            self.builder.add_directory(&path, &meta)?
        } else {
            self.builder
                .add_file(&path, &meta, &content.unwrap_or_default())?
        };
        self.count(&path, path.clone(), written, false);
        Ok(())
    }

    /// `Ok(None)` when no symbol in the class needed renaming
    fn relocate_class(&mut self, path: &str, content: &[u8]) -> Result<Option<Vec<u8>>, RelocateError> {
        let ctx = &self.ctx;
        let rename = |name: &str| ctx.rename(name);
        let remapped =
            remap_class(content, &rename).map_err(|source| self.malformed_class(path, source))?;
        if remapped.renamed_symbols == 0 {
            return Ok(None);
        }

        if self.relocator.options.verify_classes {
            verify_class(&remapped.bytes).map_err(|source| self.malformed_class(path, source))?;
        }
        self.report.classes_rewritten += 1;
        self.report.symbols_renamed += remapped.renamed_symbols;
        Ok(Some(remapped.bytes))
    }

    fn write(
        &mut self,
        path: &str,
        target: String,
        meta: &EntryMeta,
        content: &[u8],
        changed: bool,
    ) -> Result<(), RelocateError> {
        let written = self.builder.add_file(&target, meta, content)?;
        self.count(path, target, written, changed);
        Ok(())
    }

    fn count(&mut self, path: &str, target: String, written: bool, changed: bool) {
        if !written {
            self.report.duplicates.push(target);
        } else if path != target {
            self.report.entries_moved += 1;
        } else if !changed {
            self.report.entries_unchanged += 1;
        }
    }

    fn entry_label(&self, path: &str) -> String {
        format!("{}!/{}", self.label, path)
    }

    fn malformed_class(&self, path: &str, source: ClassFormatError) -> RelocateError {
        RelocateError::MalformedClassFile {
            path: self.entry_label(path),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use jarshade_test_utils::{read_jar, ClassFileBuilder, JarBuilder};

    use super::*;

    fn relocator(prefix: &str) -> Relocator {
        Relocator::new(RelocationOptions::new(prefix)).unwrap()
    }

    #[test]
    fn invalid_prefix_is_rejected_up_front() {
        assert!(matches!(
            Relocator::new(RelocationOptions::new("a b")),
            Err(RelocateError::InvalidPrefix(_))
        ));
    }

    #[test]
    fn report_counts_entries() {
        let jar = JarBuilder::new()
            .directory("a/")
            .file("a/B.class", &ClassFileBuilder::new("a/B").field("c", "La/C;").build())
            .file("a/C.class", &ClassFileBuilder::new("a/C").build())
            .file("LICENSE.txt", b"license")
            .file("module-info.class", b"module")
            .build();

        let (_, report) = relocator("shaded/").relocate_bytes(&jar, |_| {}).unwrap();
        assert_eq!(report.prefix, "shaded/");
        assert_eq!(report.classes_rewritten, 2);
        assert_eq!(report.entries_moved, 2);
        assert_eq!(report.entries_unchanged, 2);
        assert_eq!(report.dropped, ["module-info.class"]);
        assert!(report.duplicates.is_empty());
    }

    #[test]
    fn progress_ends_with_done_for_every_level() {
        let inner = JarBuilder::new().file("n/C.class", &ClassFileBuilder::new("n/C").build()).build();
        let jar = JarBuilder::new().stored_file("lib/inner.jar", &inner).build();

        let mut events = Vec::new();
        relocator("shaded/")
            .relocate_bytes(&jar, |event| events.push((event.depth, event.stage, event.progress)))
            .unwrap();

        assert_eq!(
            events.first(),
            Some(&(0, Stage::CollectingClassNames, StageProgress::Unknown))
        );
        assert_eq!(events.last(), Some(&(0, Stage::Finishing, StageProgress::Done)));
        assert!(events.contains(&(1, Stage::Finishing, StageProgress::Done)));
    }

    #[test]
    fn signature_files_are_kept_unless_stripped() {
        let jar = JarBuilder::new()
            .file("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n")
            .file("META-INF/SIGNER.SF", b"sig")
            .file("META-INF/SIGNER.RSA", b"rsa")
            .build();

        let (kept, _) = relocator("shaded/").relocate_bytes(&jar, |_| {}).unwrap();
        assert_eq!(read_jar(&kept).len(), 3);

        let mut options = RelocationOptions::new("shaded/");
        options.strip_signatures = true;
        let (stripped, report) = Relocator::new(options)
            .unwrap()
            .relocate_bytes(&jar, |_| {})
            .unwrap();
        let paths: Vec<_> = read_jar(&stripped).into_iter().map(|e| e.path).collect();
        assert_eq!(paths, ["META-INF/MANIFEST.MF"]);
        assert_eq!(report.dropped, ["META-INF/SIGNER.SF", "META-INF/SIGNER.RSA"]);
    }

    #[test]
    fn relocate_file_removes_output_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("broken.jar");
        let output = dir.path().join("broken-repackaged.jar");
        let jar = JarBuilder::new().file("a/B.class", b"\xca\xfe\xba\xbe truncated").build();
        std::fs::write(&input, jar).unwrap();

        let err = relocator("shaded/")
            .relocate_file(&input, &output, |_| {})
            .unwrap_err();
        assert!(matches!(err, RelocateError::MalformedClassFile { .. }));
        assert!(!output.exists());
        // Nothing but the input is left in the directory
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn relocate_file_can_replace_its_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool.jar");
        let jar = JarBuilder::new()
            .file("a/B.class", &ClassFileBuilder::new("a/B").build())
            .build();
        std::fs::write(&path, jar).unwrap();

        let report = relocator("shaded/")
            .relocate_file(&path, &path, |_| {})
            .unwrap();
        assert_eq!(report.classes_rewritten, 1);
        let written = std::fs::read(&path).unwrap();
        assert_eq!(read_jar(&written)[0].path, "shaded/a/B.class");
    }

    #[test]
    fn failed_in_place_run_keeps_the_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jar");
        let jar = JarBuilder::new().file("a/B.class", b"\xca\xfe\xba\xbe truncated").build();
        std::fs::write(&path, &jar).unwrap();

        assert!(relocator("shaded/")
            .relocate_file(&path, &path, |_| {})
            .is_err());
        assert_eq!(std::fs::read(&path).unwrap(), jar);
    }

    #[test]
    fn marked_archives_are_copied_as_is() {
        let jar = JarBuilder::new()
            .file("a/B.class", &ClassFileBuilder::new("a/B").build())
            .file("META-INF/services/a.Api", b"a.Impl\n")
            .build();
        let (once, first) = relocator("shaded/").relocate_bytes(&jar, |_| {}).unwrap();
        assert!(!first.already_relocated);

        let (twice, second) = relocator("shaded/").relocate_bytes(&once, |_| {}).unwrap();
        assert!(second.already_relocated);
        assert_eq!(second.classes_rewritten, 0);
        assert_eq!(second.entries_unchanged, 2);
        assert_eq!(read_jar(&once), read_jar(&twice));

        // Another prefix relocates again
        let (other, third) = relocator("vendor/").relocate_bytes(&once, |_| {}).unwrap();
        assert!(!third.already_relocated);
        assert_eq!(read_jar(&other)[0].path, "vendor/shaded/a/B.class");
    }

    #[test]
    fn relocate_file_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("tool.jar");
        let output = dir.path().join("tool-repackaged.jar");
        let jar = JarBuilder::new()
            .file("a/B.class", &ClassFileBuilder::new("a/B").build())
            .build();
        std::fs::write(&input, jar).unwrap();

        let report = relocator("shaded/")
            .relocate_file(&input, &output, |_| {})
            .unwrap();
        assert_eq!(report.classes_rewritten, 1);
        let written = std::fs::read(&output).unwrap();
        assert_eq!(read_jar(&written)[0].path, "shaded/a/B.class");
    }
}
