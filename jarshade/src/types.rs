use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How nested archives are held while they are being relocated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum NestedStorage {
    #[default]
    InMemory,
    /// Nested archives larger than `threshold` bytes are moved to anonymous
    /// temp files for the duration of their relocation.
    SpillToDisk { threshold: u64 },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelocationOptions {
    /// Package path prepended to relocated entries, e.g. `shaded/vendor/tool/`
    pub prefix: String,
    pub nested_storage: NestedStorage,
    /// Re-parse every rewritten class before it is written out
    pub verify_classes: bool,
    /// Drop `META-INF/*.SF|*.RSA|*.DSA|*.EC`, relocation invalidates them anyway
    pub strip_signatures: bool,
}

impl RelocationOptions {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            nested_storage: NestedStorage::default(),
            verify_classes: true,
            strip_signatures: false,
        }
    }
}

#[derive(Debug)]
pub struct RelocationEvent {
    /// 0 for the archive passed in, +1 for every jar-in-jar level
    pub depth: usize,
    pub stage: Stage,
    pub progress: StageProgress,
}

impl RelocationEvent {
    pub fn new(depth: usize, stage: Stage, progress: StageProgress) -> Self {
        Self {
            depth,
            stage,
            progress,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CollectingClassNames,
    RelocatingEntries,
    Finishing,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::CollectingClassNames => "Collecting Class Names",
            Stage::RelocatingEntries => "Relocating Entries",
            Stage::Finishing => "Finishing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StageProgress {
    Unknown,
    Percentage(f32),
    Done,
}

/// What happened to an archive, nested archives included
#[derive(Default, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RelocationReport {
    pub prefix: String,
    /// The input already carried this prefix's relocation marker and was
    /// copied as is
    pub already_relocated: bool,
    pub classes_rewritten: usize,
    pub symbols_renamed: usize,
    pub services_rewritten: usize,
    pub entries_moved: usize,
    pub entries_unchanged: usize,
    pub dropped: Vec<String>,
    pub duplicates: Vec<String>,
    pub nested: BTreeMap<String, RelocationReport>,
}

impl RelocationReport {
    pub fn new(prefix: impl Into<String>) -> Self {
        RelocationReport {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    /// Number of class files rewritten at this level and below
    pub fn total_classes_rewritten(&self) -> usize {
        self.classes_rewritten
            + self
                .nested
                .values()
                .map(RelocationReport::total_classes_rewritten)
                .sum::<usize>()
    }
}
