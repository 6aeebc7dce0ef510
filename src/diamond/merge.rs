use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use im::OrdMap;
use tracing::warn;

use crate::error::Error;
use crate::model::{paths, BundleEntry, ConflictMode};
use crate::timestamp::Timestamp;

/// Renames a losing entry: `(split_id, name_with_path) -> name_with_path`.
pub type Deconflicter = Arc<dyn Fn(&str, &str) -> String + Send + Sync>;

/// The default renaming scheme for `mode`.
pub fn default_deconflicter(mode: ConflictMode) -> Deconflicter {
    Arc::new(move |split_id, path| paths::deconflict_path(mode, split_id, path))
}

/// The outcome of a merge, sorted by name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Merged {
    pub entries: Vec<BundleEntry>,
    /// Versions that were kept under a deconflicted name.
    pub conflicts: u64,
}

/// Entries compare by `(Timestamp, Hash)`; entries always carry a
/// timestamp once they reach the merger.
fn version(entry: &BundleEntry) -> (Timestamp, &str) {
    (entry.timestamp.unwrap_or_default(), entry.hash.as_str())
}

/// Single-consumer merge of the entries of many splits.
///
/// Only the newest version of a name per split is retained, so a split
/// overwriting its own file never counts as a conflict. Across splits the
/// greatest `(Timestamp, Hash)` wins the name and every other split whose
/// newest version differs in content is a conflict, handled according to
/// the mode. The result does not depend on the order entries arrive in.
pub struct Merger {
    mode: ConflictMode,
    deconflicter: Deconflicter,
    candidates: OrdMap<String, OrdMap<String, BundleEntry>>,
    received: u64,
}

impl Merger {
    pub fn new(mode: ConflictMode, deconflicter: Deconflicter) -> Self {
        Merger {
            mode,
            deconflicter,
            candidates: OrdMap::new(),
            received: 0,
        }
    }

    pub fn with_mode(mode: ConflictMode) -> Self {
        Self::new(mode, default_deconflicter(mode))
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn merge(&mut self, split_id: &str, entry: BundleEntry) -> Result<(), Error> {
        if entry.timestamp.is_none() {
            return Err(Error::InvalidDescriptor(format!(
                "entry {} of split {split_id} has no timestamp",
                entry.name_with_path
            )));
        }
        self.received += 1;

        let mut versions = self
            .candidates
            .get(&entry.name_with_path)
            .cloned()
            .unwrap_or_default();
        if let Some(current) = versions.get(split_id) {
            if version(current) >= version(&entry) {
                return Ok(());
            }
        }
        let name = entry.name_with_path.clone();
        versions.insert(split_id.to_owned(), entry);
        self.candidates.insert(name, versions);
        Ok(())
    }

    /// Resolves every name; fails on the first conflict under
    /// [`ConflictMode::ForbidConflicts`].
    pub fn finish(self) -> Result<Merged, Error> {
        let mut merged: BTreeMap<String, BundleEntry> = BTreeMap::new();
        let mut conflicts = 0;

        for (name, versions) in self.candidates.iter() {
            let Some((_, winner)) = versions.iter().max_by(|(a_split, a), (b_split, b)| {
                version(a)
                    .cmp(&version(b))
                    .then_with(|| b_split.cmp(a_split))
            }) else {
                continue;
            };

            for (split_id, entry) in versions.iter() {
                if entry.hash == winner.hash {
                    continue;
                }
                match self.mode {
                    ConflictMode::IgnoreConflicts => {}
                    ConflictMode::ForbidConflicts => {
                        return Err(Error::ForbiddenConflict {
                            entry: name.clone(),
                        });
                    }
                    ConflictMode::EnableConflicts | ConflictMode::EnableCheckpoints => {
                        let mut loser = entry.clone();
                        loser.name_with_path = (self.deconflicter)(split_id, name);
                        warn!(
                            path = %name,
                            split_id = %split_id,
                            moved_to = %loser.name_with_path,
                            "conflicting version kept aside"
                        );
                        conflicts += 1;
                        keep(&mut merged, loser);
                    }
                }
            }
            keep(&mut merged, winner.clone());
        }

        Ok(Merged {
            entries: merged.into_values().collect(),
            conflicts,
        })
    }
}

/// Stores `entry` unless a greater version already holds its name.
fn keep(merged: &mut BTreeMap<String, BundleEntry>, entry: BundleEntry) {
    let replace = match merged.get(&entry.name_with_path) {
        Some(present) => version(present).cmp(&version(&entry)) == Ordering::Less,
        None => true,
    };
    if replace {
        merged.insert(entry.name_with_path.clone(), entry);
    }
}
