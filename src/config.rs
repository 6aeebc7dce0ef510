use std::{fs, path::Path};

use serde::Deserialize;

use crate::error::Error;
use crate::model::ConflictMode;

/// Tuning knobs for listing, uploading and committing.
///
/// Passed by value to the components that need it; nothing is read from
/// the environment.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Keys fetched per listing round trip.
    pub batch_size: usize,
    /// Concurrent descriptor downloads per listing batch.
    pub concurrent_list: usize,
    /// Concurrent file uploads while a split hashes its files.
    pub concurrent_file_uploads: usize,
    /// Concurrent index page downloads (and resets).
    pub concurrent_filelist_downloads: usize,
    /// Bundle entries per index page.
    pub entries_per_file: usize,
    pub channel_buffer: usize,
    /// Conflict mode given to newly created diamonds.
    pub mode: ConflictMode,
}

impl Default for Settings {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Settings {
            batch_size: 1000,
            concurrent_list: 2 * cpus,
            concurrent_file_uploads: 20,
            concurrent_filelist_downloads: 100,
            entries_per_file: 1000,
            channel_buffer: 100,
            mode: ConflictMode::default(),
        }
    }
}

impl Settings {
    pub fn from_yaml_str(content: &str) -> Result<Self, Error> {
        let settings: Settings = serde_yaml::from_str(content)?;
        Ok(settings.clamped())
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, Error> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self.clamped()
    }

    pub fn with_entries_per_file(mut self, entries_per_file: usize) -> Self {
        self.entries_per_file = entries_per_file;
        self.clamped()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrent_list = concurrency;
        self.concurrent_file_uploads = concurrency;
        self.concurrent_filelist_downloads = concurrency;
        self.clamped()
    }

    pub fn with_mode(mut self, mode: ConflictMode) -> Self {
        self.mode = mode;
        self
    }

    /// Zero sizes would stall every pipeline, so they count as one.
    fn clamped(mut self) -> Self {
        for value in [
            &mut self.batch_size,
            &mut self.concurrent_list,
            &mut self.concurrent_file_uploads,
            &mut self.concurrent_filelist_downloads,
            &mut self.entries_per_file,
            &mut self.channel_buffer,
        ] {
            *value = (*value).max(1);
        }
        self
    }
}
