//! Splits: one writer's partition of a diamond.

use std::sync::Arc;

use futures::{stream, FutureExt, StreamExt, TryStreamExt};
use object_store::{path::Path, ObjectStore};
use percent_encoding::percent_decode_str;
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::Settings;
use crate::diamond::{diamond_exists, diamond_ready};
use crate::error::Error;
use crate::id::fresh_id;
use crate::index::{pages, FileIndex};
use crate::lister::{basename_filter, Checker, Downloader, Lister};
use crate::model::{paths, ArchivePath, BundleEntry, Contributor, SplitDescriptor, SplitState};
use crate::repo::repo_exists;
use crate::store::{Cafs, MetaStore, OverwritePolicy, Stores};
use crate::timestamp::Timestamp;

/// Mode recorded for uploaded files; object stores carry no permissions.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Decides whether a key of the source store belongs to the split.
pub type KeyFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

pub struct Split {
    repo: String,
    diamond_id: String,
    descriptor: SplitDescriptor,
    stores: Stores,
    settings: Settings,
    source: Option<Arc<dyn ObjectStore>>,
    filter: Option<KeyFilter>,
    keys: Option<Vec<String>>,
    skip_missing: bool,
    must_exist: bool,
}

impl Split {
    pub fn new(repo: &str, diamond_id: &str, stores: Stores, settings: Settings) -> Self {
        Split {
            repo: repo.to_owned(),
            diamond_id: diamond_id.to_owned(),
            descriptor: SplitDescriptor::new(fresh_id(), Timestamp::default()),
            stores,
            settings,
            source: None,
            filter: None,
            keys: None,
            skip_missing: false,
            must_exist: false,
        }
    }

    pub fn with_split_id(mut self, split_id: impl Into<String>) -> Self {
        self.descriptor.split_id = split_id.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.descriptor.tag = tag.into();
        self
    }

    pub fn with_contributor(mut self, contributor: Contributor) -> Self {
        self.descriptor.contributors.push(contributor);
        self
    }

    /// Takes over a descriptor read back from the store.
    pub fn with_descriptor(mut self, descriptor: SplitDescriptor) -> Self {
        self.descriptor = descriptor;
        self
    }

    /// The store whose files this split uploads.
    pub fn with_source(mut self, source: Arc<dyn ObjectStore>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Uploads exactly these keys instead of everything in the source.
    ///
    /// Keys are raw store locations, escaped the way the source lists them.
    pub fn with_keys(mut self, keys: Vec<String>) -> Self {
        self.keys = Some(keys);
        self
    }

    /// Skip files that vanish between listing and reading.
    pub fn skip_missing(mut self, skip: bool) -> Self {
        self.skip_missing = skip;
        self
    }

    /// Only accept a split id that was created before (replays).
    pub fn must_exist(mut self, must_exist: bool) -> Self {
        self.must_exist = must_exist;
        self
    }

    pub fn descriptor(&self) -> &SplitDescriptor {
        &self.descriptor
    }

    /// Registers the split with its diamond.
    ///
    /// An existing running split is restarted; a done one is rejected.
    pub async fn create(&mut self) -> Result<SplitDescriptor, Error> {
        repo_exists(&self.repo, &self.stores).await?;
        if self.diamond_id.is_empty() {
            return Err(Error::InvalidDescriptor(
                "a diamond id is required to create a split".into(),
            ));
        }
        diamond_ready(&self.repo, &self.diamond_id, &self.stores).await?;

        match get_split(&self.repo, &self.diamond_id, &self.descriptor.split_id, &self.stores).await {
            Ok(existing) => match existing.state {
                SplitState::Done => Err(Error::SplitAlreadyDone {
                    diamond_id: self.diamond_id.clone(),
                    split_id: existing.split_id,
                }),
                SplitState::Running => {
                    warn!(
                        diamond_id = %self.diamond_id,
                        split_id = %existing.split_id,
                        "restarting a split in running state"
                    );
                    self.descriptor = existing;
                    Ok(self.descriptor.clone())
                }
            },
            Err(err) if err.is_not_found() => {
                if self.must_exist {
                    return Err(Error::SplitMustExist {
                        diamond_id: self.diamond_id.clone(),
                        split_id: self.descriptor.split_id.clone(),
                    });
                }
                self.descriptor.state = SplitState::Running;
                self.descriptor.start_time = Timestamp::now()?;
                self.descriptor.end_time = None;
                let path = paths::initial_split(&self.repo, &self.diamond_id, &self.descriptor.split_id);
                self.stores
                    .vmetadata
                    .put_yaml(&path, &self.descriptor, OverwritePolicy::NoOverwrite)
                    .await?;
                info!(
                    diamond_id = %self.diamond_id,
                    split_id = %self.descriptor.split_id,
                    tag = %self.descriptor.tag,
                    "split created"
                );
                Ok(self.descriptor.clone())
            }
            Err(err) => Err(err),
        }
    }

    /// Uploads the split's files and publishes it as done.
    ///
    /// On failure nothing terminal is written and the split can be uploaded
    /// again under a new generation.
    pub async fn upload(&mut self) -> Result<SplitDescriptor, Error> {
        if self.descriptor.split_id.is_empty() || self.diamond_id.is_empty() {
            return Err(Error::InvalidDescriptor(
                "uploading a split requires diamond and split ids".into(),
            ));
        }
        if self.descriptor.state == SplitState::Done {
            return Err(Error::SplitAlreadyDone {
                diamond_id: self.diamond_id.clone(),
                split_id: self.descriptor.split_id.clone(),
            });
        }

        let span = info_span!(
            "split_upload",
            diamond_id = %self.diamond_id,
            split_id = %self.descriptor.split_id,
            tag = %self.descriptor.tag
        );
        let result = self.upload_files().instrument(span.clone()).await;
        if let Err(err) = &result {
            span.in_scope(|| error!(error = %err, "split upload failed"));
        }
        result
    }

    async fn upload_files(&mut self) -> Result<SplitDescriptor, Error> {
        let source = self
            .source
            .clone()
            .ok_or_else(|| Error::InvalidDescriptor("split has no source store".into()))?;
        self.descriptor.generation_id = fresh_id();

        let files = self.consumable_keys(&source).await?;
        debug!(files = files.len(), generation_id = %self.descriptor.generation_id, "uploading split files");

        let mut index = FileIndex::new(
            self.stores.vmetadata.clone(),
            pages::upload_split(&self.repo, &self.diamond_id, &self.descriptor),
            &self.settings,
        );
        let (packed_tx, packed_rx) = mpsc::channel(self.settings.channel_buffer.max(1));
        let pack = pack_files(
            source,
            self.stores.blobs.clone(),
            files,
            self.settings.concurrent_file_uploads,
            self.skip_missing,
            packed_tx,
        );
        let (count, ()) = tokio::join!(index.upload(packed_rx), pack);
        let count = count?;

        let mut done = self.descriptor.clone();
        done.state = SplitState::Done;
        done.end_time = Some(Timestamp::now()?);
        done.split_entries_file_count = count;
        let path = paths::final_split(&self.repo, &self.diamond_id, &done.split_id);
        self.stores
            .vmetadata
            .put_yaml(&path, &done, OverwritePolicy::NoOverwrite)
            .await?;
        self.descriptor = done;

        info!(pages = count, "split done");
        Ok(self.descriptor.clone())
    }

    /// The source locations to upload with the file names they are recorded
    /// under, sorted by name.
    async fn consumable_keys(&self, source: &Arc<dyn ObjectStore>) -> Result<Vec<(Path, String)>, Error> {
        let locations = match &self.keys {
            Some(keys) => keys
                .iter()
                .map(|key| Path::parse(key).map_err(|e| Error::InvalidPath(format!("{key}: {e}"))))
                .collect::<Result<Vec<_>, _>>()?,
            None => {
                source
                    .list(None)
                    .map_ok(|meta| meta.location)
                    .try_collect::<Vec<_>>()
                    .await?
            }
        };
        let mut files = locations
            .into_iter()
            .map(|location| file_name(&location).map(|name| (location, name)))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(filter) = &self.filter {
            files.retain(|(_, name)| filter(name));
        }
        files.sort_unstable_by(|a, b| a.1.cmp(&b.1));
        files.dedup_by(|a, b| a.0 == b.0);
        Ok(files)
    }
}

/// The decoded name of a source location; stores escape characters such
/// as `#` or `%` in the raw path.
fn file_name(location: &Path) -> Result<String, Error> {
    let parts = location
        .parts()
        .map(|part| {
            percent_decode_str(part.as_ref())
                .decode_utf8()
                .map(|name| name.into_owned())
                .map_err(|e| Error::InvalidPath(format!("{location}: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parts.join("/"))
}

/// Streams every file into the blob store, forwarding one entry per file.
///
/// Stops after the first failure or when the index stops listening.
async fn pack_files(
    source: Arc<dyn ObjectStore>,
    blobs: Cafs,
    files: Vec<(Path, String)>,
    concurrency: usize,
    skip_missing: bool,
    output: mpsc::Sender<Result<BundleEntry, Error>>,
) {
    let mut packed = stream::iter(files)
        .map(|(location, file)| {
            let source = source.clone();
            let blobs = blobs.clone();
            async move { pack_file(&source, &blobs, location, file, skip_missing).await }
        })
        .buffer_unordered(concurrency.max(1));

    while let Some(packed) = packed.next().await {
        let entry = match packed {
            Ok(Some(entry)) => Ok(entry),
            Ok(None) => continue,
            Err(err) => Err(err),
        };
        let failed = entry.is_err();
        if output.send(entry).await.is_err() || failed {
            return;
        }
    }
}

async fn pack_file(
    source: &Arc<dyn ObjectStore>,
    blobs: &Cafs,
    location: Path,
    file: String,
    skip_missing: bool,
) -> Result<Option<BundleEntry>, Error> {
    let object = match source.get(&location).await {
        Ok(object) => object,
        Err(object_store::Error::NotFound { .. }) if skip_missing => {
            info!(file = %file, "skipping vanished file");
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };
    let (size, key) = blobs
        .put_stream(object.into_stream().map_err(Error::from))
        .await?;
    debug!(file = %file, hash = %key, size, "file packed");
    Ok(Some(BundleEntry {
        hash: key.to_string(),
        name_with_path: file,
        file_mode: DEFAULT_FILE_MODE,
        size,
        timestamp: Some(Timestamp::now()?),
    }))
}

/// The authoritative descriptor of a split: final if present, else initial.
pub async fn get_split(
    repo: &str,
    diamond_id: &str,
    split_id: &str,
    stores: &Stores,
) -> Result<SplitDescriptor, Error> {
    let meta = &stores.vmetadata;
    let split = match read_split(meta, &paths::final_split(repo, diamond_id, split_id)).await {
        Err(err) if err.is_not_found() => {
            read_split(meta, &paths::initial_split(repo, diamond_id, split_id)).await?
        }
        result => result?,
    };
    Ok(split)
}

/// Reads a split descriptor and checks it against the id in its key.
async fn read_split(meta: &MetaStore, key: &str) -> Result<SplitDescriptor, Error> {
    let ArchivePath::Split { split_id, .. } = ArchivePath::parse(key)? else {
        return Err(Error::InvalidPath(key.to_owned()));
    };
    let split: SplitDescriptor = meta.get_yaml(key).await?;
    if split.split_id != split_id {
        return Err(Error::InvalidDescriptor(format!(
            "split descriptor {} stored under split id {split_id}",
            split.split_id
        )));
    }
    Ok(split)
}

/// Lists the authoritative descriptor of every split of a diamond.
pub fn split_lister(
    repo: &str,
    diamond_id: &str,
    stores: &Stores,
    settings: &Settings,
) -> Lister<SplitDescriptor> {
    let meta = stores.vmetadata.clone();
    let iterator = basename_filter(
        paths::SPLIT_PREFIX,
        meta.key_iterator(paths::splits_prefix(repo, diamond_id), settings.batch_size),
    );
    let downloader: Downloader<SplitDescriptor> = Arc::new(move |key: String| {
        let meta = meta.clone();
        async move { read_split(&meta, &key).await }.boxed()
    });
    let (repo, diamond_id, stores) = (repo.to_owned(), diamond_id.to_owned(), stores.clone());
    let checker: Checker = Arc::new(move || {
        let (repo, diamond_id, stores) = (repo.clone(), diamond_id.clone(), stores.clone());
        async move {
            repo_exists(&repo, &stores).await?;
            diamond_exists(&repo, &diamond_id, &stores).await
        }
        .boxed()
    });
    Lister::new(iterator, downloader)
        .with_checker(checker)
        .with_state_merge()
        .with_concurrency(settings.concurrent_list)
}

pub async fn list_splits(
    repo: &str,
    diamond_id: &str,
    stores: &Stores,
    settings: &Settings,
) -> Result<Vec<SplitDescriptor>, Error> {
    split_lister(repo, diamond_id, stores, settings).list().await
}

pub async fn list_splits_apply<F>(
    repo: &str,
    diamond_id: &str,
    stores: &Stores,
    settings: &Settings,
    apply: F,
) -> Result<(), Error>
where
    F: FnMut(SplitDescriptor) -> Result<(), Error>,
{
    split_lister(repo, diamond_id, stores, settings).apply(apply).await
}
