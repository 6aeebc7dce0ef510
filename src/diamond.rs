//! Diamonds: a distributed write that ends as a single bundle.
//!
//! A diamond is created once, receives any number of splits written
//! independently, and is then either canceled or committed. Committing
//! merges the file indexes of every done split into a new bundle and
//! records the outcome in the diamond's final descriptor.

pub mod merge;

pub use merge::{default_deconflicter, Deconflicter, Merged, Merger};

use std::sync::Arc;

use futures::FutureExt;
use itertools::Itertools;
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::bundle::put_bundle;
use crate::config::Settings;
use crate::error::Error;
use crate::id::fresh_id;
use crate::index::{pages, FileIndex, PageEntries};
use crate::lister::{basename_filter, Checker, Downloader, Lister};
use crate::model::{
    paths, ArchivePath, BundleDescriptor, BundleEntry, ConflictMode, DiamondDescriptor, DiamondState,
    SplitDescriptor, SplitState,
};
use crate::repo::repo_exists;
use crate::split::list_splits_apply;
use crate::store::{MetaStore, OverwritePolicy, Stores};
use crate::timestamp::Timestamp;

pub struct Diamond {
    repo: String,
    descriptor: DiamondDescriptor,
    stores: Stores,
    settings: Settings,
    message: String,
    deconflicter: Option<Deconflicter>,
    #[cfg(feature = "bundle-preserve")]
    preserved_bundle_id: String,
}

impl Diamond {
    pub fn new(repo: &str, stores: Stores, settings: Settings) -> Self {
        let mut descriptor = DiamondDescriptor::new(fresh_id(), Timestamp::default());
        descriptor.mode = settings.mode;
        Diamond {
            repo: repo.to_owned(),
            descriptor,
            stores,
            settings,
            message: String::new(),
            deconflicter: None,
            #[cfg(feature = "bundle-preserve")]
            preserved_bundle_id: String::new(),
        }
    }

    pub fn with_diamond_id(mut self, diamond_id: impl Into<String>) -> Self {
        self.descriptor.diamond_id = diamond_id.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.descriptor.tag = tag.into();
        self
    }

    pub fn with_mode(mut self, mode: ConflictMode) -> Self {
        self.descriptor.mode = mode;
        self
    }

    /// Message recorded on the committed bundle.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Overrides how losing versions are renamed on commit.
    pub fn with_deconflicter<F>(mut self, deconflicter: F) -> Self
    where
        F: Fn(&str, &str) -> String + Send + Sync + 'static,
    {
        self.deconflicter = Some(Arc::new(deconflicter));
        self
    }

    /// Commits under this bundle id instead of a fresh one.
    #[cfg(feature = "bundle-preserve")]
    pub fn with_bundle_id(mut self, bundle_id: impl Into<String>) -> Self {
        self.preserved_bundle_id = bundle_id.into();
        self
    }

    pub fn descriptor(&self) -> &DiamondDescriptor {
        &self.descriptor
    }

    pub async fn create(&mut self) -> Result<DiamondDescriptor, Error> {
        repo_exists(&self.repo, &self.stores).await?;
        if self.descriptor.diamond_id.is_empty() {
            return Err(Error::InvalidDescriptor("a diamond requires an id".into()));
        }
        let mut created = self.descriptor.clone();
        created.state = DiamondState::Initialized;
        created.start_time = Timestamp::now()?;
        created.end_time = None;
        self.stores
            .vmetadata
            .put_yaml(
                &paths::initial_diamond(&self.repo, &created.diamond_id),
                &created,
                OverwritePolicy::NoOverwrite,
            )
            .await?;
        info!(
            repo = %self.repo,
            diamond_id = %created.diamond_id,
            mode = %created.mode,
            tag = %created.tag,
            "diamond created"
        );
        self.descriptor = created;
        Ok(self.descriptor.clone())
    }

    /// Moves the diamond to its terminal canceled state.
    pub async fn cancel(&mut self) -> Result<DiamondDescriptor, Error> {
        repo_exists(&self.repo, &self.stores).await?;
        let current = get_diamond(&self.repo, &self.descriptor.diamond_id, &self.stores).await?;
        if current.state.is_terminal() {
            return Err(Error::DiamondTerminated {
                diamond_id: current.diamond_id,
                state: current.state.to_string(),
            });
        }
        let mut canceled = current;
        canceled.state = DiamondState::Canceled;
        canceled.end_time = Some(Timestamp::now()?);
        self.stores
            .vmetadata
            .put_yaml(
                &paths::final_diamond(&self.repo, &canceled.diamond_id),
                &canceled,
                OverwritePolicy::NoOverwrite,
            )
            .await?;
        info!(diamond_id = %canceled.diamond_id, "diamond canceled");
        self.descriptor = canceled;
        Ok(self.descriptor.clone())
    }

    /// Merges every done split into a new bundle.
    ///
    /// Nothing is published for the diamond unless the bundle and all of
    /// its index pages were written. On failure the in-memory descriptor
    /// is left as it was before the call.
    pub async fn commit(&mut self) -> Result<BundleDescriptor, Error> {
        let span = info_span!(
            "diamond_commit",
            diamond_id = %self.descriptor.diamond_id,
            mode = %self.descriptor.mode,
            tag = %self.descriptor.tag
        );
        let previous = self.descriptor.clone();
        let result = self.commit_splits().instrument(span.clone()).await;
        if let Err(err) = &result {
            span.in_scope(|| error!(error = %err, "diamond commit failed"));
            self.descriptor = previous;
        }
        result
    }

    async fn commit_splits(&mut self) -> Result<BundleDescriptor, Error> {
        repo_exists(&self.repo, &self.stores).await?;
        let bundle_id = self.bundle_id().await?;
        let stored = diamond_ready(&self.repo, &self.descriptor.diamond_id, &self.stores).await?;
        self.descriptor.start_time = stored.start_time;
        if self.descriptor.tag.is_empty() {
            self.descriptor.tag = stored.tag;
        }
        self.descriptor.state = DiamondState::Committing;

        let splits = self.done_splits().await?;
        if splits.is_empty() {
            return Err(Error::NoSplitToCommit {
                diamond_id: self.descriptor.diamond_id.clone(),
            });
        }
        info!(splits = splits.len(), bundle_id = %bundle_id, "committing splits");

        let mut bundle = BundleDescriptor::new(bundle_id, Timestamp::now()?);
        bundle.message = self.message.clone();
        bundle.contributors = splits
            .iter()
            .flat_map(|split| split.contributors.iter().cloned())
            .unique()
            .collect();

        let merged = self.merge_splits(&splits).await?;
        let entries = merged.entries.len();
        bundle.bundle_entries_file_count = self.upload_bundle_index(&bundle.id, merged.entries).await?;
        bundle.timestamp = Timestamp::now()?;
        put_bundle(&self.repo, &bundle, &self.stores).await?;
        info!(
            bundle_id = %bundle.id,
            entries,
            pages = bundle.bundle_entries_file_count,
            "bundle written"
        );

        let mut done = self.descriptor.clone();
        done.state = DiamondState::Done;
        done.end_time = Some(Timestamp::now()?);
        done.bundle_id = bundle.id.clone();
        done.splits = splits;
        if merged.conflicts > 0 {
            let checkpoints = done.mode == ConflictMode::EnableCheckpoints;
            done.has_checkpoints = checkpoints;
            done.has_conflicts = !checkpoints;
            warn!(conflicts = merged.conflicts, checkpoints, "diamond committed with conflicts");
        }
        let path = paths::final_diamond(&self.repo, &done.diamond_id);
        if let Err(err) = self
            .stores
            .vmetadata
            .put_yaml(&path, &done, OverwritePolicy::NoOverwrite)
            .await
        {
            warn!(bundle_id = %bundle.id, "bundle written but the diamond could not be marked done");
            return Err(err);
        }
        self.descriptor = done;
        info!(bundle_id = %bundle.id, "diamond done");
        Ok(bundle)
    }

    #[cfg(not(feature = "bundle-preserve"))]
    async fn bundle_id(&self) -> Result<String, Error> {
        Ok(fresh_id())
    }

    #[cfg(feature = "bundle-preserve")]
    async fn bundle_id(&self) -> Result<String, Error> {
        if self.preserved_bundle_id.is_empty() {
            return Ok(fresh_id());
        }
        let id: crate::id::Ufoid = self.preserved_bundle_id.parse()?;
        let id = id.to_string();
        if crate::bundle::bundle_exists(&self.repo, &id, &self.stores).await? {
            return Err(Error::BundleIdExists { bundle_id: id });
        }
        Ok(id)
    }

    async fn done_splits(&self) -> Result<Vec<SplitDescriptor>, Error> {
        let mut done = Vec::new();
        list_splits_apply(
            &self.repo,
            &self.descriptor.diamond_id,
            &self.stores,
            &self.settings,
            |split| {
                if split.state == SplitState::Done {
                    done.push(split);
                } else {
                    debug!(split_id = %split.split_id, "skipping running split");
                }
                Ok(())
            },
        )
        .await?;
        Ok(done)
    }

    async fn merge_splits(&self, splits: &[SplitDescriptor]) -> Result<Merged, Error> {
        let mode = self.descriptor.mode;
        let deconflicter = self
            .deconflicter
            .clone()
            .unwrap_or_else(|| default_deconflicter(mode));
        let mut merger = Merger::new(mode, deconflicter);

        let mut index = FileIndex::new(
            self.stores.vmetadata.clone(),
            pages::download_all_splits(&self.repo, &self.descriptor.diamond_id, splits.to_vec()),
            &self.settings,
        );
        let (pages_tx, mut pages_rx) = mpsc::channel::<PageEntries>(self.settings.channel_buffer.max(1));
        let consume = async move {
            while let Some(page) = pages_rx.recv().await {
                for entry in page.entries {
                    merger.merge(&page.id, entry)?;
                }
            }
            Ok::<_, Error>(merger)
        };
        let (downloaded, consumed) = tokio::join!(index.download(pages_tx), consume);
        // a failing merge hangs up on the download, which then reports an interruption
        let merger = consumed?;
        downloaded?;

        debug!(entries = merger.received(), "split entries received");
        merger.finish()
    }

    async fn upload_bundle_index(&self, bundle_id: &str, entries: Vec<BundleEntry>) -> Result<u64, Error> {
        let mut index = FileIndex::new(
            self.stores.metadata.clone(),
            pages::upload_bundle(&self.repo, bundle_id),
            &self.settings,
        );
        let (entries_tx, entries_rx) = mpsc::channel(self.settings.channel_buffer.max(1));
        let feed = async move {
            for mut entry in entries {
                // split timestamps only order the merge, bundles don't carry them
                entry.timestamp = None;
                if entries_tx.send(Ok(entry)).await.is_err() {
                    break;
                }
            }
        };
        let (written, ()) = tokio::join!(index.upload(entries_rx), feed);
        written
    }
}

/// The authoritative descriptor of a diamond: final if present, else initial.
pub async fn get_diamond(repo: &str, diamond_id: &str, stores: &Stores) -> Result<DiamondDescriptor, Error> {
    let meta = &stores.vmetadata;
    let found = match read_diamond(meta, &paths::final_diamond(repo, diamond_id)).await {
        Err(err) if err.is_not_found() => read_diamond(meta, &paths::initial_diamond(repo, diamond_id)).await,
        result => result,
    };
    match found {
        Err(err) if err.is_not_found() => Err(Error::DiamondNotFound {
            repo: repo.to_owned(),
            diamond_id: diamond_id.to_owned(),
        }),
        result => result,
    }
}

pub async fn diamond_exists(repo: &str, diamond_id: &str, stores: &Stores) -> Result<(), Error> {
    let meta = &stores.vmetadata;
    if meta.has(&paths::final_diamond(repo, diamond_id)).await?
        || meta.has(&paths::initial_diamond(repo, diamond_id)).await?
    {
        Ok(())
    } else {
        Err(Error::DiamondNotFound {
            repo: repo.to_owned(),
            diamond_id: diamond_id.to_owned(),
        })
    }
}

/// Fails unless the diamond still accepts splits and commits.
pub(crate) async fn diamond_ready(
    repo: &str,
    diamond_id: &str,
    stores: &Stores,
) -> Result<DiamondDescriptor, Error> {
    let diamond = get_diamond(repo, diamond_id, stores).await?;
    if diamond.state != DiamondState::Initialized {
        return Err(Error::DiamondNotReady {
            diamond_id: diamond.diamond_id,
            state: diamond.state.to_string(),
        });
    }
    Ok(diamond)
}

async fn read_diamond(meta: &MetaStore, key: &str) -> Result<DiamondDescriptor, Error> {
    let ArchivePath::Diamond { diamond_id, .. } = ArchivePath::parse(key)? else {
        return Err(Error::InvalidPath(key.to_owned()));
    };
    let diamond: DiamondDescriptor = meta.get_yaml(key).await?;
    if diamond.diamond_id != diamond_id {
        return Err(Error::InvalidDescriptor(format!(
            "diamond descriptor {} stored under diamond id {diamond_id}",
            diamond.diamond_id
        )));
    }
    Ok(diamond)
}

/// Lists the authoritative descriptor of every diamond of a repo.
pub fn diamond_lister(repo: &str, stores: &Stores, settings: &Settings) -> Lister<DiamondDescriptor> {
    let meta = stores.vmetadata.clone();
    let iterator = basename_filter(
        paths::DIAMOND_PREFIX,
        meta.key_iterator(paths::diamonds_prefix(repo), settings.batch_size),
    );
    let downloader: Downloader<DiamondDescriptor> = Arc::new(move |key: String| {
        let meta = meta.clone();
        async move { read_diamond(&meta, &key).await }.boxed()
    });
    let (repo, stores) = (repo.to_owned(), stores.clone());
    let checker: Checker = Arc::new(move || {
        let (repo, stores) = (repo.clone(), stores.clone());
        async move { repo_exists(&repo, &stores).await }.boxed()
    });
    Lister::new(iterator, downloader)
        .with_checker(checker)
        .with_state_merge()
        .with_concurrency(settings.concurrent_list)
}

pub async fn list_diamonds(repo: &str, stores: &Stores, settings: &Settings) -> Result<Vec<DiamondDescriptor>, Error> {
    diamond_lister(repo, stores, settings).list().await
}

pub async fn list_diamonds_apply<F>(repo: &str, stores: &Stores, settings: &Settings, apply: F) -> Result<(), Error>
where
    F: FnMut(DiamondDescriptor) -> Result<(), Error>,
{
    diamond_lister(repo, stores, settings).apply(apply).await
}
