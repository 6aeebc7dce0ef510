//! Concurrent, ordered listing of metadata objects.
//!
//! A [`Lister`] runs up to three background tasks: a key fetcher paging
//! through the store, an optional [`StateMerger`](keys::StateMerger) that
//! collapses initial/final descriptor keys, and a batch fetcher that
//! downloads and decodes every batch with bounded concurrency. Results are
//! sorted by key within each batch, and batches arrive in key order.
//!
//! Every task observes a shared [`CancellationToken`] at each blocking
//! point and all of them are joined before a listing call returns.

pub mod keys;

pub use keys::{basename_filter, KeyIterator, StateMerger};

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Error;
use keys::{deliver, fetch_keys, merge_keys, KeyBatch};

/// Downloads and decodes the object stored under a key.
pub type Downloader<T> = Arc<dyn Fn(String) -> BoxFuture<'static, Result<T, Error>> + Send + Sync>;

/// Prerequisite run once before any key is fetched.
pub type Checker = Arc<dyn Fn() -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;

type ListBatch<T> = Result<Vec<T>, Error>;

pub struct Lister<T> {
    iterator: KeyIterator,
    downloader: Downloader<T>,
    checker: Option<Checker>,
    merge_states: bool,
    concurrency: usize,
}

impl<T> Clone for Lister<T> {
    fn clone(&self) -> Self {
        Lister {
            iterator: self.iterator.clone(),
            downloader: self.downloader.clone(),
            checker: self.checker.clone(),
            merge_states: self.merge_states,
            concurrency: self.concurrency,
        }
    }
}

impl<T: Send + 'static> Lister<T> {
    pub fn new(iterator: KeyIterator, downloader: Downloader<T>) -> Self {
        Lister {
            iterator,
            downloader,
            checker: None,
            merge_states: false,
            concurrency: 1,
        }
    }

    pub fn with_checker(mut self, checker: Checker) -> Self {
        self.checker = Some(checker);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Resolve initial/final descriptor keys to the authoritative one.
    pub fn with_state_merge(mut self) -> Self {
        self.merge_states = true;
        self
    }

    /// Every object, in ascending key order.
    pub async fn list(&self) -> Result<Vec<T>, Error> {
        match self.list_partial().await {
            (items, None) => Ok(items),
            (_, Some(err)) => Err(err),
        }
    }

    /// Like [`list`](Self::list) but keeps what was fetched before a failure.
    pub async fn list_partial(&self) -> (Vec<T>, Option<Error>) {
        let cancel = CancellationToken::new();
        let (mut batches, mut tasks) = self.spawn(cancel.clone()).await;

        let mut items = Vec::new();
        let mut error = None;
        while let Some(batch) = batches.recv().await {
            match batch {
                Ok(batch) => items.extend(batch),
                Err(err) => {
                    error = Some(err);
                    break;
                }
            }
        }
        if error.is_some() {
            cancel.cancel();
        }
        drop(batches);
        if let Some(failure) = join_all(&mut tasks).await {
            error.get_or_insert(failure);
        }
        (items, error)
    }

    /// Feeds every object to `apply` as soon as its batch is ready.
    ///
    /// An error from `apply` stops the listing; it is returned after all
    /// background work has wound down.
    pub async fn apply<F>(&self, mut apply: F) -> Result<(), Error>
    where
        F: FnMut(T) -> Result<(), Error>,
    {
        let cancel = CancellationToken::new();
        let (mut batches, mut tasks) = self.spawn(cancel.clone()).await;

        let mut list_err = None;
        let mut apply_err = None;
        'batches: while let Some(batch) = batches.recv().await {
            match batch {
                Ok(batch) => {
                    for item in batch {
                        if let Err(err) = apply(item) {
                            apply_err = Some(err);
                            break 'batches;
                        }
                    }
                }
                Err(err) => {
                    list_err = Some(err);
                    break;
                }
            }
        }

        if apply_err.is_some() {
            cancel.cancel();
            while let Some(batch) = batches.recv().await {
                if let Err(err) = batch {
                    list_err.get_or_insert(err);
                }
            }
        }
        drop(batches);
        if let Some(failure) = join_all(&mut tasks).await {
            list_err.get_or_insert(failure);
        }

        match (list_err, apply_err) {
            (Some(Error::Interrupted), Some(err)) => Err(err),
            (Some(err), _) | (None, Some(err)) => Err(err),
            (None, None) => Ok(()),
        }
    }

    async fn spawn(&self, cancel: CancellationToken) -> (mpsc::Receiver<ListBatch<T>>, JoinSet<()>) {
        let (batch_tx, batch_rx) = mpsc::channel(1);
        let mut tasks = JoinSet::new();

        if let Some(checker) = &self.checker {
            if let Err(err) = checker().await {
                let _ = batch_tx.try_send(Err(err));
                return (batch_rx, tasks);
            }
        }

        // The key side can be stopped on its own once the batch fetcher fails.
        let keys_cancel = cancel.child_token();
        let (keys_tx, keys_rx) = mpsc::channel(1);
        tasks.spawn(fetch_keys(self.iterator.clone(), keys_tx, keys_cancel.clone()));
        let keys_rx = if self.merge_states {
            let (merged_tx, merged_rx) = mpsc::channel(1);
            tasks.spawn(merge_keys(keys_rx, merged_tx, keys_cancel.clone()));
            merged_rx
        } else {
            keys_rx
        };
        tasks.spawn(fetch_listables(
            keys_rx,
            batch_tx,
            self.downloader.clone(),
            self.concurrency,
            keys_cancel,
            cancel,
        ));
        (batch_rx, tasks)
    }
}

async fn fetch_listables<T: Send + 'static>(
    mut keys: mpsc::Receiver<KeyBatch>,
    output: mpsc::Sender<ListBatch<T>>,
    downloader: Downloader<T>,
    concurrency: usize,
    keys_cancel: CancellationToken,
    cancel: CancellationToken,
) {
    loop {
        let batch = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = output.try_send(Err(Error::Interrupted));
                return;
            }
            batch = keys.recv() => batch,
        };
        let Some(batch) = batch else {
            return;
        };
        let fetched = match batch {
            Ok(batch) => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Interrupted),
                fetched = fetch_batch(&downloader, batch, concurrency) => fetched,
            },
            Err(err) => Err(err),
        };
        match fetched {
            Ok(items) => {
                if !deliver(&output, &cancel, Ok(items)).await {
                    return;
                }
            }
            Err(err) => {
                keys_cancel.cancel();
                deliver(&output, &cancel, Err(err)).await;
                return;
            }
        }
    }
}

/// Downloads one batch with at most `concurrency` requests in flight.
///
/// Missing objects are skipped, any other failure aborts the batch and
/// drops the downloads still running.
async fn fetch_batch<T: Send + 'static>(
    downloader: &Downloader<T>,
    keys: Vec<String>,
    concurrency: usize,
) -> Result<Vec<T>, Error> {
    let workers = concurrency.min(keys.len()).max(1);
    let mut fetched = stream::iter(keys)
        .map(|key| {
            let download = downloader(key.clone());
            async move { (key, download.await) }
        })
        .buffer_unordered(workers);

    let mut found = Vec::new();
    while let Some((key, result)) = fetched.next().await {
        match result {
            Ok(item) => found.push((key, item)),
            Err(err) if err.is_not_found() => {
                debug!(key = %key, "skipping vanished object");
            }
            Err(err) => return Err(err),
        }
    }
    found.sort_by(|(a, _), (b, _)| a.cmp(b));
    Ok(found.into_iter().map(|(_, item)| item).collect())
}

async fn join_all(tasks: &mut JoinSet<()>) -> Option<Error> {
    let mut failure = None;
    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            warn!(error = %err, "listing task failed");
            failure.get_or_insert(Error::from(err));
        }
    }
    failure
}
