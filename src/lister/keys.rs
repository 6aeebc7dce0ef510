use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Error;
use crate::model::paths::{descriptor_stage, Stage};
use crate::store::KeyPage;

/// `cursor -> page of keys`, the pagination primitive behind every listing.
pub type KeyIterator = Arc<dyn Fn(String) -> BoxFuture<'static, Result<KeyPage, Error>> + Send + Sync>;

pub(crate) type KeyBatch = Result<Vec<String>, Error>;

/// Narrows `iterator` to keys whose file name starts with `name_prefix`.
pub fn basename_filter(name_prefix: &'static str, iterator: KeyIterator) -> KeyIterator {
    Arc::new(move |cursor: String| {
        let page = iterator(cursor);
        async move {
            let mut page = page.await?;
            page.keys.retain(|key| {
                let name = key.rsplit_once('/').map_or(key.as_str(), |(_, name)| name);
                name.starts_with(name_prefix)
            });
            Ok(page)
        }
        .boxed()
    })
}

/// Sends `item` unless `cancel` fires first, in which case a single
/// [`Error::Interrupted`] is offered without blocking.
///
/// Returns whether the consumer is still listening.
pub(crate) async fn deliver<T>(
    output: &mpsc::Sender<Result<T, Error>>,
    cancel: &CancellationToken,
    item: Result<T, Error>,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            let _ = output.try_send(Err(Error::Interrupted));
            false
        }
        sent = output.send(item) => sent.is_ok(),
    }
}

/// Drives `iterator` from an empty cursor until it reports an empty next
/// cursor, forwarding every non-empty batch.
///
/// The channel closes when this returns, after at most one error.
pub(crate) async fn fetch_keys(
    iterator: KeyIterator,
    output: mpsc::Sender<KeyBatch>,
    cancel: CancellationToken,
) {
    let mut cursor = String::new();
    loop {
        let page = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = output.try_send(Err(Error::Interrupted));
                return;
            }
            page = iterator(cursor.clone()) => page,
        };
        let page = match page {
            Ok(page) => page,
            Err(err) => {
                deliver(&output, &cancel, Err(err)).await;
                return;
            }
        };
        debug!(keys = page.keys.len(), next = %page.next, "fetched key batch");
        if !page.keys.is_empty() && !deliver(&output, &cancel, Ok(page.keys)).await {
            return;
        }
        if page.next.is_empty() || page.next == cursor {
            return;
        }
        cursor = page.next;
    }
}

/// Collapses the initial and final descriptor keys of every entity into
/// the most authoritative one.
///
/// Batches may overlap and repeat keys. An entity is released once the
/// listing has moved past it, so the output stays in key order as long as
/// the input batches do. Keys at or below the last released entity are
/// late and get dropped.
#[derive(Debug, Default)]
pub struct StateMerger {
    pending: BTreeMap<String, (Stage, String)>,
    last_released: Option<String>,
    frontier: Option<String>,
}

impl StateMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorbs a batch and returns the keys that are now settled.
    pub fn push(&mut self, mut keys: Vec<String>) -> Vec<String> {
        keys.sort_unstable();
        for key in keys {
            let Some((entity, stage)) = descriptor_stage(&key) else {
                continue;
            };
            if self.last_released.as_deref().is_some_and(|last| entity <= last) {
                debug!(key = %key, "dropping late descriptor key");
                continue;
            }
            if self.frontier.as_deref().is_none_or(|frontier| frontier < entity) {
                self.frontier = Some(entity.to_owned());
            }
            match self.pending.entry(entity.to_owned()) {
                Entry::Vacant(slot) => {
                    slot.insert((stage, key));
                }
                Entry::Occupied(mut slot) => {
                    if stage > slot.get().0 {
                        slot.insert((stage, key));
                    }
                }
            }
        }

        let Some(frontier) = self.frontier.as_deref() else {
            return Vec::new();
        };
        let unsettled = self.pending.split_off(frontier);
        let settled = std::mem::replace(&mut self.pending, unsettled);
        self.release(settled)
    }

    /// Releases everything still pending.
    pub fn finish(&mut self) -> Vec<String> {
        let settled = std::mem::take(&mut self.pending);
        self.release(settled)
    }

    fn release(&mut self, settled: BTreeMap<String, (Stage, String)>) -> Vec<String> {
        if let Some(last) = settled.keys().next_back() {
            self.last_released = Some(last.clone());
        }
        settled.into_values().map(|(_, key)| key).collect()
    }
}

pub(crate) async fn merge_keys(
    mut input: mpsc::Receiver<KeyBatch>,
    output: mpsc::Sender<KeyBatch>,
    cancel: CancellationToken,
) {
    let mut merger = StateMerger::new();
    loop {
        let batch = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = output.try_send(Err(Error::Interrupted));
                return;
            }
            batch = input.recv() => batch,
        };
        let keys = match batch {
            Some(Ok(keys)) => merger.push(keys),
            Some(Err(err)) => {
                deliver(&output, &cancel, Err(err)).await;
                return;
            }
            None => break,
        };
        if !keys.is_empty() && !deliver(&output, &cancel, Ok(keys)).await {
            return;
        }
    }
    let keys = merger.finish();
    if !keys.is_empty() {
        deliver(&output, &cancel, Ok(keys)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn final_stage_wins_regardless_of_arrival() {
        let mut merger = StateMerger::new();
        let mut out = merger.push(keys(&["d/s1/split-done.yaml", "d/s2/split-running.yaml"]));
        out.extend(merger.push(keys(&["d/s1/split-running.yaml", "d/s2/split-done.yaml"])));
        out.extend(merger.finish());
        assert_eq!(out, keys(&["d/s1/split-done.yaml", "d/s2/split-done.yaml"]));
    }

    #[test]
    fn holds_back_the_frontier_entity() {
        let mut merger = StateMerger::new();
        let out = merger.push(keys(&["d/a/split-running.yaml", "d/b/split-done.yaml"]));
        assert_eq!(out, keys(&["d/a/split-running.yaml"]));
        let out = merger.push(keys(&["d/b/split-running.yaml", "d/c/split-running.yaml"]));
        assert_eq!(out, keys(&["d/b/split-done.yaml"]));
        assert_eq!(merger.finish(), keys(&["d/c/split-running.yaml"]));
    }

    #[test]
    fn duplicates_are_emitted_once() {
        let mut merger = StateMerger::new();
        let mut out = merger.push(keys(&["d/a/split-done.yaml", "d/a/split-done.yaml"]));
        out.extend(merger.push(keys(&["d/a/split-done.yaml", "d/b/split-done.yaml"])));
        out.extend(merger.push(keys(&["d/a/split-done.yaml"])));
        out.extend(merger.finish());
        assert_eq!(out, keys(&["d/a/split-done.yaml", "d/b/split-done.yaml"]));
    }

    #[test]
    fn output_follows_key_order() {
        // "a-1/" sorts before "a/" just like the keys below them.
        let mut merger = StateMerger::new();
        let mut out = merger.push(keys(&["d/a/split-done.yaml", "d/a-1/split-done.yaml"]));
        out.extend(merger.finish());
        assert_eq!(out, keys(&["d/a-1/split-done.yaml", "d/a/split-done.yaml"]));
    }

    #[test]
    fn late_keys_below_the_released_frontier_are_dropped() {
        let mut merger = StateMerger::new();
        let out = merger.push(keys(&["d/b/split-done.yaml", "d/c/split-running.yaml"]));
        assert_eq!(out, keys(&["d/b/split-done.yaml"]));
        let out = merger.push(keys(&["d/a/split-done.yaml", "d/b/split-running.yaml", "d/d/split-running.yaml"]));
        assert_eq!(out, keys(&["d/c/split-running.yaml"]));
        assert_eq!(merger.last_released.as_deref(), Some("d/c/"));
        assert_eq!(merger.finish(), keys(&["d/d/split-running.yaml"]));
        assert_eq!(merger.last_released.as_deref(), Some("d/d/"));
        assert!(merger.push(keys(&["d/d/split-done.yaml"])).is_empty());
    }

    #[test]
    fn ignores_non_descriptor_keys() {
        let mut merger = StateMerger::new();
        let mut out = merger.push(keys(&["d/a/g/index-0.yaml", "d/a/split-done.yaml"]));
        out.extend(merger.finish());
        assert_eq!(out, keys(&["d/a/split-done.yaml"]));
    }

    #[tokio::test]
    async fn fetcher_walks_every_page() {
        let pages: KeyIterator = Arc::new(|cursor: String| {
            async move {
                let page = match cursor.as_str() {
                    "" => KeyPage {
                        keys: vec!["a".into(), "b".into()],
                        next: "b".into(),
                    },
                    "b" => KeyPage {
                        keys: vec!["c".into()],
                        next: String::new(),
                    },
                    other => panic!("unexpected cursor {other}"),
                };
                Ok(page)
            }
            .boxed()
        });
        let (tx, mut rx) = mpsc::channel(1);
        tokio::spawn(fetch_keys(pages, tx, CancellationToken::new()));
        let mut seen = Vec::new();
        while let Some(batch) = rx.recv().await {
            seen.extend(batch.unwrap());
        }
        assert_eq!(seen, keys(&["a", "b", "c"]));
    }

    #[tokio::test]
    async fn fetcher_reports_interruption_once() {
        let endless: KeyIterator = Arc::new(|cursor: String| {
            async move {
                Ok(KeyPage {
                    keys: vec![format!("{cursor}x")],
                    next: format!("{cursor}x"),
                })
            }
            .boxed()
        });
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(1);
        let task = tokio::spawn(fetch_keys(endless, tx, cancel.clone()));
        assert!(rx.recv().await.unwrap().is_ok());
        cancel.cancel();
        task.await.unwrap();

        let mut interrupted = 0;
        while let Some(batch) = rx.recv().await {
            if let Err(err) = batch {
                assert!(err.is_interrupted());
                interrupted += 1;
            }
        }
        assert!(interrupted <= 1);
    }
}
