#![allow(dead_code)]

use std::sync::Arc;

use bytes::Bytes;
use diamond_store::index::{pages, FileIndex};
use diamond_store::model::paths;
use diamond_store::prelude::*;
use diamond_store::store::OverwritePolicy;
use object_store::memory::InMemory;
use object_store::{path::Path, ObjectStore, PutPayload};
use tokio::sync::mpsc;

pub const REPO: &str = "datasets";

pub async fn stores_with_repo() -> Stores {
    let stores = Stores::in_memory();
    create_repo(REPO, "test data", Contributor::new("ann", "ann@example.com"), &stores)
        .await
        .expect("create repo");
    stores
}

/// Small pages and batches so that paging is exercised.
pub fn settings() -> Settings {
    Settings::default().with_entries_per_file(3).with_batch_size(2)
}

pub async fn source(files: &[(&str, &str)]) -> Arc<dyn ObjectStore> {
    let store = InMemory::new();
    for (name, content) in files {
        store
            .put(&Path::from(*name), PutPayload::from(Bytes::from(content.to_string())))
            .await
            .expect("seed source");
    }
    Arc::new(store)
}

pub async fn new_diamond(stores: &Stores, settings: &Settings, mode: ConflictMode) -> Diamond {
    let mut diamond = Diamond::new(REPO, stores.clone(), settings.clone()).with_mode(mode);
    diamond.create().await.expect("create diamond");
    diamond
}

pub fn entry(name: &str, hash: &str, nanos: i64) -> BundleEntry {
    BundleEntry {
        hash: hash.into(),
        name_with_path: name.into(),
        file_mode: 0o644,
        size: hash.len() as u64,
        timestamp: Some(Timestamp::from_nanos(nanos)),
    }
}

/// Publishes a done split whose index holds exactly `entries`.
pub async fn done_split(
    stores: &Stores,
    settings: &Settings,
    diamond_id: &str,
    split_id: &str,
    entries: Vec<BundleEntry>,
) -> SplitDescriptor {
    let mut split = Split::new(REPO, diamond_id, stores.clone(), settings.clone()).with_split_id(split_id);
    let mut descriptor = split.create().await.expect("create split");
    descriptor.generation_id = "g0".into();

    let mut index = FileIndex::new(
        stores.vmetadata.clone(),
        pages::upload_split(REPO, diamond_id, &descriptor),
        settings,
    );
    let (tx, rx) = mpsc::channel(entries.len().max(1));
    for entry in entries {
        tx.send(Ok(entry)).await.expect("queue entry");
    }
    drop(tx);
    descriptor.split_entries_file_count = index.upload(rx).await.expect("upload index");
    descriptor.state = SplitState::Done;
    descriptor.end_time = Some(Timestamp::now().expect("clock"));
    stores
        .vmetadata
        .put_yaml(
            &paths::final_split(REPO, diamond_id, split_id),
            &descriptor,
            OverwritePolicy::NoOverwrite,
        )
        .await
        .expect("publish split");
    descriptor
}

pub fn names(entries: &[BundleEntry]) -> Vec<&str> {
    entries.iter().map(|entry| entry.name_with_path.as_str()).collect()
}
