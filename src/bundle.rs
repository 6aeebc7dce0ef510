//! Reading back committed bundles.

use tokio::sync::mpsc;

use crate::config::Settings;
use crate::error::Error;
use crate::index::{pages, FileIndex, PageEntries};
use crate::model::{paths, BundleDescriptor, BundleEntry};
use crate::store::{OverwritePolicy, Stores};

pub async fn get_bundle(repo: &str, bundle_id: &str, stores: &Stores) -> Result<BundleDescriptor, Error> {
    let bundle: BundleDescriptor = stores.metadata.get_yaml(&paths::bundle(repo, bundle_id)).await?;
    if bundle.id != bundle_id {
        return Err(Error::InvalidDescriptor(format!(
            "bundle descriptor {} stored under id {bundle_id}",
            bundle.id
        )));
    }
    Ok(bundle)
}

pub async fn bundle_exists(repo: &str, bundle_id: &str, stores: &Stores) -> Result<bool, Error> {
    stores.metadata.has(&paths::bundle(repo, bundle_id)).await
}

pub(crate) async fn put_bundle(repo: &str, bundle: &BundleDescriptor, stores: &Stores) -> Result<(), Error> {
    stores
        .metadata
        .put_yaml(&paths::bundle(repo, &bundle.id), bundle, OverwritePolicy::NoOverwrite)
        .await
}

/// All entries of a bundle, in page order.
pub async fn bundle_entries(
    repo: &str,
    bundle: &BundleDescriptor,
    stores: &Stores,
    settings: &Settings,
) -> Result<Vec<BundleEntry>, Error> {
    let mut index = FileIndex::new(
        stores.metadata.clone(),
        pages::download_bundle(repo, &bundle.id, bundle.bundle_entries_file_count),
        settings,
    );
    let (tx, mut rx) = mpsc::channel(settings.channel_buffer.max(1));
    let collect = async move {
        let mut pages: Vec<PageEntries> = Vec::new();
        while let Some(page) = rx.recv().await {
            pages.push(page);
        }
        pages
    };
    let (downloaded, mut pages) = tokio::join!(index.download(tx), collect);
    downloaded?;
    pages.sort_by_key(|page| page.index);
    Ok(pages.into_iter().flat_map(|page| page.entries).collect())
}
