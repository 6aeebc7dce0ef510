//! Chunked index: bundle entries stored as fixed-capacity YAML pages.

pub mod pages;

pub use pages::{IndexPages, PagedObjects, Pather};

use bytes::Bytes;
use futures::{stream, StreamExt, TryStreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::Settings;
use crate::error::Error;
use crate::model::{BundleEntry, IndexPage};
use crate::store::{MetaStore, OverwritePolicy};

/// The entries of one downloaded page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageEntries {
    /// Id of the object the page belongs to (split or bundle).
    pub id: String,
    pub index: u64,
    pub entries: Vec<BundleEntry>,
}

pub struct FileIndex {
    meta: MetaStore,
    objects: PagedObjects,
    concurrency: usize,
    entries_per_file: usize,
}

impl FileIndex {
    pub fn new(meta: MetaStore, objects: PagedObjects, settings: &Settings) -> Self {
        FileIndex {
            meta,
            objects,
            concurrency: settings.concurrent_filelist_downloads.max(1),
            entries_per_file: settings.entries_per_file.max(1),
        }
    }

    /// Writes incoming entries as pages of the first addressed object.
    ///
    /// Pages are never overwritten. Returns the number of pages written;
    /// the first error received on `input` aborts the upload.
    pub async fn upload(
        &mut self,
        mut input: mpsc::Receiver<Result<BundleEntry, Error>>,
    ) -> Result<u64, Error> {
        let Some(mut pages) = self.objects.next() else {
            return Err(Error::InvalidDescriptor("no index to upload to".into()));
        };
        let mut written = 0;
        let mut buffer = Vec::with_capacity(self.entries_per_file);
        while let Some(entry) = input.recv().await {
            buffer.push(entry?);
            if buffer.len() == self.entries_per_file {
                let entries = std::mem::replace(&mut buffer, Vec::with_capacity(self.entries_per_file));
                self.write_page(&mut pages, entries).await?;
                written += 1;
            }
        }
        if !buffer.is_empty() {
            self.write_page(&mut pages, buffer).await?;
            written += 1;
        }
        info!(id = %pages.id(), pages = written, "index uploaded");
        Ok(written)
    }

    async fn write_page(&self, pages: &mut IndexPages, entries: Vec<BundleEntry>) -> Result<(), Error> {
        let path = pages
            .next()
            .ok_or_else(|| Error::InvalidDescriptor(format!("index {} is full", pages.id())))?;
        debug!(path = %path, entries = entries.len(), "writing index page");
        self.meta
            .put_yaml(&path, &IndexPage { entries }, OverwritePolicy::NoOverwrite)
            .await
    }

    /// Sends the entries of every page of every addressed object to `output`.
    ///
    /// Pages are fetched concurrently and arrive in no particular order. The
    /// first failure aborts the download; a receiver that hangs up yields
    /// [`Error::Interrupted`].
    pub async fn download(&mut self, output: mpsc::Sender<PageEntries>) -> Result<(), Error> {
        let locations = self.locations()?;
        let meta = self.meta.clone();
        let mut fetched = stream::iter(locations)
            .map(|(id, index, path)| {
                let meta = meta.clone();
                async move {
                    let page = read_page(&meta, &path).await?;
                    Ok::<_, Error>(PageEntries {
                        id,
                        index,
                        entries: page.entries,
                    })
                }
            })
            .buffer_unordered(self.concurrency);

        while let Some(page) = fetched.next().await {
            let page = page?;
            debug!(id = %page.id, index = page.index, entries = page.entries.len(), "index page downloaded");
            if output.send(page).await.is_err() {
                return Err(Error::Interrupted);
            }
        }
        Ok(())
    }

    /// Overwrites every addressed page with an empty payload.
    pub async fn reset(&mut self) -> Result<(), Error> {
        let locations = self.locations()?;
        let meta = self.meta.clone();
        stream::iter(locations.into_iter().map(Ok))
            .try_for_each_concurrent(self.concurrency, |(_, _, path)| {
                let meta = meta.clone();
                async move {
                    debug!(path = %path, "resetting index page");
                    meta.put(&path, Bytes::new(), OverwritePolicy::Overwrite).await
                }
            })
            .await
    }

    fn locations(&mut self) -> Result<Vec<(String, u64, String)>, Error> {
        let objects: Vec<IndexPages> = self.objects.by_ref().collect();
        if let Some(open) = objects.iter().find(|pages| !pages.is_bounded()) {
            return Err(Error::InvalidDescriptor(format!(
                "index {} has no known page count",
                open.id()
            )));
        }
        Ok(objects
            .into_iter()
            .flat_map(|pages| {
                let id = pages.id().to_owned();
                pages
                    .enumerate()
                    .map(move |(index, path)| (id.clone(), index as u64, path))
            })
            .collect())
    }
}

async fn read_page(meta: &MetaStore, path: &str) -> Result<IndexPage, Error> {
    let bytes = meta.get(path).await?;
    if bytes.is_empty() {
        return Ok(IndexPage::default());
    }
    Ok(serde_yaml::from_slice(&bytes)?)
}
