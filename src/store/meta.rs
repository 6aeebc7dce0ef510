use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::{FutureExt, StreamExt};
use object_store::memory::InMemory;
use object_store::{self, parse_url, path::Path, ObjectStore, PutMode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::error::Error;
use crate::lister::KeyIterator;

/// Whether a put may replace an existing object.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OverwritePolicy {
    NoOverwrite,
    Overwrite,
}

/// Whether the backend lists keys in ascending order.
///
/// Cloud stores and [`InMemory`] do; the local filesystem walks
/// directories in whatever order the OS returns them.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ListingOrder {
    Ordered,
    Unordered,
}

/// One page of a prefix listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyPage {
    pub keys: Vec<String>,
    /// Cursor for the next call, empty once the listing is exhausted.
    pub next: String,
}

/// Metadata store: a key/value view over an [`ObjectStore`] with
/// conditional puts and cursor-based prefix listings.
#[derive(Clone)]
pub struct MetaStore {
    store: Arc<dyn ObjectStore>,
    prefix: Path,
    order: ListingOrder,
}

impl fmt::Debug for MetaStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaStore")
            .field("prefix", &self.prefix)
            .field("order", &self.order)
            .finish()
    }
}

impl MetaStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self::with_prefix(store, Path::default())
    }

    pub fn with_prefix(store: Arc<dyn ObjectStore>, prefix: Path) -> Self {
        MetaStore {
            store,
            prefix,
            order: ListingOrder::Ordered,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    /// Creates a metadata store pointing at the object store described by `url`.
    pub fn with_url(url: &Url) -> Result<Self, Error> {
        let (store, prefix) = parse_url(url)?;
        let order = match url.scheme() {
            "file" => ListingOrder::Unordered,
            _ => ListingOrder::Ordered,
        };
        Ok(MetaStore {
            store: Arc::from(store),
            prefix,
            order,
        })
    }

    pub fn with_listing_order(mut self, order: ListingOrder) -> Self {
        self.order = order;
        self
    }

    /// A store rooted at `dir` below this one.
    pub fn child(&self, dir: &str) -> Self {
        MetaStore {
            store: self.store.clone(),
            prefix: self.prefix.child(dir),
            order: self.order,
        }
    }

    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    fn location(&self, key: &str) -> Path {
        let key = Path::from(key);
        self.prefix.parts().chain(key.parts()).collect()
    }

    fn key_of(&self, location: &Path) -> String {
        let raw: &str = location.as_ref();
        let prefix: &str = self.prefix.as_ref();
        if prefix.is_empty() {
            return raw.to_owned();
        }
        raw.strip_prefix(prefix)
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(raw)
            .to_owned()
    }

    pub async fn get(&self, key: &str) -> Result<Bytes, Error> {
        let object = self.store.get(&self.location(key)).await?;
        Ok(object.bytes().await?)
    }

    pub async fn put(&self, key: &str, bytes: Bytes, policy: OverwritePolicy) -> Result<(), Error> {
        let mode = match policy {
            OverwritePolicy::NoOverwrite => PutMode::Create,
            OverwritePolicy::Overwrite => PutMode::Overwrite,
        };
        self.store
            .put_opts(&self.location(key), bytes.into(), mode.into())
            .await?;
        Ok(())
    }

    pub async fn has(&self, key: &str) -> Result<bool, Error> {
        match self.store.head(&self.location(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), Error> {
        self.store.delete(&self.location(key)).await?;
        Ok(())
    }

    pub async fn get_yaml<T: DeserializeOwned>(&self, key: &str) -> Result<T, Error> {
        let bytes = self.get(key).await?;
        Ok(serde_yaml::from_slice(&bytes)?)
    }

    pub async fn put_yaml<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        policy: OverwritePolicy,
    ) -> Result<(), Error> {
        let yaml = serde_yaml::to_string(value)?;
        self.put(key, Bytes::from(yaml), policy).await
    }

    /// Lists at most `limit` keys starting with `prefix` and sorting after
    /// `cursor`, in ascending order.
    ///
    /// With delimiter `"/"` only the direct children of the prefix' directory
    /// are returned, sub-directories as keys with a trailing slash.
    pub async fn keys_prefix(
        &self,
        cursor: &str,
        prefix: &str,
        delimiter: &str,
        limit: usize,
    ) -> Result<KeyPage, Error> {
        let limit = limit.max(1);
        let dir = self.location(prefix.rsplit_once('/').map_or("", |(dir, _)| dir));
        let wanted = |key: &str| key.starts_with(prefix) && key > cursor;

        let mut keys = match (delimiter, self.order) {
            ("", ListingOrder::Ordered) => {
                let mut listing = if cursor.is_empty() {
                    self.store.list(Some(&dir))
                } else {
                    self.store.list_with_offset(Some(&dir), &self.location(cursor))
                };
                let mut keys = Vec::with_capacity(limit);
                while let Some(meta) = listing.next().await {
                    let key = self.key_of(&meta?.location);
                    if wanted(key.as_str()) {
                        keys.push(key);
                        if keys.len() == limit {
                            break;
                        }
                    }
                }
                keys
            }
            ("", ListingOrder::Unordered) => {
                let mut listing = self.store.list(Some(&dir));
                let mut smallest = BinaryHeap::with_capacity(limit + 1);
                while let Some(meta) = listing.next().await {
                    let key = self.key_of(&meta?.location);
                    if wanted(key.as_str()) {
                        smallest.push(key);
                        if smallest.len() > limit {
                            smallest.pop();
                        }
                    }
                }
                smallest.into_vec()
            }
            ("/", _) => {
                let listing = self.store.list_with_delimiter(Some(&dir)).await?;
                let objects = listing.objects.iter().map(|meta| self.key_of(&meta.location));
                let dirs = listing
                    .common_prefixes
                    .iter()
                    .map(|location| format!("{}/", self.key_of(location)));
                let mut keys: Vec<String> = objects.chain(dirs).filter(|key| wanted(key.as_str())).collect();
                keys.sort_unstable();
                keys.truncate(limit);
                keys
            }
            (other, _) => {
                return Err(Error::InvalidPath(format!(
                    "unsupported listing delimiter {other:?}"
                )))
            }
        };
        keys.sort_unstable();

        let next = if keys.len() == limit {
            keys.last().cloned().unwrap_or_default()
        } else {
            String::new()
        };
        Ok(KeyPage { keys, next })
    }

    /// Paginated listing of `prefix`, as consumed by the lister.
    pub fn key_iterator(&self, prefix: impl Into<String>, limit: usize) -> KeyIterator {
        let meta = self.clone();
        let prefix = prefix.into();
        Arc::new(move |cursor: String| {
            let meta = meta.clone();
            let prefix = prefix.clone();
            async move { meta.keys_prefix(&cursor, &prefix, "", limit).await }.boxed()
        })
    }
}
