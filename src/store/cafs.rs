use std::fmt;
use std::pin::pin;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt, TryStreamExt};
use hex::FromHex;
use object_store::memory::InMemory;
use object_store::{self, path::Path, ObjectStore, PutMode, WriteMultipart};

use crate::error::Error;
use crate::id::fresh_id;

const BLOB_INFIX: &str = "blobs";
const STAGING_INFIX: &str = "staging";
const MAX_PARTS_IN_FLIGHT: usize = 4;

/// blake3 digest addressing a blob.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ContentKey([u8; 32]);

impl ContentKey {
    pub fn of(data: &[u8]) -> Self {
        ContentKey(*blake3::hash(data).as_bytes())
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for ContentKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <[u8; 32]>::from_hex(s)
            .map(ContentKey)
            .map_err(|e| Error::InvalidId(format!("content key {s}: {e}")))
    }
}

/// Content-addressable blob store.
///
/// Blobs are written once under their digest; writing the same content
/// again is a no-op.
#[derive(Clone)]
pub struct Cafs {
    store: Arc<dyn ObjectStore>,
    prefix: Path,
}

impl fmt::Debug for Cafs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cafs").field("prefix", &self.prefix).finish()
    }
}

impl Cafs {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self::with_prefix(store, Path::default())
    }

    pub fn with_prefix(store: Arc<dyn ObjectStore>, prefix: Path) -> Self {
        Cafs { store, prefix }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    fn location(&self, key: &ContentKey) -> Path {
        self.prefix.child(BLOB_INFIX).child(key.to_string())
    }

    /// Stores `data`, returning its size and content key.
    pub async fn put(&self, data: Bytes) -> Result<(u64, ContentKey), Error> {
        let key = ContentKey::of(&data);
        let size = data.len() as u64;
        let result = self
            .store
            .put_opts(&self.location(&key), data.into(), PutMode::Create.into())
            .await;
        match result {
            Ok(_) | Err(object_store::Error::AlreadyExists { .. }) => Ok((size, key)),
            Err(e) => Err(e.into()),
        }
    }

    /// Streams `chunks` into the store, hashing them on the way.
    ///
    /// The upload lands under a staging location and is moved to its content
    /// key once the digest is known, so no more than the multipart buffers
    /// is held in memory.
    pub async fn put_stream<S>(&self, chunks: S) -> Result<(u64, ContentKey), Error>
    where
        S: Stream<Item = Result<Bytes, Error>> + Send,
    {
        let staging = self.prefix.child(STAGING_INFIX).child(fresh_id());
        let mut writer = WriteMultipart::new(self.store.put_multipart(&staging).await?);
        let mut hasher = blake3::Hasher::new();
        let mut size = 0;
        let mut chunks = pin!(chunks);
        while let Some(chunk) = chunks.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = writer.abort().await;
                    return Err(err);
                }
            };
            hasher.update(&chunk);
            size += chunk.len() as u64;
            writer.wait_for_capacity(MAX_PARTS_IN_FLIGHT).await?;
            writer.put(chunk);
        }
        writer.finish().await?;

        let key = ContentKey(*hasher.finalize().as_bytes());
        // the bytes under a key never differ, replacing an existing blob is a no-op
        self.store.rename(&staging, &self.location(&key)).await?;
        Ok((size, key))
    }

    pub async fn get(&self, key: &ContentKey) -> Result<Bytes, Error> {
        let object = self.store.get(&self.location(key)).await?;
        Ok(object.bytes().await?)
    }

    pub async fn get_stream(
        &self,
        key: &ContentKey,
    ) -> Result<BoxStream<'static, Result<Bytes, Error>>, Error> {
        let object = self.store.get(&self.location(key)).await?;
        Ok(object.into_stream().map_err(Error::from).boxed())
    }

    pub async fn has(&self, key: &ContentKey) -> Result<bool, Error> {
        match self.store.head(&self.location(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn deduplicates_identical_content() {
        let cafs = Cafs::in_memory();
        let (size, first) = cafs.put(Bytes::from_static(b"hello")).await.unwrap();
        let (_, second) = cafs.put(Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(size, 5);
        assert_eq!(first, second);
        assert_eq!(cafs.get(&first).await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(first.to_string().parse::<ContentKey>().unwrap(), first);
    }

    #[tokio::test]
    async fn streams_in_and_out() {
        let cafs = Cafs::in_memory();
        let chunks = stream::iter(vec![
            Ok(Bytes::from_static(b"hel")),
            Ok(Bytes::from_static(b"lo")),
        ]);
        let (size, key) = cafs.put_stream(chunks).await.unwrap();
        assert_eq!(size, 5);
        assert_eq!(key, ContentKey::of(b"hello"));

        let parts: Vec<Bytes> = cafs
            .get_stream(&key)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(parts.concat(), b"hello".to_vec());
        assert!(cafs.has(&key).await.unwrap());
        assert!(!cafs.has(&ContentKey::of(b"other")).await.unwrap());
    }

    async fn staged(cafs: &Cafs) -> usize {
        cafs.store
            .list(Some(&Path::from(STAGING_INFIX)))
            .try_collect::<Vec<_>>()
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn streamed_puts_leave_no_staging_behind() {
        let cafs = Cafs::in_memory();
        let chunk = Bytes::from(vec![7u8; 64 * 1024]);
        let chunks = stream::iter((0..100).map(|_| Ok(chunk.clone())));
        let (size, key) = cafs.put_stream(chunks).await.unwrap();
        assert_eq!(size, 100 * 64 * 1024);
        assert_eq!(key, ContentKey::of(&vec![7u8; 100 * 64 * 1024]));

        let (_, again) = cafs.put_stream(stream::iter(vec![Ok(chunk.clone())])).await.unwrap();
        assert_eq!(again, ContentKey::of(&chunk));
        let (empty, _) = cafs.put_stream(stream::iter(Vec::new())).await.unwrap();
        assert_eq!(empty, 0);
        assert_eq!(staged(&cafs).await, 0);
    }

    #[tokio::test]
    async fn failing_stream_stores_nothing() {
        let cafs = Cafs::in_memory();
        let chunks = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(Error::Interrupted),
        ]);
        assert!(cafs.put_stream(chunks).await.unwrap_err().is_interrupted());
        assert!(!cafs.has(&ContentKey::of(b"partial")).await.unwrap());
        assert_eq!(staged(&cafs).await, 0);
    }
}
