//! Storage collaborators: metadata stores and the content-addressable
//! blob store, all backed by [`object_store`].

pub mod cafs;
pub mod meta;

pub use cafs::{Cafs, ContentKey};
pub use meta::{KeyPage, ListingOrder, MetaStore, OverwritePolicy};

use url::Url;

use crate::error::Error;

/// The stores a repository works against.
///
/// `metadata` holds repositories and bundles, `vmetadata` the volatile
/// diamond and split descriptors with their index pages, `blobs` the file
/// contents.
#[derive(Clone, Debug)]
pub struct Stores {
    pub metadata: MetaStore,
    pub vmetadata: MetaStore,
    pub blobs: Cafs,
}

impl Stores {
    pub fn new(metadata: MetaStore, vmetadata: MetaStore, blobs: Cafs) -> Self {
        Stores {
            metadata,
            vmetadata,
            blobs,
        }
    }

    pub fn in_memory() -> Self {
        Stores {
            metadata: MetaStore::in_memory(),
            vmetadata: MetaStore::in_memory(),
            blobs: Cafs::in_memory(),
        }
    }

    /// Lays out all three stores below the location described by `url`.
    pub fn with_url(url: &Url) -> Result<Self, Error> {
        let root = MetaStore::with_url(url)?;
        Ok(Stores {
            metadata: root.child("metadata"),
            vmetadata: root.child("vmetadata"),
            blobs: Cafs::with_prefix(root.object_store().clone(), root.prefix().clone()),
        })
    }
}
