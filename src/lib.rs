//! Partitioned, distributed ingestion of dataset versions over object stores.
//!
//! A [`Diamond`] opens a write; any number of independent [`Split`]s
//! upload files into it; a commit merges their file indexes into one
//! immutable bundle. Every descriptor is published with no-overwrite puts,
//! so concurrent writers coordinate through the store alone.

pub mod bundle;
pub mod config;
pub mod diamond;
pub mod error;
pub mod id;
pub mod index;
pub mod lister;
pub mod model;
pub mod repo;
pub mod split;
pub mod store;
pub mod timestamp;

pub mod prelude {
    pub use crate::bundle::{bundle_entries, get_bundle};
    pub use crate::config::Settings;
    pub use crate::diamond::{get_diamond, list_diamonds, Diamond};
    pub use crate::error::Error;
    pub use crate::model::{
        BundleDescriptor, BundleEntry, ConflictMode, Contributor, DiamondDescriptor, DiamondState,
        SplitDescriptor, SplitState,
    };
    pub use crate::repo::{create_repo, get_repo};
    pub use crate::split::{get_split, list_splits, Split};
    pub use crate::store::Stores;
    pub use crate::timestamp::Timestamp;
}

pub use diamond::Diamond;
pub use error::Error;
pub use split::Split;
