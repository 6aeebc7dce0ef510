//! Descriptors persisted on the metadata stores and the deterministic layout
//! of their keys.

pub mod bundle;
pub mod diamond;
pub mod paths;
pub mod split;

pub use bundle::{BundleDescriptor, BundleEntry, Contributor, IndexPage, RepoDescriptor};
pub use diamond::{ConflictMode, DiamondDescriptor, DiamondState};
pub use paths::{ArchivePath, Stage};
pub use split::{SplitDescriptor, SplitState};
