use serde::{Deserialize, Serialize};

use crate::timestamp::Timestamp;

/// Version stamped on every bundle written by this crate.
pub const CURRENT_BUNDLE_VERSION: u64 = 1;

/// Leaf size recorded in bundle descriptors (2 MiB).
pub const DEFAULT_LEAF_SIZE: u32 = 2 * 1024 * 1024;

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Contributor {
    pub name: String,
    #[serde(default)]
    pub email: String,
}

impl Contributor {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Contributor {
            name: name.into(),
            email: email.into(),
        }
    }
}

/// A file in a split or bundle.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BundleEntry {
    /// Content key of the file's data on the blob store.
    pub hash: String,
    pub name_with_path: String,
    #[serde(default)]
    pub file_mode: u32,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
}

/// Serialized form of an index page.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexPage {
    #[serde(rename = "BundleEntries", default)]
    pub entries: Vec<BundleEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BundleDescriptor {
    #[serde(rename = "ID")]
    pub id: String,
    pub leaf_size: u32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub contributors: Vec<Contributor>,
    pub bundle_entries_file_count: u64,
    pub version: u64,
    pub timestamp: Timestamp,
}

impl BundleDescriptor {
    pub fn new(id: impl Into<String>, timestamp: Timestamp) -> Self {
        BundleDescriptor {
            id: id.into(),
            leaf_size: DEFAULT_LEAF_SIZE,
            message: String::new(),
            contributors: Vec::new(),
            bundle_entries_file_count: 0,
            version: CURRENT_BUNDLE_VERSION,
            timestamp,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RepoDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub timestamp: Timestamp,
    pub contributor: Contributor,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_yaml_layout() {
        let page = IndexPage {
            entries: vec![BundleEntry {
                hash: "abc".into(),
                name_with_path: "dir/a.txt".into(),
                file_mode: 0o644,
                size: 12,
                timestamp: Some(Timestamp::from_nanos(9)),
            }],
        };
        let yaml = serde_yaml::to_string(&page).unwrap();
        assert!(yaml.starts_with("BundleEntries:"));
        assert!(yaml.contains("NameWithPath: dir/a.txt"));
        assert!(yaml.contains("Timestamp: 9"));
        let back: IndexPage = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, page);
    }

    #[test]
    fn bundle_descriptor_id_field() {
        let bundle = BundleDescriptor::new("b1", Timestamp::from_nanos(0));
        let yaml = serde_yaml::to_string(&bundle).unwrap();
        assert!(yaml.contains("ID: b1"));
        assert!(yaml.contains("BundleEntriesFileCount: 0"));
        assert!(yaml.contains("Version: 1"));
    }
}
