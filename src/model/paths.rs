//! Key layout on the metadata stores.
//!
//! ```text
//! repos/{repo}/repo.yaml
//! diamonds/{repo}/{diamond}/diamond-initial.yaml
//! diamonds/{repo}/{diamond}/diamond-done.yaml
//! diamonds/{repo}/{diamond}/splits/{split}/split-running.yaml
//! diamonds/{repo}/{diamond}/splits/{split}/split-done.yaml
//! diamonds/{repo}/{diamond}/splits/{split}/{generation}/index-{n}.yaml
//! bundles/{repo}/{bundle}/bundle.yaml
//! bundles/{repo}/{bundle}/bundle-files-{n}.yaml
//! ```
//!
//! Every state transition publishes a new key instead of rewriting the
//! previous one, so all descriptor writes can be no-overwrite puts.

use crate::error::Error;
use crate::model::diamond::{ConflictMode, DiamondState};
use crate::model::split::SplitState;

const REPOS: &str = "repos";
const DIAMONDS: &str = "diamonds";
const SPLITS: &str = "splits";
const BUNDLES: &str = "bundles";

const REPO_FILE: &str = "repo.yaml";
const BUNDLE_FILE: &str = "bundle.yaml";
const EXT: &str = ".yaml";
const FINAL_SUFFIX: &str = "-done.yaml";
const SPLIT_INDEX_PREFIX: &str = "index-";
const BUNDLE_INDEX_PREFIX: &str = "bundle-files-";

pub const DIAMOND_PREFIX: &str = "diamond-";
pub const SPLIT_PREFIX: &str = "split-";

const INITIAL_DIAMOND_FILE: &str = "diamond-initial.yaml";
const FINAL_DIAMOND_FILE: &str = "diamond-done.yaml";
const INITIAL_SPLIT_FILE: &str = "split-running.yaml";
const FINAL_SPLIT_FILE: &str = "split-done.yaml";

const CONFLICTS_DIR: &str = ".conflicts";
const CHECKPOINTS_DIR: &str = ".checkpoints";

/// Which of the two descriptor copies a key designates.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Initial,
    Final,
}

pub fn repo(repo: &str) -> String {
    format!("{REPOS}/{repo}/{REPO_FILE}")
}

pub fn diamonds_prefix(repo: &str) -> String {
    format!("{DIAMONDS}/{repo}/")
}

pub fn diamond(repo: &str, diamond_id: &str, state: DiamondState) -> String {
    if state.is_terminal() {
        final_diamond(repo, diamond_id)
    } else {
        initial_diamond(repo, diamond_id)
    }
}

pub fn initial_diamond(repo: &str, diamond_id: &str) -> String {
    format!("{DIAMONDS}/{repo}/{diamond_id}/{INITIAL_DIAMOND_FILE}")
}

pub fn final_diamond(repo: &str, diamond_id: &str) -> String {
    format!("{DIAMONDS}/{repo}/{diamond_id}/{FINAL_DIAMOND_FILE}")
}

pub fn splits_prefix(repo: &str, diamond_id: &str) -> String {
    format!("{DIAMONDS}/{repo}/{diamond_id}/{SPLITS}/")
}

pub fn split(repo: &str, diamond_id: &str, split_id: &str, state: SplitState) -> String {
    match state {
        SplitState::Done => final_split(repo, diamond_id, split_id),
        SplitState::Running => initial_split(repo, diamond_id, split_id),
    }
}

pub fn initial_split(repo: &str, diamond_id: &str, split_id: &str) -> String {
    format!("{DIAMONDS}/{repo}/{diamond_id}/{SPLITS}/{split_id}/{INITIAL_SPLIT_FILE}")
}

pub fn final_split(repo: &str, diamond_id: &str, split_id: &str) -> String {
    format!("{DIAMONDS}/{repo}/{diamond_id}/{SPLITS}/{split_id}/{FINAL_SPLIT_FILE}")
}

pub fn split_index_page(
    repo: &str,
    diamond_id: &str,
    split_id: &str,
    generation_id: &str,
    index: u64,
) -> String {
    format!(
        "{DIAMONDS}/{repo}/{diamond_id}/{SPLITS}/{split_id}/{generation_id}/{SPLIT_INDEX_PREFIX}{index}{EXT}"
    )
}

pub fn bundle(repo: &str, bundle_id: &str) -> String {
    format!("{BUNDLES}/{repo}/{bundle_id}/{BUNDLE_FILE}")
}

pub fn bundle_index_page(repo: &str, bundle_id: &str, index: u64) -> String {
    format!("{BUNDLES}/{repo}/{bundle_id}/{BUNDLE_INDEX_PREFIX}{index}{EXT}")
}

pub fn conflict_path(split_id: &str, path: &str) -> String {
    format!("{CONFLICTS_DIR}/{split_id}/{}", path.trim_start_matches('/'))
}

pub fn checkpoint_path(split_id: &str, path: &str) -> String {
    format!("{CHECKPOINTS_DIR}/{split_id}/{}", path.trim_start_matches('/'))
}

/// Default renaming of a losing entry for the given mode.
pub fn deconflict_path(mode: ConflictMode, split_id: &str, path: &str) -> String {
    match mode {
        ConflictMode::EnableCheckpoints => checkpoint_path(split_id, path),
        _ => conflict_path(split_id, path),
    }
}

/// Splits a descriptor key into its entity (the key's directory, with a
/// trailing slash) and the stage it encodes.
///
/// Keeping the slash makes entities sort exactly like the keys they
/// contain. Keys that are not diamond or split descriptors yield `None`.
pub fn descriptor_stage(key: &str) -> Option<(&str, Stage)> {
    let (dir, file) = key.rsplit_once('/')?;
    let is_descriptor = (file.starts_with(DIAMOND_PREFIX) || file.starts_with(SPLIT_PREFIX))
        && file.ends_with(EXT);
    if !is_descriptor {
        return None;
    }
    let entity = &key[..dir.len() + 1];
    if file.ends_with(FINAL_SUFFIX) {
        Some((entity, Stage::Final))
    } else {
        Some((entity, Stage::Initial))
    }
}

/// The identity encoded in a metadata key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArchivePath {
    Repo {
        repo: String,
    },
    Diamond {
        repo: String,
        diamond_id: String,
        stage: Stage,
    },
    Split {
        repo: String,
        diamond_id: String,
        split_id: String,
        stage: Stage,
    },
    SplitIndex {
        repo: String,
        diamond_id: String,
        split_id: String,
        generation_id: String,
        index: u64,
    },
    Bundle {
        repo: String,
        bundle_id: String,
    },
    BundleIndex {
        repo: String,
        bundle_id: String,
        index: u64,
    },
}

impl ArchivePath {
    pub fn parse(key: &str) -> Result<ArchivePath, Error> {
        let invalid = || Error::InvalidPath(key.to_owned());
        let components: Vec<&str> = key.split('/').collect();
        let parsed = match components.as_slice() {
            [REPOS, repo, REPO_FILE] => ArchivePath::Repo {
                repo: repo.to_string(),
            },
            [DIAMONDS, repo, diamond_id, file] => {
                let stage = match *file {
                    INITIAL_DIAMOND_FILE => Stage::Initial,
                    FINAL_DIAMOND_FILE => Stage::Final,
                    _ => return Err(invalid()),
                };
                ArchivePath::Diamond {
                    repo: repo.to_string(),
                    diamond_id: diamond_id.to_string(),
                    stage,
                }
            }
            [DIAMONDS, repo, diamond_id, SPLITS, split_id, file] => {
                let stage = match *file {
                    INITIAL_SPLIT_FILE => Stage::Initial,
                    FINAL_SPLIT_FILE => Stage::Final,
                    _ => return Err(invalid()),
                };
                ArchivePath::Split {
                    repo: repo.to_string(),
                    diamond_id: diamond_id.to_string(),
                    split_id: split_id.to_string(),
                    stage,
                }
            }
            [DIAMONDS, repo, diamond_id, SPLITS, split_id, generation_id, file] => {
                ArchivePath::SplitIndex {
                    repo: repo.to_string(),
                    diamond_id: diamond_id.to_string(),
                    split_id: split_id.to_string(),
                    generation_id: generation_id.to_string(),
                    index: page_number(file, SPLIT_INDEX_PREFIX).ok_or_else(invalid)?,
                }
            }
            [BUNDLES, repo, bundle_id, BUNDLE_FILE] => ArchivePath::Bundle {
                repo: repo.to_string(),
                bundle_id: bundle_id.to_string(),
            },
            [BUNDLES, repo, bundle_id, file] => ArchivePath::BundleIndex {
                repo: repo.to_string(),
                bundle_id: bundle_id.to_string(),
                index: page_number(file, BUNDLE_INDEX_PREFIX).ok_or_else(invalid)?,
            },
            _ => return Err(invalid()),
        };
        Ok(parsed)
    }
}

fn page_number(file: &str, prefix: &str) -> Option<u64> {
    file.strip_prefix(prefix)?.strip_suffix(EXT)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        assert_eq!(repo("r"), "repos/r/repo.yaml");
        assert_eq!(
            diamond("r", "d", DiamondState::Initialized),
            "diamonds/r/d/diamond-initial.yaml"
        );
        assert_eq!(
            diamond("r", "d", DiamondState::Canceled),
            "diamonds/r/d/diamond-done.yaml"
        );
        assert_eq!(
            split("r", "d", "s", SplitState::Running),
            "diamonds/r/d/splits/s/split-running.yaml"
        );
        assert_eq!(
            split_index_page("r", "d", "s", "g", 3),
            "diamonds/r/d/splits/s/g/index-3.yaml"
        );
        assert_eq!(bundle("r", "b"), "bundles/r/b/bundle.yaml");
        assert_eq!(bundle_index_page("r", "b", 0), "bundles/r/b/bundle-files-0.yaml");
    }

    #[test]
    fn deconflicted_names() {
        assert_eq!(conflict_path("s1", "a/b.txt"), ".conflicts/s1/a/b.txt");
        assert_eq!(
            deconflict_path(ConflictMode::EnableCheckpoints, "s1", "/a.txt"),
            ".checkpoints/s1/a.txt"
        );
    }

    #[test]
    fn stages_and_entities() {
        let (entity, stage) = descriptor_stage("diamonds/r/d/splits/s/split-done.yaml").unwrap();
        assert_eq!(entity, "diamonds/r/d/splits/s/");
        assert_eq!(stage, Stage::Final);
        let (_, stage) = descriptor_stage("diamonds/r/d/diamond-initial.yaml").unwrap();
        assert_eq!(stage, Stage::Initial);
        assert!(descriptor_stage("diamonds/r/d/splits/s/g/index-0.yaml").is_none());
    }

    #[test]
    fn parse_round_trips_layout() {
        assert_eq!(
            ArchivePath::parse(&final_split("r", "d", "s")).unwrap(),
            ArchivePath::Split {
                repo: "r".into(),
                diamond_id: "d".into(),
                split_id: "s".into(),
                stage: Stage::Final,
            }
        );
        assert_eq!(
            ArchivePath::parse(&bundle_index_page("r", "b", 12)).unwrap(),
            ArchivePath::BundleIndex {
                repo: "r".into(),
                bundle_id: "b".into(),
                index: 12,
            }
        );
        assert!(ArchivePath::parse("diamonds/r/d/other.yaml").is_err());
        assert!(ArchivePath::parse("bundles/r/b/bundle-files-x.yaml").is_err());
    }
}
