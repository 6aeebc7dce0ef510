use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::model::split::SplitDescriptor;
use crate::timestamp::Timestamp;

/// Lifecycle of a diamond.
///
/// `Initialized` and the terminal `Done`/`Canceled` are the only states
/// ever persisted. `Committing` lives in memory while a commit runs.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiamondState {
    #[default]
    Initialized,
    Running,
    Committing,
    Done,
    Canceled,
}

impl DiamondState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DiamondState::Done | DiamondState::Canceled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DiamondState::Initialized => "initialized",
            DiamondState::Running => "running",
            DiamondState::Committing => "committing",
            DiamondState::Done => "done",
            DiamondState::Canceled => "canceled",
        }
    }
}

impl fmt::Display for DiamondState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a commit does when two splits disagree on the content of a file.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictMode {
    /// The most recent version wins, the others are dropped.
    #[serde(rename = "ignored")]
    IgnoreConflicts,
    /// Losing versions are kept under `.checkpoints/{split}/`.
    #[serde(rename = "enable-checkpoints")]
    EnableCheckpoints,
    /// Losing versions are kept under `.conflicts/{split}/`.
    #[default]
    #[serde(rename = "enable-conflicts")]
    EnableConflicts,
    /// Any conflict fails the commit.
    #[serde(rename = "forbids-conflicts")]
    ForbidConflicts,
}

impl ConflictMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictMode::IgnoreConflicts => "ignored",
            ConflictMode::EnableCheckpoints => "enable-checkpoints",
            ConflictMode::EnableConflicts => "enable-conflicts",
            ConflictMode::ForbidConflicts => "forbids-conflicts",
        }
    }
}

impl fmt::Display for ConflictMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ignored" => Ok(ConflictMode::IgnoreConflicts),
            "enable-checkpoints" => Ok(ConflictMode::EnableCheckpoints),
            "enable-conflicts" => Ok(ConflictMode::EnableConflicts),
            "forbids-conflicts" => Ok(ConflictMode::ForbidConflicts),
            other => Err(Error::InvalidDescriptor(format!(
                "unknown conflict mode {other:?}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DiamondDescriptor {
    #[serde(rename = "DiamondID")]
    pub diamond_id: String,
    pub state: DiamondState,
    #[serde(default)]
    pub mode: ConflictMode,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,
    pub start_time: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<Timestamp>,
    #[serde(rename = "BundleID", default, skip_serializing_if = "String::is_empty")]
    pub bundle_id: String,
    /// Splits collected by a successful commit.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub splits: Vec<SplitDescriptor>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub has_conflicts: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub has_checkpoints: bool,
}

impl DiamondDescriptor {
    pub fn new(diamond_id: impl Into<String>, start_time: Timestamp) -> Self {
        DiamondDescriptor {
            diamond_id: diamond_id.into(),
            state: DiamondState::Initialized,
            mode: ConflictMode::default(),
            tag: String::new(),
            start_time,
            end_time: None,
            bundle_id: String::new(),
            splits: Vec::new(),
            has_conflicts: false,
            has_checkpoints: false,
        }
    }
}
