use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::bundle::Contributor;
use crate::timestamp::Timestamp;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitState {
    #[default]
    Running,
    Done,
}

impl SplitState {
    pub fn as_str(self) -> &'static str {
        match self {
            SplitState::Running => "running",
            SplitState::Done => "done",
        }
    }
}

impl fmt::Display for SplitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One writer's contribution to a diamond.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SplitDescriptor {
    #[serde(rename = "SplitID")]
    pub split_id: String,
    pub state: SplitState,
    /// Regenerated on every upload attempt; index pages live under it.
    #[serde(rename = "GenerationID", default)]
    pub generation_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,
    pub start_time: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<Timestamp>,
    #[serde(default)]
    pub contributors: Vec<Contributor>,
    #[serde(default)]
    pub split_entries_file_count: u64,
}

impl SplitDescriptor {
    pub fn new(split_id: impl Into<String>, start_time: Timestamp) -> Self {
        SplitDescriptor {
            split_id: split_id.into(),
            state: SplitState::Running,
            generation_id: String::new(),
            tag: String::new(),
            start_time,
            end_time: None,
            contributors: Vec::new(),
            split_entries_file_count: 0,
        }
    }
}
