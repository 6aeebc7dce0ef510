use std::fmt;

use hifitime::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Logical write time of a file or descriptor.
///
/// Stored as TAI nanoseconds so timestamps compare as plain integers and
/// survive a YAML round-trip without precision loss.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const fn from_nanos(nanos: i64) -> Self {
        Timestamp(nanos)
    }

    pub fn now() -> Result<Self, Error> {
        let now = Epoch::now().map_err(|e| Error::Clock(e.to_string()))?;
        Self::from_epoch(now)
    }

    pub fn from_epoch(epoch: Epoch) -> Result<Self, Error> {
        let nanos = epoch.to_tai_duration().total_nanoseconds();
        i64::try_from(nanos)
            .map(Timestamp)
            .map_err(|_| Error::Clock(format!("{epoch} is out of range")))
    }

    pub fn to_epoch(self) -> Epoch {
        Epoch::from_tai_duration(Duration::from_total_nanoseconds(i128::from(self.0)))
    }

    pub fn nanos(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_epoch())
    }
}
