use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use hex::FromHex;
use rand::thread_rng;

use crate::error::Error;

/// Unique, time-prefixed random identifier used for diamonds, splits,
/// generations and bundles.
///
/// The first four bytes carry the (truncated) creation time in
/// milliseconds, the rest is random. Ids render as 32 lowercase hex
/// characters so they can be embedded in metadata paths.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct Ufoid {
    data: [u8; 16],
}

impl Ufoid {
    pub const fn raw(data: [u8; 16]) -> Ufoid {
        Ufoid { data }
    }

    pub fn new() -> Ufoid {
        let mut rng = thread_rng();
        let now_in_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|since_epoch| since_epoch.as_millis())
            .unwrap_or_default();

        Self::new_with(now_in_ms as u32, &mut rng)
    }

    pub fn new_with(timestamp_ms: u32, rng: &mut dyn rand::RngCore) -> Ufoid {
        let mut id = Ufoid { data: [0; 16] };
        id.data[0..4].copy_from_slice(&timestamp_ms.to_be_bytes());
        rng.fill_bytes(&mut id.data[4..16]);
        id
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.data
    }
}

impl Default for Ufoid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Ufoid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.data))
    }
}

impl FromStr for Ufoid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let data = <[u8; 16]>::from_hex(s).map_err(|e| Error::InvalidId(format!("{s}: {e}")))?;
        Ok(Ufoid { data })
    }
}

/// Allocates a fresh id in its textual form.
pub fn fresh_id() -> String {
    Ufoid::new().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn unique() {
        assert!(Ufoid::new() != Ufoid::new());
    }

    #[test]
    fn time_prefix_orders_ids() {
        let mut rng = StdRng::seed_from_u64(7);
        let early = Ufoid::new_with(1, &mut rng);
        let late = Ufoid::new_with(2, &mut rng);
        assert!(early < late);
        assert!(early.to_string() < late.to_string());
    }

    #[test]
    fn parses_its_own_rendering() {
        let id = Ufoid::new();
        let text = id.to_string();
        assert_eq!(text.len(), 32);
        assert_eq!(text.parse::<Ufoid>().expect("valid id"), id);
        assert!("not-an-id".parse::<Ufoid>().is_err());
    }
}
