use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// How many days ahead the server is asked for upcoming reminders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "f64", into = "u32")]
pub struct Horizon(u32);

impl Horizon {
    pub const MIN_DAYS: u32 = 1;
    pub const MAX_DAYS: u32 = 90;
    pub const DEFAULT_DAYS: u32 = 7;

    /// Validate user input. Non-finite and out-of-range values are rejected.
    pub fn new(days: f64) -> Result<Self> {
        if !days.is_finite() {
            return Err(Error::InvalidHorizon(format!("{} is not a finite number", days)));
        }
        if days < Self::MIN_DAYS as f64 || days > Self::MAX_DAYS as f64 {
            return Err(Error::InvalidHorizon(format!(
                "{} is outside {}..={} days",
                days,
                Self::MIN_DAYS,
                Self::MAX_DAYS
            )));
        }
        Ok(Self(days.round() as u32))
    }

    /// Coerce a stored value into range; garbage falls back to the default.
    pub fn clamped(days: f64) -> Self {
        if !days.is_finite() {
            return Self::default();
        }
        let clamped = days.round().clamp(Self::MIN_DAYS as f64, Self::MAX_DAYS as f64);
        Self(clamped as u32)
    }

    pub fn days(&self) -> u32 {
        self.0
    }
}

impl Default for Horizon {
    fn default() -> Self {
        Self(Self::DEFAULT_DAYS)
    }
}

impl From<f64> for Horizon {
    fn from(days: f64) -> Self {
        Self::clamped(days)
    }
}

impl From<Horizon> for u32 {
    fn from(h: Horizon) -> Self {
        h.0
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d", self.0)
    }
}
