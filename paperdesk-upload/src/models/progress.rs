//! Percentages for the two kinds of progress a session reports
//!
//! Transfer progress (bytes sent for the batch) and processing progress
//! (server-side analysis of one paper) are separate types so one can never
//! be assigned to the other.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Percentage of batch bytes sent in the current attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferPercent(u8);

impl TransferPercent {
    pub const ZERO: Self = Self(0);
    pub const COMPLETE: Self = Self(100);

    /// Create a percentage, clamping to 100
    pub fn new(value: u8) -> Self {
        Self(value.min(100))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl fmt::Display for TransferPercent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Server-reported processing progress of one accepted paper
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "f64", into = "u8")]
pub struct ProcessingPercent(u8);

impl ProcessingPercent {
    pub const ZERO: Self = Self(0);
    pub const COMPLETE: Self = Self(100);

    /// Create a percentage, clamping to 100
    pub fn new(value: u8) -> Self {
        Self(value.min(100))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn is_complete(self) -> bool {
        self.0 >= 100
    }
}

impl From<u8> for ProcessingPercent {
    fn from(value: u8) -> Self {
        Self::new(value)
    }
}

/// Servers report processing progress as a JSON number, not always integral
impl From<f64> for ProcessingPercent {
    fn from(value: f64) -> Self {
        if value.is_nan() {
            return Self::ZERO;
        }
        Self(value.round().clamp(0.0, 100.0) as u8)
    }
}

impl From<ProcessingPercent> for u8 {
    fn from(value: ProcessingPercent) -> Self {
        value.0
    }
}

impl fmt::Display for ProcessingPercent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}
