//! Pricing tiers and part numbering.
//!
//! A tier fixes how many sequential parts a report has and how urgently a
//! failed run is retried. Part numbers are validated once at construction so
//! the rest of the crate can index result slots without bounds surprises.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::DomainError;

/// Maximum number of parts any tier produces.
pub const MAX_PARTS: usize = 6;

/// Purchased service level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Observer: single-shot report.
    Standard,
    /// Insider: two-part report.
    Medium,
    /// Syndicate: six-part report.
    Full,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Medium => "medium",
            Self::Full => "full",
        }
    }

    /// Marketing name shown to users.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Standard => "Observer",
            Self::Medium => "Insider",
            Self::Full => "Syndicate",
        }
    }

    /// Number of sequential parts generated for this tier.
    pub fn part_count(&self) -> u8 {
        match self {
            Self::Standard => 1,
            Self::Medium => 2,
            Self::Full => 6,
        }
    }

    /// Whether generation is a single LLM call.
    pub fn is_single_shot(&self) -> bool {
        matches!(self, Self::Standard)
    }

    /// Retry queue priority for failed runs of this tier.
    pub fn queue_priority(&self) -> QueuePriority {
        match self {
            Self::Standard => QueuePriority::Low,
            Self::Medium => QueuePriority::Medium,
            Self::Full => QueuePriority::High,
        }
    }

    /// High-value tiers get an operator alert on terminal failure.
    pub fn alerts_operator_on_failure(&self) -> bool {
        matches!(self, Self::Medium | Self::Full)
    }

    /// Iterate over every part number of this tier in order.
    pub fn parts(&self) -> impl Iterator<Item = PartNumber> {
        (1..=self.part_count()).map(PartNumber)
    }

    pub fn all() -> [Tier; 3] {
        [Self::Standard, Self::Medium, Self::Full]
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" | "observer" => Ok(Self::Standard),
            "medium" | "insider" => Ok(Self::Medium),
            "full" | "syndicate" => Ok(Self::Full),
            other => Err(DomainError::ValidationFailed(format!("unknown tier: {other}"))),
        }
    }
}

/// Retry queue priority. Higher variants are processed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePriority {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl QueuePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Numeric rank stored in the database so `ORDER BY` can sort on it.
    pub fn rank(&self) -> i64 {
        *self as i64
    }

    pub fn from_rank(rank: i64) -> Option<Self> {
        match rank {
            1 => Some(Self::Low),
            2 => Some(Self::Medium),
            3 => Some(Self::High),
            _ => None,
        }
    }
}

impl fmt::Display for QueuePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A report part number in `1..=6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct PartNumber(u8);

impl PartNumber {
    pub const FIRST: PartNumber = PartNumber(1);

    /// Validate a raw part number against the global maximum.
    pub fn new(n: u8) -> Result<Self, DomainError> {
        if (1..=MAX_PARTS as u8).contains(&n) {
            Ok(Self(n))
        } else {
            Err(DomainError::InvalidPartNumber(n))
        }
    }

    /// Validate a raw part number against a tier's part count.
    pub fn for_tier(n: u8, tier: Tier) -> Result<Self, DomainError> {
        if n >= 1 && n <= tier.part_count() {
            Ok(Self(n))
        } else {
            Err(DomainError::InvalidPartNumber(n))
        }
    }

    pub fn get(&self) -> u8 {
        self.0
    }

    /// Zero-based slot index into a `[_; MAX_PARTS]` array.
    pub fn index(&self) -> usize {
        usize::from(self.0 - 1)
    }

    /// Next part, if it is still within `tier`.
    pub fn next_in(&self, tier: Tier) -> Option<Self> {
        let next = self.0 + 1;
        (next <= tier.part_count()).then_some(Self(next))
    }

    /// Name of the result column holding this part's content.
    pub fn column(&self) -> &'static str {
        match self.0 {
            1 => "part1",
            2 => "part2",
            3 => "part3",
            4 => "part4",
            5 => "part5",
            _ => "part6",
        }
    }
}

impl TryFrom<u8> for PartNumber {
    type Error = DomainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PartNumber> for u8 {
    fn from(value: PartNumber) -> Self {
        value.0
    }
}

impl fmt::Display for PartNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
