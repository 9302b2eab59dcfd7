// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job priority tiers and their entity-pool sizing.

use serde::{Deserialize, Serialize};

/// Dispatch priority for a submitted job.
///
/// Each tier owns a fixed pool of entity-id slots (see [`Priority::slot_count`]);
/// the router round-robins submissions across that pool to bound per-entity
/// mailbox contention while still biasing throughput toward higher tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Number of dedicated entity-id slots for this priority tier.
    pub fn slot_count(self) -> u32 {
        match self {
            Priority::Critical => 4,
            Priority::High => 3,
            Priority::Normal => 2,
            Priority::Low => 1,
        }
    }
}

crate::simple_display! {
    Priority {
        Critical => "critical",
        High => "high",
        Normal => "normal",
        Low => "low",
    }
}

impl std::str::FromStr for Priority {
    type Err = InvalidPriority;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(InvalidPriority(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InvalidPriority(pub String);

impl std::fmt::Display for InvalidPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid priority: {:?}", self.0)
    }
}

impl std::error::Error for InvalidPriority {}

#[cfg(test)]
mod tests {
    use super::*;

    #[yare::parameterized(
        critical = { Priority::Critical, 4 },
        high     = { Priority::High, 3 },
        normal   = { Priority::Normal, 2 },
        low      = { Priority::Low, 1 },
    )]
    fn slot_counts_match_spec(priority: Priority, expected: u32) {
        assert_eq!(priority.slot_count(), expected);
    }

    #[test]
    fn round_trips_through_display_and_from_str() {
        for p in [Priority::Critical, Priority::High, Priority::Normal, Priority::Low] {
            let parsed: Priority = p.to_string().parse().unwrap();
            assert_eq!(parsed, p);
        }
    }

    #[test]
    fn rejects_unknown_priority_strings() {
        assert!("urgent".parse::<Priority>().is_err());
    }
}
