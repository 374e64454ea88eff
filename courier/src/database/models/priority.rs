use serde::{Deserialize, Serialize};

/// Delivery priority shared by notifications and queued mail.
///
/// Stored as an integer rank so the queue can sort on it directly.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn rank(self) -> i64 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
            Self::Urgent => 3,
        }
    }

    pub fn from_rank(rank: i64) -> Option<Self> {
        match rank {
            0 => Some(Self::Low),
            1 => Some(Self::Normal),
            2 => Some(Self::High),
            3 => Some(Self::Urgent),
            _ => None,
        }
    }

    /// High and urgent work gets an early dispatch and a durable mail copy.
    pub fn is_elevated(self) -> bool {
        matches!(self, Self::High | Self::Urgent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_rank_round_trip() {
        for p in [Priority::Low, Priority::Normal, Priority::High, Priority::Urgent] {
            assert_eq!(Priority::from_rank(p.rank()), Some(p));
        }
        assert_eq!(Priority::from_rank(7), None);
    }

    #[test]
    fn test_ordering_matches_rank() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(Priority::from_str("URGENT").unwrap(), Priority::Urgent);
        assert_eq!(Priority::High.to_string(), "high");
        assert_eq!(
            serde_json::to_string(&Priority::Low).unwrap(),
            "\"low\""
        );
    }

    #[test]
    fn test_elevated() {
        assert!(Priority::Urgent.is_elevated());
        assert!(Priority::High.is_elevated());
        assert!(!Priority::Normal.is_elevated());
        assert!(!Priority::Low.is_elevated());
    }
}
