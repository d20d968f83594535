//! Vote Ledger Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::crypto::{fingerprint, format_timestamp};
use crate::database::models::parse_timestamp;
use crate::error::{Result, VoteCoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VoteChoice {
    For,
    Against,
    Abstain,
}

impl VoteChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteChoice::For => "FOR",
            VoteChoice::Against => "AGAINST",
            VoteChoice::Abstain => "ABSTAIN",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "FOR" => Some(VoteChoice::For),
            "AGAINST" => Some(VoteChoice::Against),
            "ABSTAIN" => Some(VoteChoice::Abstain),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionCategory {
    Ordinary,
    /// One nominee per resolution; a shareholder may vote FOR at most one
    /// nominee across the director elections of a voting session.
    DirectorElection,
}

impl ResolutionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionCategory::Ordinary => "ordinary",
            ResolutionCategory::DirectorElection => "director_election",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ordinary" => Some(ResolutionCategory::Ordinary),
            "director_election" => Some(ResolutionCategory::DirectorElection),
            _ => None,
        }
    }
}

/// The resolution a vote is cast on, as known to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub id: String,
    pub voting_session_id: String,
    pub category: ResolutionCategory,
}

impl Resolution {
    pub fn ordinary(id: impl Into<String>, voting_session_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            voting_session_id: voting_session_id.into(),
            category: ResolutionCategory::Ordinary,
        }
    }

    pub fn director_election(id: impl Into<String>, voting_session_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            voting_session_id: voting_session_id.into(),
            category: ResolutionCategory::DirectorElection,
        }
    }
}

/// A cast vote. Never updated or deleted once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub id: i64,
    pub shareholder_id: String,
    pub resolution_id: String,
    pub voting_session_id: String,
    pub category: ResolutionCategory,
    pub choice: VoteChoice,
    pub hash: String,
    pub voted_at: DateTime<Utc>,
}

impl VoteRecord {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        let category = row.try_get::<String, _>("category")?;
        let choice = row.try_get::<String, _>("choice")?;

        Ok(Self {
            id: row.try_get("id")?,
            shareholder_id: row.try_get("shareholder_id")?,
            resolution_id: row.try_get("resolution_id")?,
            voting_session_id: row.try_get("voting_session_id")?,
            category: ResolutionCategory::from_str(&category).ok_or_else(|| {
                VoteCoreError::DatabaseError(format!("Invalid resolution category: {}", category))
            })?,
            choice: VoteChoice::from_str(&choice).ok_or_else(|| {
                VoteCoreError::DatabaseError(format!("Invalid vote choice: {}", choice))
            })?,
            hash: row.try_get("hash")?,
            voted_at: parse_timestamp(&row.try_get::<String, _>("voted_at")?)?,
        })
    }

    /// Recompute the fingerprint from the stored fields and compare it with
    /// the stored hash.
    pub fn verify_hash(&self) -> bool {
        match fingerprint(
            &self.shareholder_id,
            &self.resolution_id,
            self.choice,
            &format_timestamp(&self.voted_at),
        ) {
            Ok(expected) => expected == self.hash,
            Err(_) => false,
        }
    }

    pub fn event(&self) -> VoteEvent {
        VoteEvent {
            resolution_id: self.resolution_id.clone(),
            choice: self.choice,
            hash: self.hash.clone(),
            voted_at: self.voted_at,
        }
    }
}

/// Result of a vote submission. Rejections name the violated rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CastVoteOutcome {
    Recorded(VoteRecord),
    AlreadyVoted,
    SingleChoiceViolation,
}

impl CastVoteOutcome {
    pub fn record(&self) -> Option<&VoteRecord> {
        match self {
            CastVoteOutcome::Recorded(record) => Some(record),
            _ => None,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            CastVoteOutcome::Recorded(_) => "Your vote has been recorded",
            CastVoteOutcome::AlreadyVoted => "You have already voted on this resolution",
            CastVoteOutcome::SingleChoiceViolation => {
                "You have already voted FOR another director candidate in this session"
            }
        }
    }
}

/// Outcome of looking up a vote receipt (the fingerprint handed to the
/// shareholder after voting).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptStatus {
    Valid(VoteRecord),
    /// A record carries this hash but its fields no longer produce it.
    Tampered(VoteRecord),
    Unknown,
}

/// Change event emitted for every recorded vote. `hash` is the
/// idempotency key: applying the same event twice must not count twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteEvent {
    pub resolution_id: String,
    pub choice: VoteChoice,
    pub hash: String,
    pub voted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_choice_round_trips_through_storage_text() {
        for choice in [VoteChoice::For, VoteChoice::Against, VoteChoice::Abstain] {
            assert_eq!(VoteChoice::from_str(choice.as_str()), Some(choice));
        }
        assert_eq!(VoteChoice::from_str("for"), None);
        assert_eq!(
            ResolutionCategory::from_str("director_election"),
            Some(ResolutionCategory::DirectorElection)
        );
    }

    #[test]
    fn test_choice_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&VoteChoice::Abstain).unwrap(), "\"ABSTAIN\"");
    }

    #[test]
    fn test_verify_hash_detects_altered_choice() {
        let voted_at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let hash = fingerprint("sh-42", "res-1", VoteChoice::For, &format_timestamp(&voted_at))
            .unwrap();
        let mut record = VoteRecord {
            id: 1,
            shareholder_id: "sh-42".to_string(),
            resolution_id: "res-1".to_string(),
            voting_session_id: "agm-2024".to_string(),
            category: ResolutionCategory::Ordinary,
            choice: VoteChoice::For,
            hash,
            voted_at,
        };
        assert!(record.verify_hash());

        record.choice = VoteChoice::Against;
        assert!(!record.verify_hash());
    }
}
