//! Vote Fingerprint
//!
//! Deterministic SHA-256 audit fingerprint over the identifying fields of a
//! cast vote. The fingerprint is stored with the vote and doubles as the
//! idempotency key of the vote's change event.

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use crate::error::{require_non_empty, Result, VoteCoreError};
use crate::voting::types::VoteChoice;

/// Leading tag of the canonical encoding. Bumping it changes every
/// fingerprint, so it only moves together with a ledger migration.
pub const FINGERPRINT_VERSION: &str = "evote.vote.v1";

/// Compute the hex fingerprint of a vote.
///
/// Each field is length-prefixed (`<bytes>:<value>`) so no choice of
/// identifiers can shift a field boundary and collide with another vote.
pub fn fingerprint(
    shareholder_id: &str,
    resolution_id: &str,
    choice: VoteChoice,
    timestamp: &str,
) -> Result<String> {
    require_non_empty("shareholder_id", shareholder_id)?;
    require_non_empty("resolution_id", resolution_id)?;
    require_non_empty("timestamp", timestamp)?;
    DateTime::parse_from_rfc3339(timestamp).map_err(|e| {
        VoteCoreError::InvalidInput(format!("timestamp {:?} is not RFC 3339: {}", timestamp, e))
    })?;

    let canonical = canonical_string(shareholder_id, resolution_id, choice, timestamp);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

fn canonical_string(
    shareholder_id: &str,
    resolution_id: &str,
    choice: VoteChoice,
    timestamp: &str,
) -> String {
    let mut canonical = String::from(FINGERPRINT_VERSION);
    for field in [shareholder_id, resolution_id, choice.as_str(), timestamp] {
        canonical.push_str(&format!("|{}:{}", field.len(), field));
    }
    canonical
}

/// Canonical timestamp text used both for hashing and for storage.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}
