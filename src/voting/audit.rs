//! Ledger Verification
//!
//! Recomputes every stored fingerprint and re-derives the ledger rules from
//! the rows themselves, so a store whose constraints were dropped or
//! bypassed out of band still fails the audit. Read-only.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{info, warn};

use super::types::{ResolutionCategory, VoteChoice, VoteRecord};
use crate::database::Database;
use crate::error::Result;
use crate::tally::{ResolutionTally, TallyAggregator};

#[derive(Debug, Clone, Serialize)]
pub struct TamperedVote {
    pub id: i64,
    pub shareholder_id: String,
    pub resolution_id: String,
    pub stored_hash: String,
}

/// More than one director-election FOR by one shareholder in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SingleChoiceBreach {
    pub shareholder_id: String,
    pub voting_session_id: String,
    pub resolution_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerAudit {
    pub records_checked: u64,
    pub tampered: Vec<TamperedVote>,
    /// Tallies rebuilt from the stored records, ordered by resolution.
    pub tallies: Vec<ResolutionTally>,
    /// Resolutions that hold more votes than distinct voters.
    pub inconsistent_resolutions: Vec<String>,
    pub single_choice_breaches: Vec<SingleChoiceBreach>,
}

impl LedgerAudit {
    pub fn is_clean(&self) -> bool {
        self.tampered.is_empty()
            && self.inconsistent_resolutions.is_empty()
            && self.single_choice_breaches.is_empty()
    }

    /// Resolutions whose live tally differs from the audited one. Only
    /// meaningful while no votes are being cast.
    pub async fn stale_tallies(&self, aggregator: &TallyAggregator) -> Result<Vec<String>> {
        let mut stale = Vec::new();
        for audited in &self.tallies {
            let live = aggregator.snapshot(&audited.resolution_id).await?;
            if &live != audited {
                warn!(
                    "Live tally for {} ({} votes) disagrees with the ledger ({} votes)",
                    audited.resolution_id, live.total_count, audited.total_count
                );
                stale.push(audited.resolution_id.clone());
            }
        }
        Ok(stale)
    }
}

pub async fn verify_ledger(database: &Database) -> Result<LedgerAudit> {
    let rows = sqlx::query(
        r#"
        SELECT id, shareholder_id, resolution_id, voting_session_id, category, choice, hash, voted_at
        FROM votes ORDER BY id
        "#,
    )
    .fetch_all(database.pool())
    .await?;

    let mut tallies: BTreeMap<String, ResolutionTally> = BTreeMap::new();
    let mut voters: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut director_for: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();
    let mut tampered = Vec::new();

    for row in &rows {
        let record = VoteRecord::from_row(row)?;

        if !record.verify_hash() {
            warn!("Fingerprint mismatch on vote {}", record.id);
            tampered.push(TamperedVote {
                id: record.id,
                shareholder_id: record.shareholder_id.clone(),
                resolution_id: record.resolution_id.clone(),
                stored_hash: record.hash.clone(),
            });
        }

        tallies
            .entry(record.resolution_id.clone())
            .or_insert_with(|| ResolutionTally::new(record.resolution_id.clone()))
            .record(record.choice);
        voters
            .entry(record.resolution_id.clone())
            .or_default()
            .insert(record.shareholder_id.clone());

        if record.category == ResolutionCategory::DirectorElection
            && record.choice == VoteChoice::For
        {
            director_for
                .entry((record.shareholder_id, record.voting_session_id))
                .or_default()
                .push(record.resolution_id);
        }
    }

    let mut inconsistent_resolutions = Vec::new();
    for (resolution_id, tally) in &tallies {
        let distinct = voters.get(resolution_id).map_or(0, BTreeSet::len) as u64;
        if tally.total_count != distinct {
            warn!(
                "Resolution {} holds {} votes from {} voters",
                resolution_id, tally.total_count, distinct
            );
            inconsistent_resolutions.push(resolution_id.clone());
        }
    }

    let single_choice_breaches: Vec<SingleChoiceBreach> = director_for
        .into_iter()
        .filter(|(_, resolution_ids)| resolution_ids.len() > 1)
        .map(|((shareholder_id, voting_session_id), resolution_ids)| {
            warn!(
                "Shareholder {} voted FOR {} director candidates in session {}",
                shareholder_id,
                resolution_ids.len(),
                voting_session_id
            );
            SingleChoiceBreach {
                shareholder_id,
                voting_session_id,
                resolution_ids,
            }
        })
        .collect();

    info!(
        "Ledger verification checked {} votes across {} resolutions ({} tampered)",
        rows.len(),
        tallies.len(),
        tampered.len()
    );

    Ok(LedgerAudit {
        records_checked: rows.len() as u64,
        tampered,
        tallies: tallies.into_values().collect(),
        inconsistent_resolutions,
        single_choice_breaches,
    })
}
