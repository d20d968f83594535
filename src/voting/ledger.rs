//! Vote submission and lookup.
//!
//! The pre-checks here are a fast path only. The store's unique
//! constraints decide races: a unique violation on insert is reported as
//! the matching rejection, never as a storage failure.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, SubsecRound, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::types::*;
use crate::crypto::{fingerprint, format_timestamp};
use crate::database::models::parse_optional_timestamp;
use crate::database::{is_unique_violation, Database};
use crate::error::{require_non_empty, Result};
use crate::tally::TallyAggregator;

const VOTE_COLUMNS: &str = "id, shareholder_id, resolution_id, voting_session_id, category, choice, hash, voted_at";

pub struct VoteLedger {
    database: Database,
    aggregator: Arc<TallyAggregator>,
    events: broadcast::Sender<VoteEvent>,
    /// Last timestamp handed out; keeps `voted_at` strictly increasing.
    last_voted_at: Mutex<Option<DateTime<Utc>>>,
}

impl VoteLedger {
    /// Open the ledger, seeding the vote clock from the newest stored vote.
    pub async fn open(
        database: Database,
        aggregator: Arc<TallyAggregator>,
        event_channel_capacity: usize,
    ) -> Result<Self> {
        let latest: Option<String> = sqlx::query_scalar("SELECT MAX(voted_at) FROM votes")
            .fetch_one(database.pool())
            .await?;
        let (events, _) = broadcast::channel(event_channel_capacity);

        Ok(Self {
            database,
            aggregator,
            events,
            last_voted_at: Mutex::new(parse_optional_timestamp(latest)?),
        })
    }

    /// Change events for every recorded vote (at-least-once consumers must
    /// deduplicate by hash).
    pub fn subscribe_events(&self) -> broadcast::Receiver<VoteEvent> {
        self.events.subscribe()
    }

    pub fn aggregator(&self) -> &Arc<TallyAggregator> {
        &self.aggregator
    }

    /// Cast a vote. Only `CastVoteOutcome::Recorded` means the vote exists.
    pub async fn cast_vote(
        &self,
        shareholder_id: &str,
        resolution: &Resolution,
        choice: VoteChoice,
    ) -> Result<CastVoteOutcome> {
        require_non_empty("shareholder_id", shareholder_id)?;
        require_non_empty("resolution_id", &resolution.id)?;
        require_non_empty("voting_session_id", &resolution.voting_session_id)?;

        if self.get_vote(shareholder_id, &resolution.id).await?.is_some() {
            info!(
                "Rejected vote from {} on {}: already voted",
                shareholder_id, resolution.id
            );
            return Ok(CastVoteOutcome::AlreadyVoted);
        }

        if resolution.category == ResolutionCategory::DirectorElection
            && choice == VoteChoice::For
            && self
                .has_director_for_vote(shareholder_id, &resolution.voting_session_id)
                .await?
        {
            info!(
                "Rejected vote from {} on {}: FOR already cast in session {}",
                shareholder_id, resolution.id, resolution.voting_session_id
            );
            return Ok(CastVoteOutcome::SingleChoiceViolation);
        }

        let voted_at = self.next_timestamp();
        let voted_at_text = format_timestamp(&voted_at);
        let hash = fingerprint(shareholder_id, &resolution.id, choice, &voted_at_text)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO votes
            (shareholder_id, resolution_id, voting_session_id, category, choice, hash, voted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(shareholder_id)
        .bind(&resolution.id)
        .bind(&resolution.voting_session_id)
        .bind(resolution.category.as_str())
        .bind(choice.as_str())
        .bind(&hash)
        .bind(&voted_at_text)
        .execute(self.database.pool())
        .await;

        let id = match inserted {
            Ok(result) => result.last_insert_rowid(),
            Err(e) if is_unique_violation(&e) => {
                let outcome = self.rejection_after_conflict(shareholder_id, &resolution.id).await?;
                info!(
                    "Rejected vote from {} on {} at commit: {}",
                    shareholder_id,
                    resolution.id,
                    outcome.user_message()
                );
                return Ok(outcome);
            }
            Err(e) => return Err(e.into()),
        };

        let record = VoteRecord {
            id,
            shareholder_id: shareholder_id.to_string(),
            resolution_id: resolution.id.clone(),
            voting_session_id: resolution.voting_session_id.clone(),
            category: resolution.category,
            choice,
            hash,
            voted_at,
        };
        info!(
            "Recorded {} vote from {} on {} ({})",
            choice.as_str(),
            shareholder_id,
            resolution.id,
            record.hash
        );

        self.publish(&record).await;
        Ok(CastVoteOutcome::Recorded(record))
    }

    pub async fn get_vote(
        &self,
        shareholder_id: &str,
        resolution_id: &str,
    ) -> Result<Option<VoteRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM votes WHERE shareholder_id = ? AND resolution_id = ?",
            VOTE_COLUMNS
        ))
        .bind(shareholder_id)
        .bind(resolution_id)
        .fetch_optional(self.database.pool())
        .await?;

        row.as_ref().map(VoteRecord::from_row).transpose()
    }

    pub async fn votes_for_resolution(&self, resolution_id: &str) -> Result<Vec<VoteRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM votes WHERE resolution_id = ? ORDER BY id",
            VOTE_COLUMNS
        ))
        .bind(resolution_id)
        .fetch_all(self.database.pool())
        .await?;

        rows.iter().map(VoteRecord::from_row).collect()
    }

    pub async fn votes_by_shareholder(&self, shareholder_id: &str) -> Result<Vec<VoteRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM votes WHERE shareholder_id = ? ORDER BY id",
            VOTE_COLUMNS
        ))
        .bind(shareholder_id)
        .fetch_all(self.database.pool())
        .await?;

        rows.iter().map(VoteRecord::from_row).collect()
    }

    /// Look up a vote receipt and check that the record still matches it.
    pub async fn verify_receipt(&self, hash: &str) -> Result<ReceiptStatus> {
        require_non_empty("hash", hash)?;

        let row = sqlx::query(&format!("SELECT {} FROM votes WHERE hash = ?", VOTE_COLUMNS))
            .bind(hash)
            .fetch_optional(self.database.pool())
            .await?;

        let Some(row) = row else {
            return Ok(ReceiptStatus::Unknown);
        };

        let record = VoteRecord::from_row(&row)?;
        if record.verify_hash() {
            Ok(ReceiptStatus::Valid(record))
        } else {
            warn!("Vote {} no longer matches its receipt {}", record.id, hash);
            Ok(ReceiptStatus::Tampered(record))
        }
    }

    async fn has_director_for_vote(
        &self,
        shareholder_id: &str,
        voting_session_id: &str,
    ) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT 1 FROM votes
            WHERE shareholder_id = ? AND voting_session_id = ?
              AND category = 'director_election' AND choice = 'FOR'
            LIMIT 1
            "#,
        )
        .bind(shareholder_id)
        .bind(voting_session_id)
        .fetch_optional(self.database.pool())
        .await?;

        Ok(row.is_some())
    }

    /// A conflicting insert may trip both the pair constraint and the
    /// director index at once; the stored pair decides which rule lost.
    async fn rejection_after_conflict(
        &self,
        shareholder_id: &str,
        resolution_id: &str,
    ) -> Result<CastVoteOutcome> {
        if self.get_vote(shareholder_id, resolution_id).await?.is_some() {
            Ok(CastVoteOutcome::AlreadyVoted)
        } else {
            Ok(CastVoteOutcome::SingleChoiceViolation)
        }
    }

    /// Server clock truncated to the stored precision, bumped by one
    /// microsecond whenever it has not moved past the previous vote.
    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(6);
        let mut last = self
            .last_voted_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let next = match *last {
            Some(previous) if now <= previous => previous + Duration::microseconds(1),
            _ => now,
        };
        *last = Some(next);
        next
    }

    async fn publish(&self, record: &VoteRecord) {
        let event = record.event();

        // The vote is committed at this point; a failed tally update is
        // repaired by the next recompute rather than failing the vote.
        if let Err(e) = self.aggregator.apply(&event).await {
            warn!(
                "Failed to update tally for {} after recording {}: {}",
                event.resolution_id, event.hash, e
            );
        }

        if self.events.send(event).is_err() {
            debug!("No vote event subscribers");
        }
    }
}
