//! Tally Aggregator
//!
//! Keeps one `ResolutionTally` per resolution in memory. A resolution is
//! hydrated from the ledger the first time it is touched and then advanced
//! by change events, which are deduplicated by vote hash so at-least-once
//! delivery never double counts.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sqlx::Row;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

use super::types::ResolutionTally;
use crate::database::Database;
use crate::error::{require_non_empty, Result, VoteCoreError};
use crate::voting::types::{VoteChoice, VoteEvent};

struct ResolutionState {
    tally: ResolutionTally,
    /// Hashes of every vote already counted.
    seen: HashSet<String>,
}

pub struct TallyAggregator {
    database: Database,
    resolutions: RwLock<HashMap<String, ResolutionState>>,
    updates: broadcast::Sender<ResolutionTally>,
}

impl TallyAggregator {
    pub fn new(database: Database, channel_capacity: usize) -> Self {
        let (updates, _) = broadcast::channel(channel_capacity);
        Self {
            database,
            resolutions: RwLock::new(HashMap::new()),
            updates,
        }
    }

    /// Apply a change event. Returns the updated tally, or `None` when the
    /// event's vote was already counted.
    pub async fn apply(&self, event: &VoteEvent) -> Result<Option<ResolutionTally>> {
        let mut resolutions = self.resolutions.write().await;

        let (state, hydrated_now) = match resolutions.entry(event.resolution_id.clone()) {
            Entry::Occupied(entry) => (entry.into_mut(), false),
            Entry::Vacant(entry) => {
                let state = self.load_state(&event.resolution_id).await?;
                (entry.insert(state), true)
            }
        };

        if state.seen.insert(event.hash.clone()) {
            state.tally.record(event.choice);
        } else if !hydrated_now {
            debug!(
                "Ignoring duplicate vote event {} for resolution {}",
                event.hash, event.resolution_id
            );
            return Ok(None);
        }

        // A fresh hydration already contains the committed vote, but
        // subscribers have not seen it yet.
        let tally = state.tally.clone();
        drop(resolutions);

        // No receivers is fine: nobody is watching this tally right now.
        let _ = self.updates.send(tally.clone());
        Ok(Some(tally))
    }

    /// Current counts for a resolution, including every event applied
    /// before this call.
    pub async fn snapshot(&self, resolution_id: &str) -> Result<ResolutionTally> {
        require_non_empty("resolution_id", resolution_id)?;

        if let Some(state) = self.resolutions.read().await.get(resolution_id) {
            return Ok(state.tally.clone());
        }

        let mut resolutions = self.resolutions.write().await;
        let (tally, hydrated_now) = match resolutions.entry(resolution_id.to_string()) {
            Entry::Occupied(entry) => (entry.get().tally.clone(), false),
            Entry::Vacant(entry) => {
                let state = entry.insert(self.load_state(resolution_id).await?);
                (state.tally.clone(), true)
            }
        };
        drop(resolutions);

        // Hydration marks committed votes as seen, so their own events will
        // be dropped as duplicates. Push the loaded counts in their place.
        if hydrated_now && tally.total_count > 0 {
            let _ = self.updates.send(tally.clone());
        }
        Ok(tally)
    }

    /// Rebuild a resolution's tally from the ledger, replacing whatever was
    /// cached. Subscribers are notified if the counts moved.
    pub async fn recompute(&self, resolution_id: &str) -> Result<ResolutionTally> {
        require_non_empty("resolution_id", resolution_id)?;

        // Load under the write lock so no event lands between the read and
        // the swap.
        let mut resolutions = self.resolutions.write().await;
        let state = self.load_state(resolution_id).await?;
        let tally = state.tally.clone();
        let previous = resolutions.insert(resolution_id.to_string(), state);
        drop(resolutions);

        if previous.map(|p| p.tally) != Some(tally.clone()) {
            let _ = self.updates.send(tally.clone());
        }
        Ok(tally)
    }

    /// Recompute every resolution currently held in memory.
    pub async fn resync_cached(&self) -> Result<()> {
        let cached: Vec<String> = self.resolutions.read().await.keys().cloned().collect();
        info!("Resynchronising {} cached tallies from the ledger", cached.len());

        for resolution_id in cached {
            self.recompute(&resolution_id).await?;
        }
        Ok(())
    }

    /// Live tallies for the given resolutions, one item per counted vote.
    ///
    /// A subscriber that falls more than the channel capacity behind skips
    /// the missed updates; since tallies only grow, the next item (or a
    /// `snapshot`) brings it back up to date.
    pub fn subscribe<I, S>(
        &self,
        resolution_ids: I,
    ) -> impl Stream<Item = ResolutionTally> + Send + Unpin + 'static
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let wanted: HashSet<String> = resolution_ids.into_iter().map(Into::into).collect();

        BroadcastStream::new(self.updates.subscribe()).filter_map(move |update| match update {
            Ok(tally) if wanted.contains(&tally.resolution_id) => Some(tally),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!("Tally subscriber lagged, skipped {} updates", skipped);
                None
            }
        })
    }

    /// Follow a vote event feed until it closes. Events may be redelivered;
    /// if the feed overflows, every cached tally is rebuilt from the ledger.
    pub fn spawn_event_consumer(
        self: Arc<Self>,
        mut events: broadcast::Receiver<VoteEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Err(e) = self.apply(&event).await {
                            warn!("Failed to apply vote event {}: {}", event.hash, e);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Vote event feed lagged by {} events", skipped);
                        if let Err(e) = self.resync_cached().await {
                            warn!("Failed to resynchronise tallies: {}", e);
                        }
                    }
                    Err(RecvError::Closed) => {
                        info!("Vote event feed closed");
                        break;
                    }
                }
            }
        })
    }

    async fn load_state(&self, resolution_id: &str) -> Result<ResolutionState> {
        let rows = sqlx::query("SELECT choice, hash FROM votes WHERE resolution_id = ?")
            .bind(resolution_id)
            .fetch_all(self.database.pool())
            .await?;

        let mut state = ResolutionState {
            tally: ResolutionTally::new(resolution_id),
            seen: HashSet::with_capacity(rows.len()),
        };

        for row in rows {
            let choice = row.try_get::<String, _>("choice")?;
            let choice = VoteChoice::from_str(&choice).ok_or_else(|| {
                VoteCoreError::DatabaseError(format!("Invalid vote choice: {}", choice))
            })?;
            if state.seen.insert(row.try_get("hash")?) {
                state.tally.record(choice);
            }
        }

        debug!(
            "Hydrated tally for resolution {} with {} votes",
            resolution_id, state.tally.total_count
        );
        Ok(state)
    }
}
