use serde::{Deserialize, Serialize};

use crate::voting::types::VoteChoice;

/// Vote counts for one resolution. Derived data: the ledger is the source
/// of truth and a tally can always be rebuilt from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionTally {
    pub resolution_id: String,
    pub for_count: u64,
    pub against_count: u64,
    pub abstain_count: u64,
    pub total_count: u64,
}

impl ResolutionTally {
    pub fn new(resolution_id: impl Into<String>) -> Self {
        Self {
            resolution_id: resolution_id.into(),
            ..Default::default()
        }
    }

    pub fn record(&mut self, choice: VoteChoice) {
        match choice {
            VoteChoice::For => self.for_count += 1,
            VoteChoice::Against => self.against_count += 1,
            VoteChoice::Abstain => self.abstain_count += 1,
        }
        self.total_count += 1;
    }

    pub fn count(&self, choice: VoteChoice) -> u64 {
        match choice {
            VoteChoice::For => self.for_count,
            VoteChoice::Against => self.against_count,
            VoteChoice::Abstain => self.abstain_count,
        }
    }

    /// for + against + abstain == total
    pub fn is_consistent(&self) -> bool {
        self.for_count + self.against_count + self.abstain_count == self.total_count
    }
}
