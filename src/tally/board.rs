//! Read-side view of live tallies, as kept by a dashboard.
//!
//! Pushed tallies may arrive twice or out of order. Counts only ever grow,
//! so the board keeps, per resolution, the tally with the highest total.

use std::collections::HashMap;

use super::types::ResolutionTally;

#[derive(Debug, Default, Clone)]
pub struct TallyBoard {
    tallies: HashMap<String, ResolutionTally>,
}

impl TallyBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the update changed the board.
    pub fn apply(&mut self, update: ResolutionTally) -> bool {
        match self.tallies.get(&update.resolution_id) {
            Some(current) if current.total_count >= update.total_count => false,
            _ => {
                self.tallies.insert(update.resolution_id.clone(), update);
                true
            }
        }
    }

    pub fn get(&self, resolution_id: &str) -> Option<&ResolutionTally> {
        self.tallies.get(resolution_id)
    }

    pub fn len(&self) -> usize {
        self.tallies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tallies.is_empty()
    }
}
