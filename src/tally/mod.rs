//! Tally Aggregation
//!
//! Running per-resolution counts derived from the vote ledger, kept in step
//! with the ledger's change events and pushed to live subscribers.

pub mod aggregator;
pub mod board;
pub mod types;

pub use aggregator::TallyAggregator;
pub use board::TallyBoard;
pub use types::ResolutionTally;
