//! Vote Ledger
//!
//! Append-only storage of cast votes with their audit fingerprints, the
//! one-vote-per-resolution and single-FOR director election rules, and
//! after-the-fact verification of stored fingerprints.

pub mod audit;
pub mod ledger;
pub mod types;

pub use audit::{verify_ledger, LedgerAudit, SingleChoiceBreach, TamperedVote};
pub use ledger::VoteLedger;
pub use types::*;
