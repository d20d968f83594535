pub mod auth;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod database;
pub mod error;
pub mod tally;
pub mod voting;

pub use error::{Result, VoteCoreError};
