//! Cryptographic primitives for the integrity core: vote fingerprints and
//! one-time secret generation/hashing.

pub mod fingerprint;
pub mod secrets;

pub use fingerprint::{fingerprint, format_timestamp, FINGERPRINT_VERSION};
pub use secrets::{hash_secret, secrets_match, SecretGenerator};
