//! One-time secrets: login ids, passwords and OTP codes.
//!
//! Secrets are drawn from the OS RNG and only their SHA-256 digests are
//! persisted. Digest comparison is constant time.

use rand::rngs::OsRng;
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::config::{CredentialPolicy, OtpPolicy};

/// Password alphabet without look-alike glyphs (0/O/o, 1/l/I).
pub const PASSWORD_ALPHABET: &[u8] =
    b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnpqrstuvwxyz23456789!@#$%&*";

#[derive(Debug, Clone)]
pub struct SecretGenerator {
    login_id_length: usize,
    password_length: usize,
    otp_length: usize,
}

impl SecretGenerator {
    pub fn new(credentials: &CredentialPolicy, otp: &OtpPolicy) -> Self {
        Self {
            login_id_length: credentials.login_id_length,
            password_length: credentials.password_length,
            otp_length: otp.code_length,
        }
    }

    /// Numeric login id of the configured length, never starting with 0.
    pub fn login_id(&self) -> String {
        let low = 10u64.pow(self.login_id_length as u32 - 1);
        let high = low * 10;
        OsRng.gen_range(low..high).to_string()
    }

    pub fn password(&self) -> String {
        (0..self.password_length)
            .map(|_| PASSWORD_ALPHABET[OsRng.gen_range(0..PASSWORD_ALPHABET.len())] as char)
            .collect()
    }

    /// Numeric OTP code; leading zeros are kept.
    pub fn otp(&self) -> String {
        let high = 10u64.pow(self.otp_length as u32);
        format!("{:0width$}", OsRng.gen_range(0..high), width = self.otp_length)
    }
}

/// Digest of a secret bound to the record it belongs to (the login id for
/// passwords, the shareholder id for OTP codes).
pub fn hash_secret(scope: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(scope.as_bytes());
    hasher.update(b":");
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn secrets_match(stored_hash: &str, candidate_hash: &str) -> bool {
    bool::from(stored_hash.as_bytes().ct_eq(candidate_hash.as_bytes()))
}
