//! Credential Outcome Types

use serde::{Deserialize, Serialize};

/// Plaintext credential, returned exactly once at issuance.
#[derive(Clone, Serialize, Deserialize)]
pub struct IssuedCredential {
    pub shareholder_id: String,
    pub login_id: String,
    pub password: String,
}

impl std::fmt::Debug for IssuedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCredential")
            .field("shareholder_id", &self.shareholder_id)
            .field("login_id", &self.login_id)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// First-factor result. Unknown login id and wrong password are the same
/// outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialCheck {
    Verified { shareholder_id: String },
    NotFound,
    AlreadyUsed,
}

/// Second-factor result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OtpCheck {
    Verified,
    /// No code pending, or the pending code is past its expiry.
    Expired,
    Mismatch,
    /// The pending code has been withdrawn after too many wrong attempts.
    AttemptsExhausted,
}
