//! Login attempt state machine.
//!
//! `AwaitingCredentials -> AwaitingOtp -> Authenticated`, or `Failed` from
//! any non-terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    /// The code is valid but did not reach the shareholder; resend it.
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpRejection {
    Expired,
    Mismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginFailure {
    InvalidCredentials,
    CredentialAlreadyUsed,
    OtpAttemptsExhausted,
}

impl LoginFailure {
    pub fn user_message(&self) -> &'static str {
        match self {
            LoginFailure::InvalidCredentials => "Invalid login ID or password",
            LoginFailure::CredentialAlreadyUsed => "Credential already used",
            LoginFailure::OtpAttemptsExhausted => {
                "Too many incorrect verification codes; please sign in again"
            }
        }
    }
}

/// Opaque bearer handed to the caller once both factors pass.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionToken(String);

impl SessionToken {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSession {
    pub shareholder_id: String,
    pub token: SessionToken,
    pub authenticated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginState {
    AwaitingCredentials,
    AwaitingOtp {
        shareholder_id: String,
        delivery: DeliveryStatus,
        last_rejection: Option<OtpRejection>,
    },
    Authenticated(AuthenticatedSession),
    Failed(LoginFailure),
}

impl LoginState {
    pub fn name(&self) -> &'static str {
        match self {
            LoginState::AwaitingCredentials => "awaiting_credentials",
            LoginState::AwaitingOtp { .. } => "awaiting_otp",
            LoginState::Authenticated(_) => "authenticated",
            LoginState::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoginState::Authenticated(_) | LoginState::Failed(_))
    }
}

/// One shareholder's walk through the login steps.
pub struct LoginAttempt {
    id: Uuid,
    state: LoginState,
    /// Plaintext code whose delivery failed, kept only until it is resent.
    pub(crate) undelivered_otp: Option<String>,
    started_at: DateTime<Utc>,
}

impl LoginAttempt {
    pub(crate) fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: LoginState::AwaitingCredentials,
            undelivered_otp: None,
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &LoginState {
        &self.state
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn session(&self) -> Option<&AuthenticatedSession> {
        match &self.state {
            LoginState::Authenticated(session) => Some(session),
            _ => None,
        }
    }

    pub(crate) fn transition(&mut self, next: LoginState) {
        debug!(
            "Login attempt {}: {} -> {}",
            self.id,
            self.state.name(),
            next.name()
        );
        if next.is_terminal() {
            self.undelivered_otp = None;
        }
        self.state = next;
    }
}

impl std::fmt::Debug for LoginAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginAttempt")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("started_at", &self.started_at)
            .finish()
    }
}
