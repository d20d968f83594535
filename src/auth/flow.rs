//! Auth Session Flow
//!
//! Drives a `LoginAttempt` through the two factors. Rejections move the
//! attempt between states; errors (bad input, storage failures) leave the
//! attempt exactly where it was so the caller can retry the same step.

use chrono::Utc;
use tracing::{info, warn};

use super::delivery::{DeliverableSecret, SecretDelivery};
use super::state::*;
use crate::credentials::{CredentialCheck, CredentialStore, IssuedCredential, OtpCheck};
use crate::crypto::{hash_secret, secrets_match};
use crate::error::{Result, VoteCoreError};

pub struct AuthSessionFlow<D: SecretDelivery> {
    store: CredentialStore,
    delivery: D,
}

impl<D: SecretDelivery> AuthSessionFlow<D> {
    pub fn new(store: CredentialStore, delivery: D) -> Self {
        Self { store, delivery }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn delivery(&self) -> &D {
        &self.delivery
    }

    pub fn begin(&self) -> LoginAttempt {
        let attempt = LoginAttempt::new();
        info!("Started login attempt {}", attempt.id());
        attempt
    }

    /// Issue (or reissue) a credential and send it to the shareholder's
    /// contact. The credential is returned either way so an administrator
    /// can hand it over when delivery fails.
    pub async fn issue_and_deliver_credential(
        &self,
        shareholder_id: &str,
    ) -> Result<(IssuedCredential, DeliveryStatus)> {
        let issued = self.store.issue_credential(shareholder_id).await?;
        let secret = DeliverableSecret::Credential {
            login_id: issued.login_id.clone(),
            password: issued.password.clone(),
        };
        let status = self.deliver(shareholder_id, &secret).await?;
        Ok((issued, status))
    }

    pub async fn submit_credentials(
        &self,
        attempt: &mut LoginAttempt,
        login_id: &str,
        password: &str,
    ) -> Result<LoginState> {
        if !matches!(attempt.state(), LoginState::AwaitingCredentials) {
            return Err(unexpected_input(attempt, "credentials"));
        }

        let shareholder_id = match self.store.verify_credential(login_id, password).await? {
            CredentialCheck::Verified { shareholder_id } => shareholder_id,
            CredentialCheck::NotFound => {
                info!("Login attempt {} rejected: invalid credentials", attempt.id());
                attempt.transition(LoginState::Failed(LoginFailure::InvalidCredentials));
                return Ok(attempt.state().clone());
            }
            CredentialCheck::AlreadyUsed => {
                info!("Login attempt {} rejected: credential already used", attempt.id());
                attempt.transition(LoginState::Failed(LoginFailure::CredentialAlreadyUsed));
                return Ok(attempt.state().clone());
            }
        };

        let otp = self.store.issue_otp(&shareholder_id).await?;
        let delivery = self.deliver_otp(attempt, &shareholder_id, otp).await?;

        attempt.transition(LoginState::AwaitingOtp {
            shareholder_id,
            delivery,
            last_rejection: None,
        });
        Ok(attempt.state().clone())
    }

    pub async fn submit_otp(&self, attempt: &mut LoginAttempt, otp: &str) -> Result<LoginState> {
        let LoginState::AwaitingOtp {
            shareholder_id,
            delivery,
            ..
        } = attempt.state().clone()
        else {
            return Err(unexpected_input(attempt, "an OTP"));
        };

        let next = match self.store.verify_otp(&shareholder_id, otp).await? {
            OtpCheck::Verified => {
                info!(
                    "Login attempt {} authenticated shareholder {}",
                    attempt.id(),
                    shareholder_id
                );
                LoginState::Authenticated(AuthenticatedSession {
                    shareholder_id,
                    token: SessionToken::generate(),
                    authenticated_at: Utc::now(),
                })
            }
            OtpCheck::Expired => LoginState::AwaitingOtp {
                shareholder_id,
                delivery,
                last_rejection: Some(OtpRejection::Expired),
            },
            OtpCheck::Mismatch => LoginState::AwaitingOtp {
                shareholder_id,
                delivery,
                last_rejection: Some(OtpRejection::Mismatch),
            },
            OtpCheck::AttemptsExhausted => {
                warn!("Login attempt {} failed: OTP attempts exhausted", attempt.id());
                LoginState::Failed(LoginFailure::OtpAttemptsExhausted)
            }
        };

        attempt.transition(next);
        Ok(attempt.state().clone())
    }

    /// Send the OTP again. A code whose delivery failed is re-sent as long
    /// as it is still the pending one; otherwise a fresh code is issued.
    pub async fn resend_otp(&self, attempt: &mut LoginAttempt) -> Result<LoginState> {
        let LoginState::AwaitingOtp {
            shareholder_id,
            last_rejection,
            ..
        } = attempt.state().clone()
        else {
            return Err(unexpected_input(attempt, "an OTP resend"));
        };

        let mut reusable = None;
        if let Some(code) = attempt.undelivered_otp.clone() {
            if self.is_pending(&shareholder_id, &code).await? {
                reusable = Some(code);
            }
        }

        let (otp, last_rejection) = match reusable {
            Some(code) => (code, last_rejection),
            None => (self.store.issue_otp(&shareholder_id).await?, None),
        };
        let delivery = self.deliver_otp(attempt, &shareholder_id, otp).await?;

        attempt.transition(LoginState::AwaitingOtp {
            shareholder_id,
            delivery,
            last_rejection,
        });
        Ok(attempt.state().clone())
    }

    async fn is_pending(&self, shareholder_id: &str, code: &str) -> Result<bool> {
        let Some(credential) = self.store.get_credential(shareholder_id).await? else {
            return Ok(false);
        };
        Ok(match (&credential.otp_hash, credential.otp_expiry) {
            (Some(otp_hash), Some(expiry)) => {
                !credential.is_used
                    && Utc::now() < expiry
                    && secrets_match(otp_hash, &hash_secret(shareholder_id, code))
            }
            _ => false,
        })
    }

    async fn deliver_otp(
        &self,
        attempt: &mut LoginAttempt,
        shareholder_id: &str,
        code: String,
    ) -> Result<DeliveryStatus> {
        let secret = DeliverableSecret::Otp { code };
        let status = self.deliver(shareholder_id, &secret).await?;

        attempt.undelivered_otp = match (&status, secret) {
            (DeliveryStatus::Failed(_), DeliverableSecret::Otp { code }) => Some(code),
            _ => None,
        };
        Ok(status)
    }

    /// Only the transport may fail softly; a missing contact is an error.
    async fn deliver(&self, shareholder_id: &str, secret: &DeliverableSecret) -> Result<DeliveryStatus> {
        let destination = self.store.contact_for(shareholder_id).await?;

        match self.delivery.deliver(&destination, secret).await {
            Ok(()) => {
                info!("Delivered {} to shareholder {}", secret.kind(), shareholder_id);
                Ok(DeliveryStatus::Delivered)
            }
            Err(e) => {
                warn!(
                    "Failed to deliver {} to shareholder {}: {}",
                    secret.kind(),
                    shareholder_id,
                    e
                );
                Ok(DeliveryStatus::Failed(e.to_string()))
            }
        }
    }
}

fn unexpected_input(attempt: &LoginAttempt, input: &str) -> VoteCoreError {
    VoteCoreError::InvalidState(format!(
        "login attempt {} does not accept {} in state {}",
        attempt.id(),
        input,
        attempt.state().name()
    ))
}
