//! Credential Store
//!
//! Every state change is a single conditional statement against the
//! `credentials` row, so concurrent verifications of the same credential
//! race on the store rather than on application locks.

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use super::types::*;
use crate::config::{AppConfig, CredentialPolicy, OtpPolicy};
use crate::crypto::{format_timestamp, hash_secret, secrets_match, SecretGenerator};
use crate::database::models::ShareholderCredential;
use crate::database::{is_unique_violation, Database};
use crate::error::{require_non_empty, Result, VoteCoreError};

const CREDENTIAL_COLUMNS: &str = "shareholder_id, company_id, login_id, password_hash, is_used, otp_hash, otp_expiry, otp_attempts, issued_at, used_at";

pub struct CredentialStore {
    database: Database,
    generator: SecretGenerator,
    otp_ttl: Duration,
    max_otp_attempts: u32,
    login_id_allocation_attempts: u32,
}

impl CredentialStore {
    pub fn new(database: Database, credentials: &CredentialPolicy, otp: &OtpPolicy) -> Self {
        Self {
            database,
            generator: SecretGenerator::new(credentials, otp),
            otp_ttl: Duration::seconds(otp.ttl_secs),
            max_otp_attempts: otp.max_attempts,
            login_id_allocation_attempts: credentials.login_id_allocation_attempts,
        }
    }

    pub fn from_config(database: Database, config: &AppConfig) -> Self {
        Self::new(database, &config.credentials, &config.otp)
    }

    /// Issue (or reissue) a credential. Login id and password are always
    /// regenerated together; any pending OTP is dropped and the credential
    /// becomes usable again.
    pub async fn issue_credential(&self, shareholder_id: &str) -> Result<IssuedCredential> {
        require_non_empty("shareholder_id", shareholder_id)?;

        let shareholder = self
            .database
            .get_shareholder(shareholder_id)
            .await?
            .ok_or_else(|| VoteCoreError::NotFound(format!("shareholder {}", shareholder_id)))?;

        for attempt in 1..=self.login_id_allocation_attempts {
            let login_id = self.generator.login_id();
            let password = self.generator.password();

            let result = sqlx::query(
                r#"
                INSERT INTO credentials
                (shareholder_id, company_id, login_id, password_hash, is_used,
                 otp_hash, otp_expiry, otp_attempts, issued_at, used_at)
                VALUES (?, ?, ?, ?, 0, NULL, NULL, 0, ?, NULL)
                ON CONFLICT (shareholder_id) DO UPDATE SET
                    company_id = excluded.company_id,
                    login_id = excluded.login_id,
                    password_hash = excluded.password_hash,
                    is_used = 0,
                    otp_hash = NULL,
                    otp_expiry = NULL,
                    otp_attempts = 0,
                    issued_at = excluded.issued_at,
                    used_at = NULL
                "#,
            )
            .bind(shareholder_id)
            .bind(&shareholder.company_id)
            .bind(&login_id)
            .bind(hash_secret(&login_id, &password))
            .bind(format_timestamp(&Utc::now()))
            .execute(self.database.pool())
            .await;

            match result {
                Ok(_) => {
                    info!("Issued credential for shareholder {}", shareholder_id);
                    return Ok(IssuedCredential {
                        shareholder_id: shareholder_id.to_string(),
                        login_id,
                        password,
                    });
                }
                Err(e) if is_unique_violation(&e) => {
                    warn!(
                        "Login id collision for shareholder {} (attempt {})",
                        shareholder_id, attempt
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(VoteCoreError::DatabaseError(format!(
            "Could not allocate a unique login id after {} attempts",
            self.login_id_allocation_attempts
        )))
    }

    pub async fn verify_credential(&self, login_id: &str, password: &str) -> Result<CredentialCheck> {
        require_non_empty("login_id", login_id)?;
        require_non_empty("password", password)?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM credentials WHERE login_id = ?",
            CREDENTIAL_COLUMNS
        ))
        .bind(login_id)
        .fetch_optional(self.database.pool())
        .await?;

        // Hash before looking at the row so unknown ids cost the same.
        let candidate = hash_secret(login_id, password);

        let Some(row) = row else {
            debug!("Credential check failed");
            return Ok(CredentialCheck::NotFound);
        };
        let credential = ShareholderCredential::from_row(&row)?;

        if !secrets_match(&credential.password_hash, &candidate) {
            debug!("Credential check failed");
            return Ok(CredentialCheck::NotFound);
        }

        if credential.is_used {
            info!(
                "Rejected login for shareholder {}: credential already used",
                credential.shareholder_id
            );
            return Ok(CredentialCheck::AlreadyUsed);
        }

        Ok(CredentialCheck::Verified {
            shareholder_id: credential.shareholder_id,
        })
    }

    /// Start an OTP challenge, replacing any pending code.
    pub async fn issue_otp(&self, shareholder_id: &str) -> Result<String> {
        require_non_empty("shareholder_id", shareholder_id)?;

        let otp = self.generator.otp();
        let expiry = Utc::now() + self.otp_ttl;

        let result = sqlx::query(
            r#"
            UPDATE credentials
            SET otp_hash = ?, otp_expiry = ?, otp_attempts = 0
            WHERE shareholder_id = ? AND is_used = 0
            "#,
        )
        .bind(hash_secret(shareholder_id, &otp))
        .bind(format_timestamp(&expiry))
        .bind(shareholder_id)
        .execute(self.database.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(VoteCoreError::InvalidState(format!(
                "shareholder {} has no active credential",
                shareholder_id
            )));
        }

        info!("Issued OTP for shareholder {} (expires {})", shareholder_id, expiry);
        Ok(otp)
    }

    /// Check an OTP. On success the credential is consumed: `is_used` flips
    /// in the same conditional update that clears the code, so of two
    /// concurrent correct submissions exactly one is `Verified`. Only wrong
    /// codes count against the attempt bound.
    pub async fn verify_otp(&self, shareholder_id: &str, otp: &str) -> Result<OtpCheck> {
        require_non_empty("shareholder_id", shareholder_id)?;
        require_non_empty("otp", otp)?;

        let Some(credential) = self.get_credential(shareholder_id).await? else {
            return Ok(OtpCheck::Expired);
        };
        let (Some(otp_hash), Some(expiry)) = (credential.otp_hash.as_deref(), credential.otp_expiry)
        else {
            return Ok(OtpCheck::Expired);
        };

        let now = Utc::now();
        if now >= expiry {
            info!("OTP for shareholder {} has expired", shareholder_id);
            return Ok(OtpCheck::Expired);
        }

        if credential.otp_attempts >= self.max_otp_attempts {
            self.withdraw_otp(shareholder_id, otp_hash).await?;
            return Ok(OtpCheck::AttemptsExhausted);
        }

        if secrets_match(otp_hash, &hash_secret(shareholder_id, otp)) {
            return self.consume(shareholder_id, otp_hash).await;
        }

        let attempts: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE credentials SET otp_attempts = otp_attempts + 1
            WHERE shareholder_id = ? AND otp_hash = ? AND otp_attempts < ?
            RETURNING otp_attempts
            "#,
        )
        .bind(shareholder_id)
        .bind(otp_hash)
        .bind(self.max_otp_attempts as i64)
        .fetch_optional(self.database.pool())
        .await?;

        match attempts {
            // Replaced, consumed or used up by a concurrent request.
            None => Ok(OtpCheck::Expired),
            Some(attempts) if attempts >= self.max_otp_attempts as i64 => {
                self.withdraw_otp(shareholder_id, otp_hash).await?;
                warn!("OTP attempts exhausted for shareholder {}", shareholder_id);
                Ok(OtpCheck::AttemptsExhausted)
            }
            Some(_) => {
                info!("OTP mismatch for shareholder {}", shareholder_id);
                Ok(OtpCheck::Mismatch)
            }
        }
    }

    pub async fn get_credential(&self, shareholder_id: &str) -> Result<Option<ShareholderCredential>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM credentials WHERE shareholder_id = ?",
            CREDENTIAL_COLUMNS
        ))
        .bind(shareholder_id)
        .fetch_optional(self.database.pool())
        .await?;

        row.as_ref().map(ShareholderCredential::from_row).transpose()
    }

    /// Delivery address for a shareholder's secrets.
    pub async fn contact_for(&self, shareholder_id: &str) -> Result<String> {
        self.database
            .get_shareholder(shareholder_id)
            .await?
            .map(|shareholder| shareholder.contact)
            .ok_or_else(|| VoteCoreError::NotFound(format!("shareholder {}", shareholder_id)))
    }

    async fn consume(&self, shareholder_id: &str, otp_hash: &str) -> Result<OtpCheck> {
        let now = format_timestamp(&Utc::now());
        let consumed = sqlx::query(
            r#"
            UPDATE credentials
            SET is_used = 1, used_at = ?, otp_hash = NULL, otp_expiry = NULL, otp_attempts = 0
            WHERE shareholder_id = ? AND is_used = 0 AND otp_hash = ?
              AND otp_expiry > ? AND otp_attempts < ?
            "#,
        )
        .bind(&now)
        .bind(shareholder_id)
        .bind(otp_hash)
        .bind(&now)
        .bind(self.max_otp_attempts as i64)
        .execute(self.database.pool())
        .await?;

        if consumed.rows_affected() == 1 {
            info!("Shareholder {} completed OTP verification", shareholder_id);
            Ok(OtpCheck::Verified)
        } else {
            debug!("OTP for shareholder {} consumed concurrently", shareholder_id);
            Ok(OtpCheck::Expired)
        }
    }

    async fn withdraw_otp(&self, shareholder_id: &str, otp_hash: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE credentials SET otp_hash = NULL, otp_expiry = NULL
            WHERE shareholder_id = ? AND otp_hash = ?
            "#,
        )
        .bind(shareholder_id)
        .bind(otp_hash)
        .execute(self.database.pool())
        .await?;
        Ok(())
    }
}
