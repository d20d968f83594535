use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::{Result, VoteCoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shareholder {
    pub id: String,
    pub company_id: String,
    /// Delivery address for credentials and OTP codes.
    pub contact: String,
    pub created_at: DateTime<Utc>,
}

/// Stored login credential. Only digests of the password and the pending
/// OTP are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareholderCredential {
    pub shareholder_id: String,
    pub company_id: String,
    pub login_id: String,
    pub password_hash: String,
    pub is_used: bool,
    pub otp_hash: Option<String>,
    pub otp_expiry: Option<DateTime<Utc>>,
    pub otp_attempts: u32,
    pub issued_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

impl Shareholder {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            company_id: row.try_get("company_id")?,
            contact: row.try_get("contact")?,
            created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        })
    }
}

impl ShareholderCredential {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            shareholder_id: row.try_get("shareholder_id")?,
            company_id: row.try_get("company_id")?,
            login_id: row.try_get("login_id")?,
            password_hash: row.try_get("password_hash")?,
            is_used: row.try_get::<i64, _>("is_used")? != 0,
            otp_hash: row.try_get("otp_hash")?,
            otp_expiry: parse_optional_timestamp(row.try_get("otp_expiry")?)?,
            otp_attempts: row.try_get::<i64, _>("otp_attempts")? as u32,
            issued_at: parse_timestamp(&row.try_get::<String, _>("issued_at")?)?,
            used_at: parse_optional_timestamp(row.try_get("used_at")?)?,
        })
    }

    /// True while an OTP challenge is in flight (issued, not yet consumed).
    pub fn has_pending_otp(&self) -> bool {
        self.otp_hash.is_some() && self.otp_expiry.is_some()
    }
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| VoteCoreError::DatabaseError(format!("Invalid timestamp {:?}: {}", value, e)))
}

pub(crate) fn parse_optional_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_timestamp).transpose()
}
