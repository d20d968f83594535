use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::VoteCoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub server_id: String,
    pub credentials: CredentialPolicy,
    pub otp: OtpPolicy,
    pub tally: TallyConfig,
}

/// Shape of issued login credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialPolicy {
    pub login_id_length: usize,
    pub password_length: usize,
    /// Fresh login ids tried before giving up on a collision streak.
    pub login_id_allocation_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpPolicy {
    pub code_length: usize,
    pub ttl_secs: i64,
    /// Verification attempts allowed per issued code.
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TallyConfig {
    pub event_channel_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://evote.db".to_string(),
            max_connections: 8,
            server_id: "evote-01".to_string(),
            credentials: CredentialPolicy::default(),
            otp: OtpPolicy::default(),
            tally: TallyConfig::default(),
        }
    }
}

impl Default for CredentialPolicy {
    fn default() -> Self {
        Self {
            login_id_length: 8,
            password_length: 12,
            login_id_allocation_attempts: 8,
        }
    }
}

impl Default for OtpPolicy {
    fn default() -> Self {
        Self {
            code_length: 6,
            ttl_secs: 600,
            max_attempts: 5,
        }
    }
}

impl Default for TallyConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: 1024,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional `evote.toml` in the
    /// working directory, and `EVOTE_*` environment variables (nested keys
    /// use `__`, e.g. `EVOTE_OTP__TTL_SECS=300`).
    pub fn load() -> Result<Self, VoteCoreError> {
        Self::load_with_file("evote")
    }

    pub fn load_with_file(path: &str) -> Result<Self, VoteCoreError> {
        let config: AppConfig = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("EVOTE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), VoteCoreError> {
        if self.database_url.trim().is_empty() {
            return Err(VoteCoreError::ConfigError(
                "database_url must not be empty".to_string(),
            ));
        }

        if self.max_connections == 0 {
            return Err(VoteCoreError::ConfigError(
                "max_connections must be at least 1".to_string(),
            ));
        }

        // Login ids are drawn from a u64 range without a leading zero.
        if !(4..=18).contains(&self.credentials.login_id_length) {
            return Err(VoteCoreError::ConfigError(format!(
                "credentials.login_id_length ({}) must be between 4 and 18",
                self.credentials.login_id_length
            )));
        }

        if self.credentials.password_length < 8 {
            return Err(VoteCoreError::ConfigError(format!(
                "credentials.password_length ({}) must be at least 8",
                self.credentials.password_length
            )));
        }

        if self.credentials.login_id_allocation_attempts == 0 {
            return Err(VoteCoreError::ConfigError(
                "credentials.login_id_allocation_attempts must be at least 1".to_string(),
            ));
        }

        if !(4..=10).contains(&self.otp.code_length) {
            return Err(VoteCoreError::ConfigError(format!(
                "otp.code_length ({}) must be between 4 and 10",
                self.otp.code_length
            )));
        }

        if self.otp.ttl_secs < 0 {
            return Err(VoteCoreError::ConfigError(format!(
                "otp.ttl_secs ({}) cannot be negative",
                self.otp.ttl_secs
            )));
        }

        if self.otp.max_attempts == 0 {
            return Err(VoteCoreError::ConfigError(
                "otp.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.tally.event_channel_capacity == 0 {
            return Err(VoteCoreError::ConfigError(
                "tally.event_channel_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
