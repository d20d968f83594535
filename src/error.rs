use thiserror::Error;

impl From<sqlx::Error> for VoteCoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::DatabaseError(format!("Database error: {}", err))
    }
}

impl From<config::ConfigError> for VoteCoreError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(format!("Failed to load configuration: {}", err))
    }
}

/// Failures of the integrity core.
///
/// Business-rule rejections (already voted, credential already used, OTP
/// mismatch and so on) are not errors; they come back as tagged outcomes
/// from the operation that produced them.
#[derive(Error, Debug)]
pub enum VoteCoreError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Delivery error: {0}")]
    DeliveryError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T, E = VoteCoreError> = std::result::Result<T, E>;

impl VoteCoreError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Storage or transport failure. The caller may retry; no core
    /// operation leaves partial state behind when one of these occurs.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::DatabaseError(_) | Self::DeliveryError(_))
    }
}

/// Reject empty or whitespace-only identifiers before touching the store.
pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(VoteCoreError::InvalidInput(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(())
}
