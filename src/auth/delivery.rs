//! Out-of-band delivery port for one-time secrets (email, SMS, ...).

use async_trait::async_trait;

use crate::error::VoteCoreError;

#[derive(Clone, PartialEq, Eq)]
pub enum DeliverableSecret {
    Credential { login_id: String, password: String },
    Otp { code: String },
}

impl DeliverableSecret {
    pub fn kind(&self) -> &'static str {
        match self {
            DeliverableSecret::Credential { .. } => "credential",
            DeliverableSecret::Otp { .. } => "otp",
        }
    }
}

impl std::fmt::Debug for DeliverableSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DeliverableSecret::{}(<redacted>)", self.kind())
    }
}

/// Transport for secrets. A failed delivery is reported back as
/// `VoteCoreError::DeliveryError`; the secret itself stays valid.
#[async_trait]
pub trait SecretDelivery: Send + Sync {
    async fn deliver(&self, destination: &str, secret: &DeliverableSecret) -> Result<(), VoteCoreError>;
}
