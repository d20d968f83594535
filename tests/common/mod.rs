#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use evote_core::auth::{AuthSessionFlow, DeliverableSecret, SecretDelivery};
use evote_core::config::{AppConfig, CredentialPolicy, OtpPolicy};
use evote_core::credentials::CredentialStore;
use evote_core::database::Database;
use evote_core::error::VoteCoreError;
use evote_core::tally::TallyAggregator;
use evote_core::voting::VoteLedger;

pub const TEST_COMPANY: &str = "acme-holdings";

/// Setup an in-memory SQLite database for testing
pub async fn setup_test_db() -> Database {
    Database::new_in_memory().await.expect("Failed to create test database")
}

pub fn contact_for(shareholder_id: &str) -> String {
    format!("{}@shareholders.example", shareholder_id)
}

/// Register `count` shareholders named `sh-1`, `sh-2`, ...
pub async fn register_shareholders(db: &Database, count: usize) -> Vec<String> {
    let mut ids = Vec::with_capacity(count);
    for i in 1..=count {
        let id = format!("sh-{}", i);
        db.register_shareholder(&id, TEST_COMPANY, &contact_for(&id))
            .await
            .expect("Failed to register shareholder");
        ids.push(id);
    }
    ids
}

pub fn otp_policy(ttl_secs: i64, max_attempts: u32) -> OtpPolicy {
    OtpPolicy {
        ttl_secs,
        max_attempts,
        ..OtpPolicy::default()
    }
}

pub fn create_credential_store(db: &Database) -> CredentialStore {
    CredentialStore::from_config(db.clone(), &AppConfig::default())
}

pub fn create_credential_store_with(db: &Database, otp: OtpPolicy) -> CredentialStore {
    CredentialStore::new(db.clone(), &CredentialPolicy::default(), &otp)
}

pub fn create_auth_flow(db: &Database, delivery: RecordingDelivery) -> AuthSessionFlow<RecordingDelivery> {
    AuthSessionFlow::new(create_credential_store(db), delivery)
}

pub async fn open_ledger(db: &Database) -> VoteLedger {
    let config = AppConfig::default();
    let aggregator = Arc::new(TallyAggregator::new(
        db.clone(),
        config.tally.event_channel_capacity,
    ));
    VoteLedger::open(db.clone(), aggregator, config.tally.event_channel_capacity)
        .await
        .expect("Failed to open vote ledger")
}

/// Delivery double that records every secret it is handed. Clones share
/// the same record, and delivery can be switched to fail.
#[derive(Clone, Default)]
pub struct RecordingDelivery {
    sent: Arc<Mutex<Vec<(String, DeliverableSecret)>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(String, DeliverableSecret)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last_otp(&self) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find_map(|(_, secret)| match secret {
                DeliverableSecret::Otp { code } => Some(code.clone()),
                _ => None,
            })
    }

    pub fn otp_count(&self) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, secret)| matches!(secret, DeliverableSecret::Otp { .. }))
            .count()
    }
}

#[async_trait]
impl SecretDelivery for RecordingDelivery {
    async fn deliver(&self, destination: &str, secret: &DeliverableSecret) -> Result<(), VoteCoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(VoteCoreError::DeliveryError(format!(
                "mail relay rejected message to {}",
                destination
            )));
        }
        self.sent
            .lock()
            .unwrap()
            .push((destination.to_string(), secret.clone()));
        Ok(())
    }
}

/// A code guaranteed to differ from `otp`.
pub fn wrong_otp(otp: &str) -> String {
    otp.chars()
        .map(|c| if c == '9' { '0' } else { ((c as u8) + 1) as char })
        .collect()
}
