//! End-to-End Voting Tests
//!
//! A general meeting from credential issuance to an audited ledger, backed
//! by a file database that is reopened along the way.

mod common;

use std::sync::Arc;

use common::*;
use evote_core::auth::{AuthSessionFlow, LoginFailure, LoginState};
use evote_core::config::AppConfig;
use evote_core::credentials::CredentialStore;
use evote_core::database::Database;
use evote_core::tally::{TallyAggregator, TallyBoard};
use evote_core::voting::{verify_ledger, CastVoteOutcome, ReceiptStatus, Resolution, VoteChoice, VoteLedger};
use tokio_stream::StreamExt;

async fn login(
    flow: &AuthSessionFlow<RecordingDelivery>,
    delivery: &RecordingDelivery,
    login_id: &str,
    password: &str,
) -> Result<String, Box<dyn std::error::Error>> {
    let mut attempt = flow.begin();
    flow.submit_credentials(&mut attempt, login_id, password).await?;
    let otp = delivery.last_otp().ok_or("no OTP delivered")?;
    match flow.submit_otp(&mut attempt, &otp).await? {
        LoginState::Authenticated(session) => Ok(session.shareholder_id),
        other => Err(format!("login did not complete: {:?}", other).into()),
    }
}

#[tokio::test]
async fn test_general_meeting_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    println!("🧪 Testing a general meeting end to end...");

    let dir = tempfile::tempdir()?;
    let mut config = AppConfig::default();
    config.database_url = format!("sqlite://{}", dir.path().join("meeting.db").display());
    config.validate()?;

    let db = Database::connect(&config).await?;
    let shareholders = register_shareholders(&db, 3).await;

    let delivery = RecordingDelivery::new();
    let flow = AuthSessionFlow::new(CredentialStore::from_config(db.clone(), &config), delivery.clone());

    // 1. Issue credentials
    let mut credentials = Vec::new();
    for id in &shareholders {
        let (issued, _) = flow.issue_and_deliver_credential(id).await?;
        credentials.push(issued);
    }
    assert_eq!(delivery.sent().len(), 3);
    println!("✅ Issued {} credentials", credentials.len());

    // 2. Open the ledger and a dashboard subscription
    let aggregator = Arc::new(TallyAggregator::new(db.clone(), config.tally.event_channel_capacity));
    let ledger = VoteLedger::open(db.clone(), Arc::clone(&aggregator), config.tally.event_channel_capacity).await?;
    let mut dashboard = aggregator.subscribe(["accounts", "elect-alice", "elect-bob"]);

    let accounts = Resolution::ordinary("accounts", "agm-2024");
    let alice = Resolution::director_election("elect-alice", "agm-2024");
    let bob = Resolution::director_election("elect-bob", "agm-2024");

    // 3. Each shareholder logs in and votes
    let mut receipts = Vec::new();
    for (issued, (accounts_choice, alice_choice, bob_choice)) in credentials.iter().zip([
        (VoteChoice::For, VoteChoice::For, VoteChoice::Against),
        (VoteChoice::Against, VoteChoice::Abstain, VoteChoice::For),
        (VoteChoice::For, VoteChoice::For, VoteChoice::For),
    ]) {
        let shareholder_id = login(&flow, &delivery, &issued.login_id, &issued.password).await?;

        for (resolution, choice) in [(&accounts, accounts_choice), (&alice, alice_choice)] {
            let outcome = ledger.cast_vote(&shareholder_id, resolution, choice).await?;
            receipts.push(outcome.record().ok_or("vote not recorded")?.hash.clone());
        }

        let outcome = ledger.cast_vote(&shareholder_id, &bob, bob_choice).await?;
        if shareholder_id == "sh-3" {
            // Already voted FOR alice in this session.
            assert_eq!(outcome, CastVoteOutcome::SingleChoiceViolation);
        } else {
            receipts.push(outcome.record().ok_or("vote not recorded")?.hash.clone());
        }
    }
    println!("✅ Recorded {} votes", receipts.len());

    // 4. Credentials are single use
    let mut attempt = flow.begin();
    let state = flow
        .submit_credentials(&mut attempt, &credentials[0].login_id, &credentials[0].password)
        .await?;
    assert_eq!(state, LoginState::Failed(LoginFailure::CredentialAlreadyUsed));

    // 5. The dashboard saw every counted vote
    let mut board = TallyBoard::new();
    for _ in 0..receipts.len() {
        let update = tokio::time::timeout(std::time::Duration::from_secs(1), dashboard.next())
            .await?
            .ok_or("dashboard stream closed")?;
        board.apply(update);
    }
    let accounts_tally = board.get("accounts").ok_or("no accounts tally")?;
    assert_eq!((accounts_tally.for_count, accounts_tally.against_count), (2, 1));
    let alice_tally = board.get("elect-alice").ok_or("no alice tally")?;
    assert_eq!((alice_tally.for_count, alice_tally.abstain_count), (2, 1));
    let bob_tally = board.get("elect-bob").ok_or("no bob tally")?;
    assert_eq!((bob_tally.for_count, bob_tally.against_count, bob_tally.total_count), (1, 1, 2));
    println!("✅ Dashboard tallies match");

    // 6. Reopen the store and audit it
    drop(ledger);
    drop(flow);
    let reopened = Database::connect(&config).await?;
    let audit = verify_ledger(&reopened).await?;
    assert!(audit.is_clean());
    assert_eq!(audit.records_checked, receipts.len() as u64);
    for tally in &audit.tallies {
        assert_eq!(board.get(&tally.resolution_id), Some(tally));
    }

    let ledger = VoteLedger::open(
        reopened.clone(),
        Arc::new(TallyAggregator::new(reopened.clone(), 16)),
        16,
    )
    .await?;
    for receipt in &receipts {
        assert!(matches!(ledger.verify_receipt(receipt).await?, ReceiptStatus::Valid(_)));
    }
    println!("✅ Ledger audit is clean and every receipt verifies");

    Ok(())
}
