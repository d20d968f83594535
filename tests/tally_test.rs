//! Tally Aggregation Tests
//!
//! Conservation of counts, deduplication of redelivered events, live
//! subscriptions and the event feed consumer.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use evote_core::tally::{TallyAggregator, TallyBoard};
use evote_core::voting::{Resolution, VoteChoice, VoteLedger};
use sqlx::Row;
use tokio_stream::StreamExt;

async fn row_count(db: &evote_core::database::Database, resolution_id: &str) -> u64 {
    let row = sqlx::query("SELECT COUNT(*) AS total FROM votes WHERE resolution_id = ?")
        .bind(resolution_id)
        .fetch_one(db.pool())
        .await
        .unwrap();
    row.get::<i64, _>("total") as u64
}

#[tokio::test]
async fn test_tally_conservation() -> Result<(), Box<dyn std::error::Error>> {
    println!("🧪 Testing tally conservation...");

    let db = setup_test_db().await;
    let ledger = open_ledger(&db).await;
    let resolution = Resolution::ordinary("res-1", "agm-2024");

    let choices = [
        VoteChoice::For,
        VoteChoice::For,
        VoteChoice::Against,
        VoteChoice::Abstain,
        VoteChoice::For,
    ];
    for (i, choice) in choices.iter().enumerate() {
        ledger
            .cast_vote(&format!("sh-{}", i), &resolution, *choice)
            .await?;
    }
    // Rejected duplicate must not count.
    ledger.cast_vote("sh-0", &resolution, VoteChoice::Against).await?;

    let tally = ledger.aggregator().snapshot("res-1").await?;
    assert_eq!(tally.for_count, 3);
    assert_eq!(tally.against_count, 1);
    assert_eq!(tally.abstain_count, 1);
    assert_eq!(tally.total_count, 5);
    assert!(tally.is_consistent());
    assert_eq!(tally.total_count, row_count(&db, "res-1").await);

    assert_eq!(ledger.aggregator().recompute("res-1").await?, tally);

    println!("✅ Tally matches the stored votes");
    Ok(())
}

#[tokio::test]
async fn test_snapshot_of_untouched_resolution_hydrates_from_store() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_test_db().await;
    let ledger = open_ledger(&db).await;
    let resolution = Resolution::ordinary("res-1", "agm-2024");
    ledger.cast_vote("sh-1", &resolution, VoteChoice::For).await?;
    ledger.cast_vote("sh-2", &resolution, VoteChoice::Against).await?;

    // A fresh aggregator has never seen these votes applied.
    let aggregator = TallyAggregator::new(db.clone(), 16);
    let tally = aggregator.snapshot("res-1").await?;
    assert_eq!(tally.total_count, 2);
    assert_eq!(tally.for_count, 1);

    let empty = aggregator.snapshot("res-unknown").await?;
    assert_eq!(empty.total_count, 0);
    assert!(empty.is_consistent());

    println!("✅ Fresh aggregator hydrated from the store");
    Ok(())
}

#[tokio::test]
async fn test_redelivered_events_do_not_double_count() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_test_db().await;
    let ledger = open_ledger(&db).await;
    let resolution = Resolution::ordinary("res-1", "agm-2024");

    let outcome = ledger.cast_vote("sh-1", &resolution, VoteChoice::For).await?;
    let event = outcome.record().unwrap().event();

    let aggregator = ledger.aggregator();
    assert!(aggregator.apply(&event).await?.is_none());
    assert!(aggregator.apply(&event).await?.is_none());

    let tally = aggregator.snapshot("res-1").await?;
    assert_eq!(tally.total_count, 1);
    assert_eq!(tally.for_count, 1);

    println!("✅ Redelivered events ignored");
    Ok(())
}

#[tokio::test]
async fn test_first_event_on_fresh_aggregator_counts_once() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_test_db().await;
    let ledger = open_ledger(&db).await;
    let resolution = Resolution::ordinary("res-1", "agm-2024");
    let outcome = ledger.cast_vote("sh-1", &resolution, VoteChoice::Abstain).await?;
    let event = outcome.record().unwrap().event();

    // Hydration already includes the committed vote.
    let aggregator = TallyAggregator::new(db.clone(), 16);
    let tally = aggregator.apply(&event).await?.expect("first sighting is published");
    assert_eq!(tally.total_count, 1);
    assert!(aggregator.apply(&event).await?.is_none());

    println!("✅ First event published once");
    Ok(())
}

#[tokio::test]
async fn test_snapshot_before_event_still_pushes_to_subscribers() -> Result<(), Box<dyn std::error::Error>> {
    println!("🧪 Testing a dashboard read that lands before the vote event...");

    let db = setup_test_db().await;
    let writer = open_ledger(&db).await;
    let resolution = Resolution::ordinary("res-1", "agm-2024");

    let aggregator = TallyAggregator::new(db.clone(), 16);
    let mut updates = aggregator.subscribe(["res-1"]);

    // Committed, but this aggregator has not applied the event yet.
    let outcome = writer.cast_vote("sh-1", &resolution, VoteChoice::For).await?;
    let event = outcome.record().unwrap().event();

    assert_eq!(aggregator.snapshot("res-1").await?.total_count, 1);
    assert!(aggregator.apply(&event).await?.is_none());

    let pushed = tokio::time::timeout(Duration::from_secs(1), updates.next())
        .await?
        .expect("stream open");
    assert_eq!(pushed.total_count, 1);
    assert_eq!(pushed.for_count, 1);

    println!("✅ Subscriber received the vote counted during hydration");
    Ok(())
}

#[tokio::test]
async fn test_subscribe_receives_only_requested_resolutions() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_test_db().await;
    let ledger = open_ledger(&db).await;
    let watched = Resolution::ordinary("res-watched", "agm-2024");
    let other = Resolution::ordinary("res-other", "agm-2024");

    let mut updates = ledger.aggregator().subscribe(["res-watched"]);

    ledger.cast_vote("sh-1", &other, VoteChoice::For).await?;
    ledger.cast_vote("sh-1", &watched, VoteChoice::For).await?;
    ledger.cast_vote("sh-2", &watched, VoteChoice::Against).await?;

    let first = tokio::time::timeout(Duration::from_secs(1), updates.next())
        .await?
        .expect("stream open");
    assert_eq!(first.resolution_id, "res-watched");
    assert_eq!(first.total_count, 1);

    let second = tokio::time::timeout(Duration::from_secs(1), updates.next())
        .await?
        .expect("stream open");
    assert_eq!(second.total_count, 2);
    assert_eq!(second.against_count, 1);

    let mut board = TallyBoard::new();
    assert!(board.apply(second.clone()));
    assert!(!board.apply(first));
    assert_eq!(board.get("res-watched"), Some(&second));

    println!("✅ Subscriber saw only its resolutions");
    Ok(())
}

#[tokio::test]
async fn test_event_consumer_follows_ledger_feed() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_test_db().await;
    let ledger = open_ledger(&db).await;
    let resolution = Resolution::ordinary("res-1", "agm-2024");

    // A read-side replica fed only by the ledger's event channel.
    let replica = Arc::new(TallyAggregator::new(db.clone(), 16));
    let mut updates = replica.subscribe(["res-1"]);
    let consumer = Arc::clone(&replica).spawn_event_consumer(ledger.subscribe_events());

    ledger.cast_vote("sh-1", &resolution, VoteChoice::For).await?;
    ledger.cast_vote("sh-2", &resolution, VoteChoice::For).await?;

    let mut latest = None;
    while let Ok(Some(tally)) = tokio::time::timeout(Duration::from_secs(1), updates.next()).await {
        let done = tally.total_count == 2;
        latest = Some(tally);
        if done {
            break;
        }
    }
    let latest = latest.expect("replica published tallies");
    assert_eq!(latest.total_count, 2);
    assert_eq!(latest.for_count, 2);
    assert_eq!(replica.snapshot("res-1").await?, ledger.aggregator().snapshot("res-1").await?);

    // Dropping the ledger closes the feed and ends the consumer.
    drop(ledger);
    tokio::time::timeout(Duration::from_secs(1), consumer).await??;

    println!("✅ Replica followed the ledger feed");
    Ok(())
}

#[tokio::test]
async fn test_lagging_consumer_resyncs_from_store() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_test_db().await;
    let aggregator = Arc::new(TallyAggregator::new(db.clone(), 64));
    // Capacity 1 guarantees the replica's receiver lags.
    let ledger = VoteLedger::open(db.clone(), Arc::clone(&aggregator), 1).await?;
    let resolution = Resolution::ordinary("res-1", "agm-2024");

    let replica = Arc::new(TallyAggregator::new(db.clone(), 64));
    replica.snapshot("res-1").await?;
    let events = ledger.subscribe_events();

    for i in 0..5 {
        ledger
            .cast_vote(&format!("sh-{}", i), &resolution, VoteChoice::Against)
            .await?;
    }
    drop(ledger);

    let consumer = Arc::clone(&replica).spawn_event_consumer(events);
    tokio::time::timeout(Duration::from_secs(1), consumer).await??;

    let tally = replica.snapshot("res-1").await?;
    assert_eq!(tally.total_count, 5);
    assert_eq!(tally.against_count, 5);
    assert_eq!(tally, aggregator.snapshot("res-1").await?);

    println!("✅ Lagging replica resynced from the store");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_voters_keep_tally_consistent() -> Result<(), Box<dyn std::error::Error>> {
    println!("🧪 Testing concurrent voters...");

    let dir = tempfile::tempdir()?;
    let url = format!("sqlite://{}", dir.path().join("tally.db").display());
    let db = evote_core::database::Database::new(&url, 8).await?;
    db.run_migrations().await?;
    let ledger = Arc::new(open_ledger(&db).await);
    let resolution = Resolution::ordinary("res-1", "agm-2024");

    let choices = [VoteChoice::For, VoteChoice::Against, VoteChoice::Abstain];
    let mut handles = Vec::new();
    for i in 0..30 {
        let ledger = Arc::clone(&ledger);
        let resolution = resolution.clone();
        handles.push(tokio::spawn(async move {
            // Every shareholder tries twice; only the first may count.
            let choice = choices[i % choices.len()];
            let shareholder = format!("sh-{}", i);
            ledger.cast_vote(&shareholder, &resolution, choice).await?;
            ledger.cast_vote(&shareholder, &resolution, choice).await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    let tally = ledger.aggregator().snapshot("res-1").await?;
    assert_eq!(tally.total_count, 30);
    assert_eq!(tally.for_count, 10);
    assert_eq!(tally.against_count, 10);
    assert_eq!(tally.abstain_count, 10);
    assert!(tally.is_consistent());
    assert_eq!(tally.total_count, row_count(&db, "res-1").await);

    println!("✅ Tally consistent after concurrent voting");
    Ok(())
}
