use std::sync::Arc;
use std::time::Duration;

use ingest_core::SourceId;
use listing_ingest::{CrawlConfig, RunState, SupervisorError};

use crate::common::{supervisor, temp_db, Gate, ScriptedAdapter, ScriptedProvider};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_admit_one_run() {
    let (_dir, db) = temp_db().await;
    let gate = Gate::new(1);
    let (reached, release) = (gate.reached.clone(), gate.release.clone());
    let provider = Arc::new(ScriptedProvider::default().with(
        ScriptedAdapter::new(SourceId::BuyRentKenya)
            .full_pages(2, 2)
            .gated(gate),
    ));
    let supervisor = supervisor(db, provider);

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let supervisor = supervisor.clone();
            tokio::spawn(async move {
                supervisor.start(CrawlConfig::new(2, vec![SourceId::BuyRentKenya]))
            })
        })
        .collect();

    let mut started = Vec::new();
    let mut rejected = Vec::new();
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(id) => started.push(id),
            Err(SupervisorError::AlreadyRunning { process_id }) => rejected.push(process_id),
            Err(other) => panic!("unexpected start error: {other}"),
        }
    }

    assert_eq!(started.len(), 1);
    assert_eq!(rejected.len(), 7);
    assert!(rejected.iter().all(|id| *id == started[0]));
    assert_eq!(supervisor.runs().len(), 1);

    reached.notified().await;
    release.notify_one();
    assert_eq!(supervisor.wait(started[0]).await.unwrap(), RunState::Completed);

    // The slot is free again once the run is terminal.
    let next = supervisor
        .start(CrawlConfig::new(1, vec![SourceId::BuyRentKenya]))
        .unwrap();
    assert!(next > started[0]);
    // Only the first fetch of the gated page blocks.
    assert_eq!(supervisor.wait(next).await.unwrap(), RunState::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_logs_read_during_a_run_are_ordered_and_gap_free() {
    let (_dir, db) = temp_db().await;
    let provider = Arc::new(
        ScriptedProvider::default()
            .with(ScriptedAdapter::new(SourceId::BuyRentKenya).full_pages(6, 5))
            .with(ScriptedAdapter::new(SourceId::Jiji).full_pages(6, 5)),
    );
    let supervisor = supervisor(db, provider);
    let id = supervisor
        .start(CrawlConfig::new(6, vec![SourceId::BuyRentKenya, SourceId::Jiji]))
        .unwrap();

    let mut seen = Vec::new();
    loop {
        let finished = supervisor.status(Some(id)).unwrap().state.is_terminal();
        seen.extend(supervisor.logs_since(id, seen.len()).unwrap());
        if finished {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    seen.extend(supervisor.logs_since(id, seen.len()).unwrap());

    assert!(!seen.is_empty());
    assert_eq!(seen, supervisor.logs(id).unwrap());
    for (index, line) in seen.iter().enumerate() {
        assert_eq!(line.seq, index);
    }
    for pair in seen.windows(2) {
        assert!(pair[1].timestamp >= pair[0].timestamp);
    }
    assert!(seen.last().unwrap().message.contains("completed"));
}

#[tokio::test]
async fn test_cancellation_keeps_the_page_in_flight() {
    let (_dir, db) = temp_db().await;
    let gate = Gate::new(2);
    let (reached, release) = (gate.reached.clone(), gate.release.clone());
    let provider = Arc::new(ScriptedProvider::default().with(
        ScriptedAdapter::new(SourceId::Property24)
            .full_pages(4, 3)
            .gated(gate),
    ));
    let supervisor = supervisor(db.clone(), provider.clone());

    let id = supervisor
        .start(CrawlConfig::new(4, vec![SourceId::Property24]))
        .unwrap();
    reached.notified().await;
    assert_eq!(supervisor.cancel(None).unwrap(), id);
    // A second request is acknowledged without effect.
    assert_eq!(supervisor.cancel(Some(id)).unwrap(), id);
    release.notify_one();

    assert_eq!(supervisor.wait(id).await.unwrap(), RunState::Cancelled);
    assert_eq!(provider.adapter(SourceId::Property24).requested(), vec![1, 2]);

    let status = supervisor.status(Some(id)).unwrap();
    assert!(status.cancel_requested);
    let outcome = status.outcome.unwrap();
    assert!(outcome.cancelled);
    assert_eq!(outcome.records_staged(), 6);
    assert_eq!(db.listing_stats().await.unwrap().total, 6);

    let cancellations = supervisor
        .logs(id)
        .unwrap()
        .into_iter()
        .filter(|line| line.message.starts_with("Cancellation requested"))
        .count();
    assert_eq!(cancellations, 1);

    assert!(matches!(
        supervisor.cancel(Some(id)),
        Err(SupervisorError::NotRunning(_))
    ));
    assert!(matches!(supervisor.cancel(None), Err(SupervisorError::NoActiveRun)));
}

#[tokio::test]
async fn test_invalid_configs_are_rejected_before_a_run_exists() {
    let (_dir, db) = temp_db().await;
    let supervisor = supervisor(db, Arc::new(ScriptedProvider::default()));

    for config in [
        CrawlConfig::new(0, vec![SourceId::Jiji]),
        CrawlConfig::new(21, vec![SourceId::Jiji]),
        CrawlConfig::new(3, Vec::new()),
    ] {
        assert!(matches!(
            supervisor.start(config),
            Err(SupervisorError::InvalidConfig(_))
        ));
    }
    assert!(supervisor.runs().is_empty());
    assert!(supervisor.status(None).is_none());
    assert!(matches!(supervisor.logs(1), Err(SupervisorError::NotFound(1))));
}

#[tokio::test]
async fn test_runs_are_listed_newest_first() {
    let (_dir, db) = temp_db().await;
    let provider = Arc::new(
        ScriptedProvider::default().with(ScriptedAdapter::new(SourceId::Jiji).full_pages(1, 1)),
    );
    let supervisor = supervisor(db, provider);

    let mut ids = Vec::new();
    for _ in 0..3 {
        let id = supervisor.start(CrawlConfig::new(1, vec![SourceId::Jiji])).unwrap();
        supervisor.wait(id).await.unwrap();
        ids.push(id);
    }

    let listed: Vec<_> = supervisor.runs().into_iter().map(|run| run.process_id).collect();
    ids.reverse();
    assert_eq!(listed, ids);
    assert_eq!(supervisor.status(None).unwrap().process_id, ids[0]);
}
