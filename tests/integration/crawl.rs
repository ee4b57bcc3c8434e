use std::sync::Arc;

use ingest_core::{ListingFilter, SourceId};
use listing_ingest::{CrawlConfig, RunState};

use crate::common::{listing, structure_error, supervisor, temp_db, ScriptedAdapter, ScriptedProvider, Step};

#[tokio::test]
async fn test_listing_identity_is_unique_across_pages_and_runs() {
    let (_dir, db) = temp_db().await;
    let shared = listing(SourceId::BuyRentKenya, "shared", 5_000_000);
    let provider = Arc::new(
        ScriptedProvider::default().with(
            ScriptedAdapter::new(SourceId::BuyRentKenya)
                .page(
                    1,
                    Step::Listings(vec![
                        listing(SourceId::BuyRentKenya, "a", 1_000_000),
                        shared.clone(),
                        listing(SourceId::BuyRentKenya, "a", 1_100_000),
                    ]),
                )
                .page(2, Step::Listings(vec![shared, listing(SourceId::BuyRentKenya, "b", 2_000_000)])),
        ),
    );
    let supervisor = supervisor(db.clone(), provider);

    for _ in 0..2 {
        let id = supervisor
            .start(CrawlConfig::new(5, vec![SourceId::BuyRentKenya]))
            .unwrap();
        assert_eq!(supervisor.wait(id).await.unwrap(), RunState::Completed);
    }

    let stats = db.listing_stats().await.unwrap();
    assert_eq!(stats.total, 3);

    // The later duplicate within a page wins.
    let a = db
        .get_listing_by_url(SourceId::BuyRentKenya, "https://buyrentkenya.test/listings/a")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(a.price_amount, Some(1_100_000.0));
}

#[tokio::test]
async fn test_one_failing_site_does_not_stop_the_others() {
    let (_dir, db) = temp_db().await;
    let provider = Arc::new(
        ScriptedProvider::default()
            .with(ScriptedAdapter::new(SourceId::BuyRentKenya).full_pages(2, 3))
            .with(
                ScriptedAdapter::new(SourceId::Property24)
                    .page(1, Step::Fail(structure_error(SourceId::Property24, 1))),
            )
            .with(ScriptedAdapter::new(SourceId::Jiji).full_pages(1, 4)),
    );
    let supervisor = supervisor(db.clone(), provider.clone());

    let id = supervisor
        .start(CrawlConfig::new(
            3,
            vec![SourceId::BuyRentKenya, SourceId::Property24, SourceId::Jiji],
        ))
        .unwrap();
    assert_eq!(supervisor.wait(id).await.unwrap(), RunState::Completed);

    let outcome = supervisor.status(Some(id)).unwrap().outcome.unwrap();
    assert_eq!(outcome.sites[&SourceId::BuyRentKenya].records_staged, 6);
    assert_eq!(outcome.sites[&SourceId::Jiji].records_staged, 4);

    let failed = &outcome.sites[&SourceId::Property24];
    assert_eq!(failed.records_staged, 0);
    assert_eq!(failed.errors, 1);
    assert!(failed.last_error.as_deref().unwrap().contains("structure"));
    // Structure errors are not retried.
    assert_eq!(provider.adapter(SourceId::Property24).requested(), vec![1]);

    let logs = supervisor.logs(id).unwrap();
    assert!(logs
        .iter()
        .any(|line| line.message.starts_with("property24: page 1 failed")));
}

#[tokio::test]
async fn test_empty_page_ends_the_site() {
    let (_dir, db) = temp_db().await;
    let provider = Arc::new(
        ScriptedProvider::default().with(
            ScriptedAdapter::new(SourceId::Jiji)
                .full_pages(3, 2)
                .page(4, Step::Listings(Vec::new()))
                .page(5, Step::Listings(vec![listing(SourceId::Jiji, "never", 1)])),
        ),
    );
    let supervisor = supervisor(db, provider.clone());

    let id = supervisor.start(CrawlConfig::new(10, vec![SourceId::Jiji])).unwrap();
    supervisor.wait(id).await.unwrap();

    assert_eq!(provider.adapter(SourceId::Jiji).requested(), vec![1, 2, 3, 4]);
    let outcome = supervisor.status(Some(id)).unwrap().outcome.unwrap();
    assert!(outcome.sites[&SourceId::Jiji].exhausted);
    assert_eq!(outcome.sites[&SourceId::Jiji].pages_fetched, 3);
}

#[tokio::test]
async fn test_rescrape_updates_in_place() {
    let (_dir, db) = temp_db().await;
    let url = "https://property24.test/listings/villa";

    let first = Arc::new(ScriptedProvider::default().with(
        ScriptedAdapter::new(SourceId::Property24)
            .page(1, Step::Listings(vec![listing(SourceId::Property24, "villa", 9_000_000)])),
    ));
    let supervisor_one = supervisor(db.clone(), first);
    let id = supervisor_one
        .start(CrawlConfig::new(1, vec![SourceId::Property24]))
        .unwrap();
    supervisor_one.wait(id).await.unwrap();
    let before = db
        .get_listing_by_url(SourceId::Property24, url)
        .await
        .unwrap()
        .unwrap();

    let second = Arc::new(ScriptedProvider::default().with(
        ScriptedAdapter::new(SourceId::Property24)
            .page(1, Step::Listings(vec![listing(SourceId::Property24, "villa", 8_500_000)])),
    ));
    let supervisor_two = supervisor(db.clone(), second);
    let id = supervisor_two
        .start(CrawlConfig::new(1, vec![SourceId::Property24]))
        .unwrap();
    supervisor_two.wait(id).await.unwrap();
    let after = db
        .get_listing_by_url(SourceId::Property24, url)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(after.id, before.id);
    assert_eq!(after.created_at, before.created_at);
    assert!(after.updated_at >= before.updated_at);
    assert_eq!(after.price_amount, Some(8_500_000.0));
    let outcome = supervisor_two.status(Some(id)).unwrap().outcome.unwrap();
    assert_eq!(outcome.sites[&SourceId::Property24].records_updated, 1);

    let page = db.list_listings(&ListingFilter::default()).await.unwrap();
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let (_dir, db) = temp_db().await;
    let provider = Arc::new(ScriptedProvider::default().with(
        ScriptedAdapter::new(SourceId::BuyRentKenya).page(
            1,
            Step::Flaky(2, vec![listing(SourceId::BuyRentKenya, "flaky", 3_000_000)]),
        ),
    ));
    let supervisor = supervisor(db.clone(), provider.clone());

    let id = supervisor
        .start(CrawlConfig::new(2, vec![SourceId::BuyRentKenya]))
        .unwrap();
    assert_eq!(supervisor.wait(id).await.unwrap(), RunState::Completed);

    assert_eq!(provider.adapter(SourceId::BuyRentKenya).requested(), vec![1, 1, 1, 2]);
    let outcome = supervisor.status(Some(id)).unwrap().outcome.unwrap();
    assert_eq!(outcome.sites[&SourceId::BuyRentKenya].records_staged, 1);
    assert_eq!(outcome.sites[&SourceId::BuyRentKenya].errors, 0);
    let retries = supervisor
        .logs(id)
        .unwrap()
        .into_iter()
        .filter(|line| line.message.contains("retrying"))
        .count();
    assert_eq!(retries, 2);
}

#[tokio::test]
async fn test_store_failure_fails_the_run() {
    let (_dir, db) = temp_db().await;
    db.rollback(0).await.unwrap();

    let provider = Arc::new(
        ScriptedProvider::default().with(ScriptedAdapter::new(SourceId::Jiji).full_pages(1, 2)),
    );
    let supervisor = supervisor(db, provider);
    let id = supervisor.start(CrawlConfig::new(1, vec![SourceId::Jiji])).unwrap();

    assert_eq!(supervisor.wait(id).await.unwrap(), RunState::Failed);
    let status = supervisor.status(Some(id)).unwrap();
    assert!(status.error.is_some());
    assert!(status.outcome.is_none());
    assert!(!supervisor.is_running());
}
