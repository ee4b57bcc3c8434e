use std::sync::Arc;

use ingest_core::{Importer, SourceId};
use listing_ingest::{CrawlConfig, RunState};

use crate::common::{listing, supervisor, temp_db, ScriptedAdapter, ScriptedProvider};

#[tokio::test]
async fn test_crawl_then_import_is_idempotent() {
    let (_dir, db) = temp_db().await;
    let provider = Arc::new(
        ScriptedProvider::default()
            .with(ScriptedAdapter::new(SourceId::BuyRentKenya).full_pages(2, 4))
            .with(ScriptedAdapter::new(SourceId::Property24).full_pages(1, 3)),
    );
    let supervisor = supervisor(db.clone(), provider);
    let id = supervisor
        .start(CrawlConfig::new(3, vec![SourceId::BuyRentKenya, SourceId::Property24]))
        .unwrap();
    assert_eq!(supervisor.wait(id).await.unwrap(), RunState::Completed);

    let importer = Importer::new(db.clone());
    let first = importer.import_all(5).await.unwrap();
    assert_eq!(first.imported, 11);
    assert!(first.errors.is_empty());

    let second = importer.import_all(5).await.unwrap();
    assert_eq!(second.processed(), 0);
    assert_eq!(db.count_properties().await.unwrap(), 11);

    let stats = db.listing_stats().await.unwrap();
    assert_eq!(stats.imported, 11);
    assert_eq!(stats.pending, 0);

    let property = db
        .get_property_by_url(SourceId::Property24, "https://property24.test/listings/p1-0")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(property.location, "Kileleshwa, Nairobi");
    assert_eq!(property.city.as_deref(), Some("Nairobi"));
    assert_eq!(property.price, 1_000_000.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_importers_promote_each_listing_once() {
    let (_dir, db) = temp_db().await;
    let listings: Vec<_> = (0..60)
        .map(|n| listing(SourceId::Jiji, &format!("ad-{n}"), 500_000 + n))
        .collect();
    db.stage_page(Some(1), &listings).await.unwrap();

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let importer = Importer::new(db.clone());
            tokio::spawn(async move { importer.import_all(7).await })
        })
        .collect();

    let mut imported = 0;
    for worker in workers {
        imported += worker.await.unwrap().unwrap().imported;
    }

    assert_eq!(imported, 60);
    assert_eq!(db.count_properties().await.unwrap(), 60);
    assert_eq!(db.listing_stats().await.unwrap().pending, 0);
}

#[tokio::test]
async fn test_unmappable_listing_waits_for_a_rescrape() {
    let (_dir, db) = temp_db().await;
    let url = "https://buyrentkenya.test/listings/no-price";
    let mut priceless = listing(SourceId::BuyRentKenya, "no-price", 1);
    priceless.price = None;
    db.stage_page(Some(1), &[priceless]).await.unwrap();

    let importer = Importer::new(db.clone());
    let report = importer.import_batch(10).await.unwrap();
    assert_eq!(report.imported, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.errors[0].reason, "no resolvable price");

    let flagged = db
        .get_listing_by_url(SourceId::BuyRentKenya, url)
        .await
        .unwrap()
        .unwrap();
    assert!(!flagged.imported);
    assert_eq!(flagged.import_error.as_deref(), Some("no resolvable price"));

    // Flagged rows are not retried on their own.
    assert_eq!(importer.import_batch(10).await.unwrap().processed(), 0);

    db.stage_page(Some(2), &[listing(SourceId::BuyRentKenya, "no-price", 4_200_000)])
        .await
        .unwrap();
    let report = importer.import_batch(10).await.unwrap();
    assert_eq!(report.imported, 1);

    let promoted = db
        .get_listing_by_url(SourceId::BuyRentKenya, url)
        .await
        .unwrap()
        .unwrap();
    assert!(promoted.imported);
    assert!(promoted.import_error.is_none());
    assert_eq!(promoted.last_seen_run, Some(2));
}

#[tokio::test]
async fn test_rescrape_keeps_a_promoted_listing_imported() {
    let (_dir, db) = temp_db().await;
    let url = "https://property24.test/listings/loft";
    db.stage_page(Some(1), &[listing(SourceId::Property24, "loft", 7_000_000)])
        .await
        .unwrap();
    assert_eq!(Importer::new(db.clone()).import_batch(10).await.unwrap().imported, 1);
    let promoted = db
        .get_listing_by_url(SourceId::Property24, url)
        .await
        .unwrap()
        .unwrap();

    db.stage_page(Some(2), &[listing(SourceId::Property24, "loft", 6_750_000)])
        .await
        .unwrap();
    let rescraped = db
        .get_listing_by_url(SourceId::Property24, url)
        .await
        .unwrap()
        .unwrap();

    assert!(rescraped.imported);
    assert!(rescraped.imported_at.is_some());
    assert_eq!(rescraped.imported_at, promoted.imported_at);
    assert_eq!(rescraped.price_amount, Some(6_750_000.0));
    assert_eq!(rescraped.last_seen_run, Some(2));
    assert_eq!(db.listing_stats().await.unwrap().pending, 0);
}
