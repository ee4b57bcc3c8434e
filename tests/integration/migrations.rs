use ingest_core::{Database, SourceId};
use tempfile::tempdir;

use crate::common::listing;

#[tokio::test]
async fn test_migration_sequence() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = tempdir()?;
    let db = Database::new(temp_dir.path().join("test.db")).await?;

    // Opening the database applies every migration once.
    db.migrate().await?;
    assert_eq!(db.applied_migrations().await?, vec![1, 2, 3]);

    Ok(())
}

#[tokio::test]
async fn test_rollback_and_reapply() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = tempdir()?;
    let db = Database::new(temp_dir.path().join("test.db")).await?;

    db.rollback(1).await?;
    assert_eq!(db.applied_migrations().await?, vec![1]);

    // Staging still works without the canonical table.
    db.stage_page(None, &[listing(SourceId::Jiji, "kept", 900_000)])
        .await?;

    db.migrate().await?;
    assert_eq!(db.applied_migrations().await?, vec![1, 2, 3]);
    assert_eq!(db.listing_stats().await?.total, 1);
    assert_eq!(db.count_properties().await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_rollback_all() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = tempdir()?;
    let db = Database::new(temp_dir.path().join("test.db")).await?;

    db.rollback(0).await?;
    assert!(db.applied_migrations().await?.is_empty());
    assert!(db.listing_stats().await.is_err());

    Ok(())
}
