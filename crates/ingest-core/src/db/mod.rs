pub mod migrations;
pub mod queries;
pub mod types;

pub use migrations::{apply_migrations, MIGRATIONS};
pub use queries::ListingQueryBuilder;
pub use types::{ListingFilter, ListingPage, ListingStats, SourceStats, UpsertOutcome, MAX_LIST_LIMIT};

use crate::{ExternalListing, IngestError, Property, RawListing, Result, RunId, SourceId};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database file at `db_path` and bring
    /// its schema up to date.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// A private in-memory database. A single connection is kept alive for
    /// the life of the pool since every connection would otherwise see its
    /// own empty database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        debug!("Running database migrations");
        apply_migrations(&self.pool)
            .await
            .map_err(|e| IngestError::Migration(e.to_string()))
    }

    pub async fn rollback(&self, version: i32) -> Result<()> {
        migrations::rollback_to(&self.pool, version)
            .await
            .map_err(|e| IngestError::Migration(e.to_string()))
    }

    pub async fn applied_migrations(&self) -> Result<Vec<i32>> {
        Ok(migrations::get_applied_migrations(&self.pool).await?)
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Stage one fetched page. Every listing is upserted by
    /// `(source, source_url)` inside a single transaction, so a page is either
    /// fully staged or not at all. Repeated URLs within the page collapse to
    /// their last occurrence.
    pub async fn stage_page(
        &self,
        run: Option<RunId>,
        listings: &[RawListing],
    ) -> Result<Vec<UpsertOutcome>> {
        let listings = collapse_duplicates(listings);
        if listings.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let run = run.and_then(|id| i64::try_from(id).ok());
        let mut outcomes = Vec::with_capacity(listings.len());
        let mut tx = self.pool.begin().await?;

        for listing in listings {
            let image_urls = serde_json::to_string(&listing.image_urls)?;
            let location_json = listing
                .location
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let raw_json = listing
                .extra
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let price_text = listing.price.as_ref().map(|price| price.text());
            let bedrooms = listing.bedrooms.map(i64::from);
            let bathrooms = listing.bathrooms.map(i64::from);

            let existing: Option<i64> = sqlx::query_scalar(
                "SELECT id FROM external_listings WHERE source = ? AND source_url = ?",
            )
            .bind(listing.source)
            .bind(&listing.source_url)
            .fetch_optional(&mut *tx)
            .await?;

            let outcome = match existing {
                Some(id) => {
                    sqlx::query(
                        r#"
                        UPDATE external_listings SET
                            title = ?,
                            price_text = ?,
                            price_amount = ?,
                            location_text = ?,
                            location_json = ?,
                            bedrooms = ?,
                            bathrooms = ?,
                            image_urls = ?,
                            posted_at = ?,
                            raw_json = ?,
                            last_seen_run = ?,
                            import_error = NULL,
                            updated_at = ?
                        WHERE id = ?
                        "#,
                    )
                    .bind(&listing.title)
                    .bind(&price_text)
                    .bind(listing.price_amount())
                    .bind(listing.location_text())
                    .bind(&location_json)
                    .bind(bedrooms)
                    .bind(bathrooms)
                    .bind(&image_urls)
                    .bind(&listing.posted_at)
                    .bind(&raw_json)
                    .bind(run)
                    .bind(now)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                    UpsertOutcome::Updated(id)
                }
                None => {
                    let id = sqlx::query(
                        r#"
                        INSERT INTO external_listings (
                            source, source_url, title, price_text, price_amount,
                            location_text, location_json, bedrooms, bathrooms,
                            image_urls, posted_at, raw_json, imported,
                            last_seen_run, created_at, updated_at
                        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)
                        "#,
                    )
                    .bind(listing.source)
                    .bind(&listing.source_url)
                    .bind(&listing.title)
                    .bind(&price_text)
                    .bind(listing.price_amount())
                    .bind(listing.location_text())
                    .bind(&location_json)
                    .bind(bedrooms)
                    .bind(bathrooms)
                    .bind(&image_urls)
                    .bind(&listing.posted_at)
                    .bind(&raw_json)
                    .bind(run)
                    .bind(now)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?
                    .last_insert_rowid();
                    UpsertOutcome::Inserted(id)
                }
            };
            outcomes.push(outcome);
        }

        tx.commit().await?;
        Ok(outcomes)
    }

    pub async fn get_listing(&self, id: i64) -> Result<Option<ExternalListing>> {
        let listing =
            sqlx::query_as::<_, ExternalListing>("SELECT * FROM external_listings WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(listing)
    }

    pub async fn get_listing_by_url(
        &self,
        source: SourceId,
        source_url: &str,
    ) -> Result<Option<ExternalListing>> {
        let listing = sqlx::query_as::<_, ExternalListing>(
            "SELECT * FROM external_listings WHERE source = ? AND source_url = ?",
        )
        .bind(source)
        .bind(source_url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(listing)
    }

    pub async fn list_listings(&self, filter: &ListingFilter) -> Result<ListingPage> {
        let total = ListingQueryBuilder::count()
            .with_source(filter.source)
            .with_imported(filter.imported)
            .fetch_count(&self.pool)
            .await?;

        let rows = ListingQueryBuilder::select()
            .with_source(filter.source)
            .with_imported(filter.imported)
            .newest_first()
            .with_limit(i64::from(filter.normalized_limit()))
            .with_offset(filter.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok(ListingPage {
            rows,
            total,
            page: filter.normalized_page(),
            limit: filter.normalized_limit(),
        })
    }

    /// Every staged row, oldest first. Used by exports.
    pub async fn all_listings(&self) -> Result<Vec<ExternalListing>> {
        ListingQueryBuilder::select()
            .oldest_first()
            .fetch_all(&self.pool)
            .await
    }

    /// Up to `limit` rows still waiting for promotion, oldest first. Rows
    /// flagged as unmappable are left out until a re-scrape clears the flag.
    pub async fn pending_listings(&self, limit: i64) -> Result<Vec<ExternalListing>> {
        ListingQueryBuilder::select()
            .awaiting_import()
            .oldest_first()
            .with_limit(limit)
            .fetch_all(&self.pool)
            .await
    }

    pub async fn listing_stats(&self) -> Result<ListingStats> {
        let rows = sqlx::query(
            r#"
            SELECT
                source,
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN imported THEN 1 ELSE 0 END), 0) AS imported,
                MAX(updated_at) AS last_seen_at
            FROM external_listings
            GROUP BY source
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut by_source: HashMap<SourceId, SourceStats> = SourceId::ALL
            .into_iter()
            .map(|source| (source, SourceStats::empty(source)))
            .collect();

        for row in rows {
            let source_text: String = row.try_get("source")?;
            let Ok(source) = source_text.parse::<SourceId>() else {
                debug!("Ignoring staged rows for unknown source {}", source_text);
                continue;
            };
            let total: i64 = row.try_get("total")?;
            let imported: i64 = row.try_get("imported")?;
            let last_seen: Option<String> = row.try_get("last_seen_at")?;
            let last_seen_at = last_seen.as_deref().and_then(parse_sqlite_timestamp);

            by_source.insert(
                source,
                SourceStats {
                    source,
                    total,
                    imported,
                    pending: total - imported,
                    last_seen_at,
                },
            );
        }

        let per_source: Vec<SourceStats> = SourceId::ALL
            .into_iter()
            .filter_map(|source| by_source.remove(&source))
            .collect();
        let total = per_source.iter().map(|s| s.total).sum();
        let imported = per_source.iter().map(|s| s.imported).sum();

        Ok(ListingStats {
            total,
            imported,
            pending: total - imported,
            per_source,
        })
    }

    pub async fn get_property_by_url(
        &self,
        source: SourceId,
        source_url: &str,
    ) -> Result<Option<Property>> {
        let property = sqlx::query_as::<_, Property>(
            "SELECT * FROM properties WHERE source = ? AND source_url = ?",
        )
        .bind(source)
        .bind(source_url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(property)
    }

    pub async fn count_properties(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM properties")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// Keep the last occurrence of each `(source, source_url)` at the position of
/// its first occurrence.
fn collapse_duplicates(listings: &[RawListing]) -> Vec<&RawListing> {
    let mut positions: HashMap<(SourceId, &str), usize> = HashMap::new();
    let mut collapsed: Vec<&RawListing> = Vec::with_capacity(listings.len());
    for listing in listings {
        match positions.get(&(listing.source, listing.source_url.as_str())) {
            Some(&index) => collapsed[index] = listing,
            None => {
                positions.insert((listing.source, listing.source_url.as_str()), collapsed.len());
                collapsed.push(listing);
            }
        }
    }
    collapsed
}

/// Timestamps come back from aggregate queries as plain text in whichever
/// layout sqlx wrote them.
fn parse_sqlite_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%:z"))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
