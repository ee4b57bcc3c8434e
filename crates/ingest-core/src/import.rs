//! Promotion of staged listings into the canonical `properties` table.
//!
//! Rows are taken oldest first. Each promotion inserts the canonical row and
//! marks the staging row in one transaction; the `(source, source_url)` key
//! guards against a listing ever being promoted twice, whether batches run
//! concurrently or are re-run after a failure.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::parse::{self, parse_price};
use crate::{Database, ExternalListing, IngestError, LocationField, Result, SourceId};

pub const MAX_BATCH_SIZE: u32 = 1000;

/// Why a staged row could not be mapped to a canonical property.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum MappingError {
    #[error("no resolvable price")]
    MissingPrice,
    #[error("no resolvable location")]
    MissingLocation,
    #[error("source url is not absolute: {0}")]
    InvalidUrl(String),
}

/// A staged row that was skipped during a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportError {
    pub listing_id: i64,
    pub source: SourceId,
    pub source_url: String,
    pub reason: String,
}

impl ImportError {
    fn new(row: &ExternalListing, error: &MappingError) -> Self {
        Self {
            listing_id: row.id,
            source: row.source,
            source_url: row.source_url.clone(),
            reason: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub imported: u32,
    pub skipped: u32,
    pub errors: Vec<ImportError>,
}

impl ImportReport {
    pub fn processed(&self) -> u32 {
        self.imported + self.skipped
    }

    fn absorb(&mut self, other: ImportReport) {
        self.imported += other.imported;
        self.skipped += other.skipped;
        self.errors.extend(other.errors);
    }
}

/// The canonical shape a staged row maps into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProperty {
    pub source: SourceId,
    pub source_url: String,
    pub title: String,
    pub price: f64,
    pub location: String,
    pub city: Option<String>,
    pub bedrooms: Option<i64>,
    pub bathrooms: Option<i64>,
    pub image_urls: Vec<String>,
    pub listed_at: Option<String>,
    pub external_listing_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Promotion {
    Imported,
    /// A canonical row already existed for the key; the staging row is now marked.
    AlreadyPresent,
    /// Another importer marked the staging row first.
    AlreadyImported,
}

#[derive(Debug, Clone)]
pub struct Importer {
    db: Database,
}

impl Importer {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Promote up to `batch_size` pending rows.
    pub async fn import_batch(&self, batch_size: u32) -> Result<ImportReport> {
        if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
            return Err(IngestError::InvalidBatchSize(batch_size));
        }

        let rows = self.db.pending_listings(i64::from(batch_size)).await?;
        debug!("Selected {} staged listings for import", rows.len());

        let mut report = ImportReport::default();
        for row in rows {
            let property = match map_listing(&row) {
                Ok(property) => property,
                Err(e) => {
                    warn!(
                        listing_id = row.id,
                        source = %row.source,
                        url = %row.source_url,
                        "Skipping staged listing: {}",
                        e
                    );
                    self.flag_unmappable(row.id, &e).await?;
                    report.skipped += 1;
                    report.errors.push(ImportError::new(&row, &e));
                    continue;
                }
            };

            match self.promote(&property).await? {
                Promotion::Imported => report.imported += 1,
                Promotion::AlreadyPresent | Promotion::AlreadyImported => {
                    debug!(listing_id = row.id, "Listing already promoted");
                    report.skipped += 1;
                }
            }
        }

        info!(
            "Import batch finished: {} imported, {} skipped",
            report.imported, report.skipped
        );
        Ok(report)
    }

    /// Run batches until one comes back empty.
    pub async fn import_all(&self, batch_size: u32) -> Result<ImportReport> {
        let mut total = ImportReport::default();
        loop {
            let report = self.import_batch(batch_size).await?;
            if report.processed() == 0 {
                break;
            }
            total.absorb(report);
        }
        Ok(total)
    }

    async fn flag_unmappable(&self, listing_id: i64, error: &MappingError) -> Result<()> {
        sqlx::query("UPDATE external_listings SET import_error = ? WHERE id = ? AND imported = 0")
            .bind(error.to_string())
            .bind(listing_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    async fn promote(&self, property: &NewProperty) -> Result<Promotion> {
        let image_urls = serde_json::to_string(&property.image_urls)?;
        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO properties (
                source, source_url, title, price, location, city, bedrooms,
                bathrooms, image_urls, listed_at, external_listing_id, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source, source_url) DO NOTHING
            "#,
        )
        .bind(property.source)
        .bind(&property.source_url)
        .bind(&property.title)
        .bind(property.price)
        .bind(&property.location)
        .bind(&property.city)
        .bind(property.bedrooms)
        .bind(property.bathrooms)
        .bind(&image_urls)
        .bind(&property.listed_at)
        .bind(property.external_listing_id)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let marked = sqlx::query(
            "UPDATE external_listings SET imported = 1, imported_at = ?, import_error = NULL WHERE id = ? AND imported = 0",
        )
        .bind(now)
        .bind(property.external_listing_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if marked == 0 {
            tx.rollback().await?;
            return Ok(Promotion::AlreadyImported);
        }
        tx.commit().await?;

        if inserted == 0 {
            Ok(Promotion::AlreadyPresent)
        } else {
            Ok(Promotion::Imported)
        }
    }
}

/// Map a staged row to its canonical shape using the rules for its source.
pub fn map_listing(row: &ExternalListing) -> std::result::Result<NewProperty, MappingError> {
    match row.source {
        SourceId::BuyRentKenya => map_buyrentkenya(row),
        SourceId::Property24 => map_property24(row),
        SourceId::Jiji => map_jiji(row),
    }
}

fn map_buyrentkenya(row: &ExternalListing) -> std::result::Result<NewProperty, MappingError> {
    let price = resolve_price(row)?;
    let location = row
        .location_text
        .as_deref()
        .and_then(parse::clean_text)
        .ok_or(MappingError::MissingLocation)?;
    let city = parse::split_location(&location).1;
    base_property(row, price, location, city)
}

/// Property24 writes `Suburb, City` and prefixes dates with `Listed`.
fn map_property24(row: &ExternalListing) -> std::result::Result<NewProperty, MappingError> {
    let price = resolve_price(row)?;
    let (location, city) = row
        .location_text
        .as_deref()
        .map(parse::split_location)
        .unwrap_or((None, None));
    let location = location.ok_or(MappingError::MissingLocation)?;
    let mut property = base_property(row, price, location, city)?;
    property.listed_at = row
        .posted_at
        .as_deref()
        .map(|posted| posted.trim().trim_start_matches("Listed").trim().to_string())
        .filter(|posted| !posted.is_empty());
    Ok(property)
}

/// Jiji ships a structured region more often than not, and keeps the numeric
/// price in the raw payload when the displayed one is abbreviated.
fn map_jiji(row: &ExternalListing) -> std::result::Result<NewProperty, MappingError> {
    let price = resolve_price(row).or_else(|e| {
        row.raw_json
            .as_ref()
            .and_then(|raw| raw.pointer("/price_obj/value"))
            .and_then(serde_json::Value::as_f64)
            .filter(|value| *value > 0.0)
            .ok_or(e)
    })?;

    let (location, city) = match &row.location {
        Some(field @ LocationField::Structured { .. }) => (field.text(), field.city()),
        _ => row
            .location_text
            .as_deref()
            .map(parse::split_location)
            .unwrap_or((None, None)),
    };
    let location = location.ok_or(MappingError::MissingLocation)?;
    base_property(row, price, location, city)
}

fn resolve_price(row: &ExternalListing) -> std::result::Result<f64, MappingError> {
    row.price_amount
        .filter(|amount| amount.is_finite() && *amount > 0.0)
        .or_else(|| row.price_text.as_deref().and_then(parse_price))
        .ok_or(MappingError::MissingPrice)
}

fn base_property(
    row: &ExternalListing,
    price: f64,
    location: String,
    city: Option<String>,
) -> std::result::Result<NewProperty, MappingError> {
    Url::parse(&row.source_url).map_err(|_| MappingError::InvalidUrl(row.source_url.clone()))?;

    let title = row
        .title
        .as_deref()
        .and_then(parse::clean_text)
        .unwrap_or_else(|| fallback_title(row.bedrooms, &location));

    Ok(NewProperty {
        source: row.source,
        source_url: row.source_url.clone(),
        title,
        price,
        location,
        city,
        bedrooms: row.bedrooms,
        bathrooms: row.bathrooms,
        image_urls: row.image_urls.clone(),
        listed_at: row.posted_at.clone(),
        external_listing_id: row.id,
    })
}

fn fallback_title(bedrooms: Option<i64>, location: &str) -> String {
    match bedrooms {
        Some(beds) => format!("{beds} bedroom property in {location}"),
        None => format!("Property in {location}"),
    }
}
