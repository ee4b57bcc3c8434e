use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row};
use std::str::FromStr;

pub mod db;
mod display;
mod error;
pub mod import;
pub mod parse;

pub use db::{Database, ListingFilter, ListingPage, ListingStats, SourceStats, UpsertOutcome};
pub use display::create_listing_table;
pub use error::{IngestError, Result};
pub use import::{ImportError, ImportReport, Importer, MappingError, NewProperty};

/// Identifier of a crawl run, unique within one process lifetime.
pub type RunId = u64;

/// The external listing sites the pipeline knows how to crawl.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    BuyRentKenya,
    Property24,
    Jiji,
}

impl SourceId {
    pub const ALL: [SourceId; 3] = [SourceId::BuyRentKenya, SourceId::Property24, SourceId::Jiji];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::BuyRentKenya => "buyrentkenya",
            SourceId::Property24 => "property24",
            SourceId::Jiji => "jiji",
        }
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = IngestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buyrentkenya" | "buy-rent-kenya" | "brk" => Ok(SourceId::BuyRentKenya),
            "property24" | "p24" => Ok(SourceId::Property24),
            "jiji" => Ok(SourceId::Jiji),
            _ => Err(IngestError::InvalidSource(s.to_string())),
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for SourceId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for SourceId {
    fn decode(
        value: sqlx::sqlite::SqliteValueRef<'r>,
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let text = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(text.parse::<SourceId>()?)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for SourceId {
    fn encode_by_ref(
        &self,
        args: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> sqlx::encode::IsNull {
        args.push(sqlx::sqlite::SqliteArgumentValue::Text(self.as_str().into()));
        sqlx::encode::IsNull::No
    }
}

/// A price as the source site presented it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PriceField {
    Amount(f64),
    Text(String),
}

impl PriceField {
    pub fn amount(&self) -> Option<f64> {
        match self {
            PriceField::Amount(value) if value.is_finite() && *value > 0.0 => Some(*value),
            PriceField::Amount(_) => None,
            PriceField::Text(text) => parse::parse_price(text),
        }
    }

    pub fn text(&self) -> String {
        match self {
            PriceField::Amount(value) => format!("{value}"),
            PriceField::Text(text) => text.clone(),
        }
    }
}

/// A location as the source site presented it: free text or a structured address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocationField {
    Text(String),
    Structured {
        #[serde(default)]
        address: Option<String>,
        #[serde(default)]
        city: Option<String>,
        #[serde(default)]
        state: Option<String>,
    },
}

impl LocationField {
    /// Single-line rendering, `None` when every part is blank.
    pub fn text(&self) -> Option<String> {
        match self {
            LocationField::Text(text) => parse::non_empty(text),
            LocationField::Structured {
                address,
                city,
                state,
            } => {
                let parts: Vec<&str> = [address, city, state]
                    .into_iter()
                    .flatten()
                    .map(|part| part.trim())
                    .filter(|part| !part.is_empty())
                    .collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join(", "))
                }
            }
        }
    }

    pub fn city(&self) -> Option<String> {
        match self {
            LocationField::Text(text) => parse::split_location(text).1,
            LocationField::Structured { city, state, .. } => city
                .as_deref()
                .and_then(parse::non_empty)
                .or_else(|| state.as_deref().and_then(parse::non_empty)),
        }
    }
}

/// One listing as extracted from a results page. Everything except the
/// identity is best effort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawListing {
    pub source: SourceId,
    pub source_url: String,
    pub title: Option<String>,
    pub price: Option<PriceField>,
    pub location: Option<LocationField>,
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<u32>,
    pub image_urls: Vec<String>,
    pub posted_at: Option<String>,
    pub extra: Option<serde_json::Value>,
}

impl RawListing {
    pub fn new(source: SourceId, source_url: impl Into<String>) -> Self {
        Self {
            source,
            source_url: source_url.into(),
            title: None,
            price: None,
            location: None,
            bedrooms: None,
            bathrooms: None,
            image_urls: Vec::new(),
            posted_at: None,
            extra: None,
        }
    }

    pub fn price_amount(&self) -> Option<f64> {
        self.price.as_ref().and_then(PriceField::amount)
    }

    pub fn location_text(&self) -> Option<String> {
        self.location.as_ref().and_then(LocationField::text)
    }

    pub fn city(&self) -> Option<String> {
        self.location.as_ref().and_then(LocationField::city)
    }
}

/// A staged row in `external_listings`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalListing {
    pub id: i64,
    pub source: SourceId,
    pub source_url: String,
    pub title: Option<String>,
    pub price_text: Option<String>,
    pub price_amount: Option<f64>,
    pub location_text: Option<String>,
    pub location: Option<LocationField>,
    pub bedrooms: Option<i64>,
    pub bathrooms: Option<i64>,
    pub image_urls: Vec<String>,
    pub posted_at: Option<String>,
    pub raw_json: Option<serde_json::Value>,
    pub imported: bool,
    pub import_error: Option<String>,
    pub last_seen_run: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub imported_at: Option<DateTime<Utc>>,
}

fn decode_json<T: serde::de::DeserializeOwned>(
    column: &str,
    text: Option<String>,
) -> std::result::Result<Option<T>, sqlx::Error> {
    text.map(|text| {
        serde_json::from_str(&text).map_err(|e| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        })
    })
    .transpose()
}

impl<'r> FromRow<'r, sqlx::sqlite::SqliteRow> for ExternalListing {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        let image_urls: Option<Vec<String>> =
            decode_json("image_urls", row.try_get("image_urls")?)?;

        Ok(ExternalListing {
            id: row.try_get("id")?,
            source: row.try_get("source")?,
            source_url: row.try_get("source_url")?,
            title: row.try_get("title")?,
            price_text: row.try_get("price_text")?,
            price_amount: row.try_get("price_amount")?,
            location_text: row.try_get("location_text")?,
            location: decode_json("location_json", row.try_get("location_json")?)?,
            bedrooms: row.try_get("bedrooms")?,
            bathrooms: row.try_get("bathrooms")?,
            image_urls: image_urls.unwrap_or_default(),
            posted_at: row.try_get("posted_at")?,
            raw_json: decode_json("raw_json", row.try_get("raw_json")?)?,
            imported: row.try_get("imported")?,
            import_error: row.try_get("import_error")?,
            last_seen_run: row.try_get("last_seen_run")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            imported_at: row.try_get("imported_at")?,
        })
    }
}

/// A promoted row in the canonical `properties` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub id: i64,
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
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::sqlite::SqliteRow> for Property {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        let image_urls: Option<Vec<String>> =
            decode_json("image_urls", row.try_get("image_urls")?)?;

        Ok(Property {
            id: row.try_get("id")?,
            source: row.try_get("source")?,
            source_url: row.try_get("source_url")?,
            title: row.try_get("title")?,
            price: row.try_get("price")?,
            location: row.try_get("location")?,
            city: row.try_get("city")?,
            bedrooms: row.try_get("bedrooms")?,
            bathrooms: row.try_get("bathrooms")?,
            image_urls: image_urls.unwrap_or_default(),
            listed_at: row.try_get("listed_at")?,
            external_listing_id: row.try_get("external_listing_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
