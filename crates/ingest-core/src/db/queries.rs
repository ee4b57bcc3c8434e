use crate::{ExternalListing, Result, SourceId};
use sqlx::{sqlite::SqlitePool, QueryBuilder, Sqlite};

/// Dynamic filter over `external_listings`, shared by the browse query and
/// its matching count.
pub struct ListingQueryBuilder<'a> {
    builder: QueryBuilder<'a, Sqlite>,
}

impl<'a> ListingQueryBuilder<'a> {
    pub fn select() -> Self {
        Self {
            builder: QueryBuilder::new("SELECT * FROM external_listings WHERE 1=1"),
        }
    }

    pub fn count() -> Self {
        Self {
            builder: QueryBuilder::new("SELECT COUNT(*) FROM external_listings WHERE 1=1"),
        }
    }

    pub fn with_source(mut self, source: Option<SourceId>) -> Self {
        if let Some(source) = source {
            self.builder.push(" AND source = ");
            self.builder.push_bind(source);
        }
        self
    }

    pub fn with_imported(mut self, imported: Option<bool>) -> Self {
        if let Some(imported) = imported {
            self.builder.push(" AND imported = ");
            self.builder.push_bind(imported);
        }
        self
    }

    pub fn awaiting_import(mut self) -> Self {
        self.builder.push(" AND imported = 0 AND import_error IS NULL");
        self
    }

    pub fn newest_first(mut self) -> Self {
        self.builder.push(" ORDER BY created_at DESC, id DESC");
        self
    }

    pub fn oldest_first(mut self) -> Self {
        self.builder.push(" ORDER BY created_at ASC, id ASC");
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.builder.push(" LIMIT ");
        self.builder.push_bind(limit);
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.builder.push(" OFFSET ");
        self.builder.push_bind(offset);
        self
    }

    pub async fn fetch_all(mut self, pool: &SqlitePool) -> Result<Vec<ExternalListing>> {
        let rows = self
            .builder
            .build_query_as::<ExternalListing>()
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }

    pub async fn fetch_count(mut self, pool: &SqlitePool) -> Result<i64> {
        let count = self
            .builder
            .build_query_scalar::<i64>()
            .fetch_one(pool)
            .await?;
        Ok(count)
    }
}
