use sqlx::sqlite::SqlitePool;
use std::fmt;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct Migration {
    version: i32,
    up: &'static str,
    down: &'static str,
}

impl Migration {
    pub const fn new(version: i32, up: &'static str, down: &'static str) -> Self {
        Self { version, up, down }
    }
}

impl fmt::Display for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Migration {}", self.version)
    }
}

pub const MIGRATIONS: &[Migration] = &[
    Migration::new(
        1,
        r#"
        CREATE TABLE IF NOT EXISTS external_listings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            source_url TEXT NOT NULL,
            title TEXT,
            price_text TEXT,
            price_amount REAL,
            location_text TEXT,
            location_json TEXT,
            bedrooms INTEGER,
            bathrooms INTEGER,
            image_urls TEXT NOT NULL DEFAULT '[]',
            posted_at TEXT,
            raw_json TEXT,
            imported INTEGER NOT NULL DEFAULT 0,
            import_error TEXT,
            last_seen_run INTEGER,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            imported_at DATETIME,
            UNIQUE(source, source_url)
        )
        "#,
        "DROP TABLE IF EXISTS external_listings",
    ),
    Migration::new(
        2,
        r#"
        CREATE TABLE IF NOT EXISTS properties (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            source_url TEXT NOT NULL,
            title TEXT NOT NULL,
            price REAL NOT NULL,
            location TEXT NOT NULL,
            city TEXT,
            bedrooms INTEGER,
            bathrooms INTEGER,
            image_urls TEXT NOT NULL DEFAULT '[]',
            listed_at TEXT,
            external_listing_id INTEGER NOT NULL REFERENCES external_listings(id),
            created_at DATETIME NOT NULL,
            UNIQUE(source, source_url)
        )
        "#,
        "DROP TABLE IF EXISTS properties",
    ),
    Migration::new(
        3,
        "CREATE INDEX IF NOT EXISTS idx_external_listings_pending ON external_listings(imported, created_at, id)",
        "DROP INDEX IF EXISTS idx_external_listings_pending",
    ),
];

async fn ensure_migrations_table(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            applied_at DATETIME NOT NULL
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn apply_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    ensure_migrations_table(pool).await?;

    let applied_versions: Vec<i32> =
        sqlx::query_scalar("SELECT version FROM migrations ORDER BY version")
            .fetch_all(pool)
            .await?;

    for migration in MIGRATIONS {
        if applied_versions.contains(&migration.version) {
            continue;
        }
        debug!("Applying {}", migration);

        let mut tx = pool.begin().await?;
        sqlx::query(migration.up).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO migrations (version, applied_at) VALUES (?, ?)")
            .bind(migration.version)
            .bind(chrono::Utc::now())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    Ok(())
}

/// Undo every applied migration newer than `target`, newest first.
pub async fn rollback_to(pool: &SqlitePool, target: i32) -> Result<(), sqlx::Error> {
    ensure_migrations_table(pool).await?;

    let applied_versions: Vec<i32> =
        sqlx::query_scalar("SELECT version FROM migrations WHERE version > ? ORDER BY version DESC")
            .bind(target)
            .fetch_all(pool)
            .await?;

    for version in applied_versions {
        let migration = MIGRATIONS
            .iter()
            .find(|m| m.version == version)
            .ok_or_else(|| sqlx::Error::Protocol(format!("unknown migration version {version}")))?;
        debug!("Rolling back {}", migration);

        let mut tx = pool.begin().await?;
        sqlx::query(migration.down).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM migrations WHERE version = ?")
            .bind(version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    Ok(())
}

pub async fn get_applied_migrations(pool: &SqlitePool) -> Result<Vec<i32>, sqlx::Error> {
    ensure_migrations_table(pool).await?;
    sqlx::query_scalar("SELECT version FROM migrations ORDER BY version")
        .fetch_all(pool)
        .await
}
