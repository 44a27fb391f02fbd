//! SQLite-backed ad catalog.
//!
//! Every mutation is a single SQL statement, so a write to one id is atomic
//! against any other writer touching the same id (poller, enrichment pass,
//! liveness sweep) without in-process locking.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use adwatch_core::{
    format_iso_date, parse_iso_date, CatalogEntry, EnrichmentPatch, Epoch, ListingCandidate,
};
use chrono::NaiveDate;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{QueryBuilder, Row, Sqlite};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_DATABASE_FILE: &str = "ads.db";

const ENTRY_COLUMNS: &str = "id, title, price, location, date_posted, link, image, body_text, \
                             first_seen, last_seen, is_active";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("no catalog entry with id {id}")]
    NotFound { id: String },
    #[error("catalog entry {id} has an unreadable {column} value")]
    Corrupt { id: String, column: &'static str },
    #[error("catalog storage failure: {0}")]
    Database(#[from] sqlx::Error),
    #[error("preparing catalog location: {0}")]
    Io(#[from] std::io::Error),
}

/// Filters for the export query. Every bound is optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActiveFilter {
    pub min_price: Option<u32>,
    pub max_price: Option<u32>,
    pub max_age_days: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    /// Opens (creating if needed) the catalog file and ensures the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let catalog = Self { pool };
        catalog.migrate().await?;
        Ok(catalog)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn migrate(&self) -> Result<(), CatalogError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ads (
                id TEXT PRIMARY KEY,
                title TEXT,
                price INTEGER,
                location TEXT,
                date_posted TEXT,
                link TEXT,
                image TEXT,
                body_text TEXT,
                first_seen TEXT,
                last_seen TEXT,
                is_active INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_ads_last_seen ON ads(last_seen)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_ads_active_date ON ads(is_active, date_posted DESC)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS enrichment_attempts (
                id TEXT PRIMARY KEY,
                attempted_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Create-or-refresh one listing observed during the cycle stamped `epoch`.
    ///
    /// New ids get `first_seen = last_seen = epoch`. Known ids get their feed
    /// fields overwritten, `last_seen = epoch` and are reactivated; `first_seen`
    /// and `body_text` are left alone. Repeating the call is a no-op.
    pub async fn upsert(
        &self,
        candidate: &ListingCandidate,
        epoch: Epoch,
    ) -> Result<(), CatalogError> {
        let stamp = epoch.to_db_string();
        sqlx::query(
            r#"
            INSERT INTO ads (id, title, price, location, date_posted, link, image, body_text,
                             first_seen, last_seen, is_active)
            VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, 1)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                price = excluded.price,
                location = excluded.location,
                date_posted = excluded.date_posted,
                link = excluded.link,
                image = excluded.image,
                last_seen = excluded.last_seen,
                is_active = 1
            "#,
        )
        .bind(&candidate.id)
        .bind(&candidate.title)
        .bind(candidate.price)
        .bind(&candidate.location)
        .bind(candidate.date_posted.map(format_iso_date))
        .bind(&candidate.link)
        .bind(&candidate.image)
        .bind(&stamp)
        .bind(&stamp)
        .execute(&self.pool)
        .await?;

        debug!(id = %candidate.id, epoch = %stamp, "catalog entry upserted");
        Ok(())
    }

    /// Fill-or-replace merge of detail fields into an existing entry.
    ///
    /// Present fields overwrite unconditionally, absent fields keep what is
    /// stored. Title, link, timestamps and the active flag are never touched.
    pub async fn apply_enrichment(
        &self,
        id: &str,
        patch: &EnrichmentPatch,
    ) -> Result<(), CatalogError> {
        let result = sqlx::query(
            r#"
            UPDATE ads
            SET price = COALESCE(?, price),
                location = COALESCE(?, location),
                date_posted = COALESCE(?, date_posted),
                image = COALESCE(?, image),
                body_text = COALESCE(?, body_text)
            WHERE id = ?
            "#,
        )
        .bind(patch.price)
        .bind(&patch.location)
        .bind(patch.date_posted.map(format_iso_date))
        .bind(&patch.image)
        .bind(&patch.body_text)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CatalogError::NotFound { id: id.to_string() });
        }
        debug!(id, "catalog entry enriched");
        Ok(())
    }

    /// Deactivates every entry not refreshed at `epoch`. Returns how many
    /// entries flipped from active to inactive.
    pub async fn sweep_inactive(&self, epoch: Epoch) -> Result<u64, CatalogError> {
        let result = sqlx::query("UPDATE ads SET is_active = 0 WHERE last_seen < ? AND is_active = 1")
            .bind(epoch.to_db_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn get(&self, id: &str) -> Result<Option<CatalogEntry>, CatalogError> {
        let row = sqlx::query(&format!("SELECT {ENTRY_COLUMNS} FROM ads WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    pub async fn all_entries(&self) -> Result<Vec<CatalogEntry>, CatalogError> {
        let rows = sqlx::query(&format!("SELECT {ENTRY_COLUMNS} FROM ads ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(entry_from_row).collect()
    }

    pub async fn count_active(&self) -> Result<i64, CatalogError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ads WHERE is_active = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Newest `last_seen` in the catalog, used to resume the epoch clock.
    pub async fn max_last_seen(&self) -> Result<Option<Epoch>, CatalogError> {
        let raw: Option<String> = sqlx::query_scalar("SELECT MAX(last_seen) FROM ads")
            .fetch_one(&self.pool)
            .await?;
        match raw {
            None => Ok(None),
            Some(text) => Epoch::parse(&text).map(Some).ok_or(CatalogError::Corrupt {
                id: "<max>".to_string(),
                column: "last_seen",
            }),
        }
    }

    /// Active entries without a description. Never-attempted entries come
    /// first (most recently seen first), then the least recently attempted.
    pub async fn enrichment_candidates(
        &self,
        limit: u32,
    ) -> Result<Vec<CatalogEntry>, CatalogError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ads \
             WHERE is_active = 1 AND body_text IS NULL \
             ORDER BY (SELECT a.attempted_at FROM enrichment_attempts a WHERE a.id = ads.id) \
                 IS NOT NULL, \
             (SELECT a.attempted_at FROM enrichment_attempts a WHERE a.id = ads.id), \
             last_seen DESC, id LIMIT ?"
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    /// Stamps `ids` as attempted at `at`, pushing them behind untried entries
    /// in `enrichment_candidates`.
    pub async fn mark_enrichment_attempted(
        &self,
        ids: &[String],
        at: Epoch,
    ) -> Result<(), CatalogError> {
        let stamp = at.to_db_string();
        for id in ids {
            sqlx::query(
                "INSERT INTO enrichment_attempts (id, attempted_at) VALUES (?, ?) \
                 ON CONFLICT(id) DO UPDATE SET attempted_at = excluded.attempted_at",
            )
            .bind(id)
            .bind(&stamp)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Active entries matching `filter`, newest posting date first.
    ///
    /// `max_age_days` is measured against `date_posted` relative to `today`;
    /// entries without a posting date are excluded when it is set.
    pub async fn query_active(
        &self,
        filter: &ActiveFilter,
        today: NaiveDate,
    ) -> Result<Vec<CatalogEntry>, CatalogError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {ENTRY_COLUMNS} FROM ads WHERE is_active = 1"
        ));
        if let Some(min) = filter.min_price {
            qb.push(" AND price >= ").push_bind(min);
        }
        if let Some(max) = filter.max_price {
            qb.push(" AND price <= ").push_bind(max);
        }
        if let Some(days) = filter.max_age_days {
            let cutoff = today
                .checked_sub_signed(chrono::Duration::days(i64::from(days)))
                .unwrap_or(NaiveDate::MIN);
            qb.push(" AND date_posted IS NOT NULL AND date_posted >= ")
                .push_bind(format_iso_date(cutoff));
        }
        qb.push(" ORDER BY date_posted DESC, id");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(entry_from_row).collect()
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<CatalogEntry, CatalogError> {
    let id: String = row.try_get("id")?;
    let corrupt = |column: &'static str| CatalogError::Corrupt {
        id: id.clone(),
        column,
    };

    let price = match row.try_get::<Option<i64>, _>("price")? {
        Some(raw) => Some(u32::try_from(raw).map_err(|_| corrupt("price"))?),
        None => None,
    };
    let date_posted = match row.try_get::<Option<String>, _>("date_posted")? {
        Some(raw) => Some(parse_iso_date(&raw).ok_or_else(|| corrupt("date_posted"))?),
        None => None,
    };
    let first_seen: String = row.try_get("first_seen")?;
    let last_seen: String = row.try_get("last_seen")?;
    let first_seen = Epoch::parse(&first_seen).ok_or_else(|| corrupt("first_seen"))?;
    let last_seen = Epoch::parse(&last_seen).ok_or_else(|| corrupt("last_seen"))?;

    Ok(CatalogEntry {
        title: row.try_get::<Option<String>, _>("title")?.unwrap_or_default(),
        price,
        location: row.try_get("location")?,
        date_posted,
        link: row.try_get::<Option<String>, _>("link")?.unwrap_or_default(),
        image: row.try_get("image")?,
        body_text: row.try_get("body_text")?,
        first_seen,
        last_seen,
        is_active: row.try_get::<i64, _>("is_active")? != 0,
        id,
    })
}
