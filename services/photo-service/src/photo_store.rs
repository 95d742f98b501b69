use crate::config::DatabaseConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Longest client-supplied URL accepted for storage
pub const MAX_URL_LEN: usize = 2048;

/// A stored original/generated photo pair
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoRecord {
    pub id: i32,
    pub original_url: String,
    pub dalle_url: String,
    /// Creation time in the store's fixed timezone
    pub created_at: DateTime<FixedOffset>,
}

/// Raw `photos` row
#[derive(Debug, FromRow)]
struct PhotoRow {
    id: i32,
    original_url: String,
    dalle_url: String,
    created_at: DateTime<Utc>,
}

impl PhotoRow {
    fn into_record(self, offset: FixedOffset) -> PhotoRecord {
        PhotoRecord {
            id: self.id,
            original_url: self.original_url,
            dalle_url: self.dalle_url,
            created_at: self.created_at.with_timezone(&offset),
        }
    }
}

/// Record store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Photo {0} not found")]
    NotFound(i32),

    #[error("database error: {0}")]
    Persistence(#[from] sqlx::Error),
}

/// Persistence seam for photo pairs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PhotoRepository: Send + Sync {
    /// Insert a new pair, returning the stored record
    async fn create(
        &self,
        original_url: &str,
        dalle_url: &str,
    ) -> Result<PhotoRecord, StoreError>;

    /// All original URLs
    async fn list_original(&self) -> Result<Vec<String>, StoreError>;

    /// All generated URLs
    async fn list_dalle(&self) -> Result<Vec<String>, StoreError>;

    /// Fetch a single record
    async fn get(&self, id: i32) -> Result<PhotoRecord, StoreError>;

    /// Cheap connectivity check used by the readiness endpoint
    async fn ping(&self) -> Result<(), StoreError>;
}

/// PostgreSQL-backed photo store
pub struct PhotoStore {
    pool: PgPool,
    offset: FixedOffset,
}

impl PhotoStore {
    /// Create a new photo store with connection pool
    pub async fn new(config: &DatabaseConfig, offset: FixedOffset) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self::from_pool(pool, offset))
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool, offset: FixedOffset) -> Self {
        Self { pool, offset }
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Insert the sample pair unless a row with that id already exists.
    /// Returns whether a row was written.
    pub async fn seed_sample(&self) -> Result<bool> {
        let created_at = self
            .offset
            .with_ymd_and_hms(2021, 1, 1, 0, 0, 0)
            .single()
            .context("Invalid sample timestamp")?;

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let result = sqlx::query(
            r#"
            INSERT INTO photos (id, original_url, dalle_url, created_at)
            VALUES (1, $1, $2, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind("https://example.com/original.jpg")
        .bind("https://example.com/dalle.jpg")
        .bind(created_at.with_timezone(&Utc))
        .execute(&mut *tx)
        .await
        .context("Failed to insert sample photo")?;

        // Keep the serial ahead of the explicit id
        sqlx::query(
            r#"
            SELECT setval(
                pg_get_serial_sequence('photos', 'id'),
                GREATEST((SELECT MAX(id) FROM photos), 1)
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .context("Failed to advance photo id sequence")?;

        tx.commit().await.context("Failed to commit transaction")?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl PhotoRepository for PhotoStore {
    #[instrument(skip(self))]
    async fn create(
        &self,
        original_url: &str,
        dalle_url: &str,
    ) -> Result<PhotoRecord, StoreError> {
        let created_at = Utc::now();

        // Dropping the transaction on any early return rolls it back and
        // hands the connection back to the pool.
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, PhotoRow>(
            r#"
            INSERT INTO photos (original_url, dalle_url, created_at)
            VALUES ($1, $2, $3)
            RETURNING id, original_url, dalle_url, created_at
            "#,
        )
        .bind(original_url)
        .bind(dalle_url)
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(photo_id = row.id, "Photo pair stored");
        metrics::counter!("photos.created").increment(1);

        Ok(row.into_record(self.offset))
    }

    async fn list_original(&self) -> Result<Vec<String>, StoreError> {
        let urls = sqlx::query_scalar::<_, String>("SELECT original_url FROM photos ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        Ok(urls)
    }

    async fn list_dalle(&self) -> Result<Vec<String>, StoreError> {
        let urls = sqlx::query_scalar::<_, String>("SELECT dalle_url FROM photos ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        Ok(urls)
    }

    #[instrument(skip(self))]
    async fn get(&self, id: i32) -> Result<PhotoRecord, StoreError> {
        let row = sqlx::query_as::<_, PhotoRow>(
            r#"
            SELECT id, original_url, dalle_url, created_at
            FROM photos
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_record(self.offset))
            .ok_or(StoreError::NotFound(id))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
