use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;

use super::model::{utc_now, ProcessedVideo, ProcessingStatus, Video};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("video {0} no longer exists")]
    VideoGone(String),
}

#[async_trait]
pub trait VideoRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Video>, PersistenceError>;

    async fn find_stretched_candidates(&self, limit: Option<i64>) -> Result<Vec<Video>, PersistenceError>;

    async fn find_incomplete_candidates(&self, limit: Option<i64>) -> Result<Vec<Video>, PersistenceError>;

    /// Status only; output URLs are never touched.
    async fn mark_status(&self, id: &str, status: ProcessingStatus) -> Result<(), PersistenceError>;

    /// Write every output URL, the probed geometry, `COMPLETED` and the
    /// processed timestamp in one statement.
    async fn complete(&self, id: &str, processed: &ProcessedVideo) -> Result<(), PersistenceError>;
}

const VIDEO_COLUMNS: &str = r#"
    id,
    "courseId",
    "chapterId",
    "storageKey",
    width,
    height,
    duration,
    "processingStatus"::text AS "processingStatus",
    "hlsMasterUrl",
    "hls480pUrl",
    "hls720pUrl",
    "hls1080pUrl",
    "processedAt"
"#;

#[derive(Clone)]
pub struct PgVideoRepository {
    pool: PgPool,
}

impl PgVideoRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VideoRepository for PgVideoRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Video>, PersistenceError> {
        let sql = format!(r#"SELECT {} FROM "Video" WHERE id = $1"#, VIDEO_COLUMNS);

        let video = sqlx::query_as::<_, Video>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(video)
    }

    async fn find_stretched_candidates(&self, limit: Option<i64>) -> Result<Vec<Video>, PersistenceError> {
        let sql = format!(
            r#"
            SELECT {}
            FROM "Video"
            WHERE "storageKey" IS NOT NULL
              AND ("hls480pUrl" IS NOT NULL OR "hls720pUrl" IS NOT NULL OR "hls1080pUrl" IS NOT NULL)
              AND height > width
            ORDER BY "createdAt" ASC
            LIMIT $1
            "#,
            VIDEO_COLUMNS
        );

        let videos = sqlx::query_as::<_, Video>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(videos)
    }

    async fn find_incomplete_candidates(&self, limit: Option<i64>) -> Result<Vec<Video>, PersistenceError> {
        let sql = format!(
            r#"
            SELECT {}
            FROM "Video"
            WHERE "storageKey" IS NOT NULL
              AND (
                "processingStatus" = 'FAILED'
                OR ("hlsMasterUrl" IS NULL AND "processingStatus" <> 'PROCESSING')
              )
            ORDER BY "createdAt" ASC
            LIMIT $1
            "#,
            VIDEO_COLUMNS
        );

        let videos = sqlx::query_as::<_, Video>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(videos)
    }

    async fn mark_status(&self, id: &str, status: ProcessingStatus) -> Result<(), PersistenceError> {
        let result = sqlx::query(
            r#"
            UPDATE "Video"
            SET "processingStatus" = $1::"ProcessingStatus", "updatedAt" = $2
            WHERE id = $3
            "#,
        )
        .bind(status.as_str())
        .bind(utc_now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::VideoGone(id.to_string()));
        }
        Ok(())
    }

    async fn complete(&self, id: &str, processed: &ProcessedVideo) -> Result<(), PersistenceError> {
        let now = utc_now();

        let result = sqlx::query(
            r#"
            UPDATE "Video"
            SET
                "hlsMasterUrl" = $1,
                "hls480pUrl" = $2,
                "hls720pUrl" = $3,
                "hls1080pUrl" = $4,
                width = $5,
                height = $6,
                duration = $7,
                "processingStatus" = 'COMPLETED'::"ProcessingStatus",
                "processedAt" = $8,
                "updatedAt" = $8
            WHERE id = $9
            "#,
        )
        .bind(&processed.master_url)
        .bind(&processed.url_480p)
        .bind(&processed.url_720p)
        .bind(&processed.url_1080p)
        .bind(processed.width as i32)
        .bind(processed.height as i32)
        .bind(processed.duration_seconds)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::VideoGone(id.to_string()));
        }
        Ok(())
    }
}
