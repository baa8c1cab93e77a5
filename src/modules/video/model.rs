use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{OffsetDateTime, PrimitiveDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "PENDING",
            ProcessingStatus::Processing => "PROCESSING",
            ProcessingStatus::Completed => "COMPLETED",
            ProcessingStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ProcessingStatus::Pending),
            "PROCESSING" => Ok(ProcessingStatus::Processing),
            "COMPLETED" => Ok(ProcessingStatus::Completed),
            "FAILED" => Ok(ProcessingStatus::Failed),
            other => Err(format!("unknown processing status {}", other)),
        }
    }
}

/// A row of the `"Video"` table. Column names follow the ORM's camelCase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Video {
    pub id: String,
    #[sqlx(rename = "courseId")]
    pub course_id: String,
    /// `None` for a course's demo video.
    #[sqlx(rename = "chapterId")]
    pub chapter_id: Option<String>,
    #[sqlx(rename = "storageKey")]
    pub storage_key: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub duration: Option<f64>,
    #[sqlx(rename = "processingStatus")]
    pub processing_status: String,
    #[sqlx(rename = "hlsMasterUrl")]
    pub hls_master_url: Option<String>,
    #[sqlx(rename = "hls480pUrl")]
    pub hls_480p_url: Option<String>,
    #[sqlx(rename = "hls720pUrl")]
    pub hls_720p_url: Option<String>,
    #[sqlx(rename = "hls1080pUrl")]
    pub hls_1080p_url: Option<String>,
    #[sqlx(rename = "processedAt")]
    pub processed_at: Option<PrimitiveDateTime>,
}

impl Video {
    pub fn status(&self) -> Option<ProcessingStatus> {
        self.processing_status.parse().ok()
    }

    pub fn has_rendition_url(&self) -> bool {
        self.hls_480p_url.is_some() || self.hls_720p_url.is_some() || self.hls_1080p_url.is_some()
    }

    /// Already processed, yet the stored geometry says portrait. Output from
    /// that era was scaled with the axes swapped and plays stretched.
    pub fn is_stretched_candidate(&self) -> bool {
        self.storage_key.is_some()
            && self.has_rendition_url()
            && matches!((self.width, self.height), (Some(w), Some(h)) if h > w)
    }

    /// Has a source but never reached a servable state. Videos currently
    /// `PROCESSING` are left to whoever is processing them.
    pub fn is_incomplete_candidate(&self) -> bool {
        if self.storage_key.is_none() {
            return false;
        }
        match self.status() {
            Some(ProcessingStatus::Failed) => true,
            Some(ProcessingStatus::Processing) => false,
            _ => self.hls_master_url.is_none(),
        }
    }
}

/// Everything written to a video row when its pipeline succeeds.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessedVideo {
    pub master_url: String,
    pub url_480p: Option<String>,
    pub url_720p: Option<String>,
    pub url_1080p: Option<String>,
    pub width: u32,
    pub height: u32,
    pub duration_seconds: f64,
}

impl ProcessedVideo {
    /// Record the playlist URL of a ladder rung. Returns `false` for a rung
    /// with no column of its own.
    pub fn set_rendition_url(&mut self, rendition: &str, url: String) -> bool {
        let slot = match rendition {
            "480p" => &mut self.url_480p,
            "720p" => &mut self.url_720p,
            "1080p" => &mut self.url_1080p,
            _ => return false,
        };
        *slot = Some(url);
        true
    }
}

/// Database timestamps are stored as UTC without zone.
pub fn utc_now() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}
