//! Bulk reprocessing over a selected set of videos, one at a time.

use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::orchestrator::VideoPipeline;
use crate::modules::video::{PersistenceError, Video};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSelector {
    /// Processed output whose stored geometry is portrait.
    Stretched,
    /// Has a source but no servable output, or last run failed.
    Incomplete,
}

impl fmt::Display for CandidateSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateSelector::Stretched => f.write_str("stretched"),
            CandidateSelector::Incomplete => f.write_str("incomplete"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub selector: CandidateSelector,
    pub limit: Option<i64>,
    pub dry_run: bool,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub candidates: Vec<String>,
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
    /// Candidates never attempted because the run was cancelled.
    pub skipped: usize,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.skipped == 0
    }
}

pub struct BatchDriver {
    pipeline: VideoPipeline,
}

impl BatchDriver {
    pub fn new(pipeline: VideoPipeline) -> Self {
        Self { pipeline }
    }

    /// Process every selected candidate in sequence. A failing video is
    /// recorded and the run moves on; only selection itself can fail the run.
    pub async fn run(
        &self,
        options: &BatchOptions,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, PersistenceError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("batch", run_id = %run_id, selector = %options.selector);
        self.run_inner(options, cancel).instrument(span).await
    }

    async fn run_inner(
        &self,
        options: &BatchOptions,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, PersistenceError> {
        let candidates = self.select(options).await?;
        let mut report = BatchReport {
            candidates: candidates.iter().map(|v| v.id.clone()).collect(),
            ..Default::default()
        };

        info!(count = candidates.len(), dry_run = options.dry_run, "Selected videos for reprocessing");

        if options.dry_run {
            for video in &candidates {
                info!(
                    video_id = %video.id,
                    width = ?video.width,
                    height = ?video.height,
                    status = %video.processing_status,
                    "Would reprocess"
                );
            }
            return Ok(report);
        }

        let total = candidates.len();
        for (index, video) in candidates.iter().enumerate() {
            if cancel.is_cancelled() {
                report.skipped = total - index;
                warn!(skipped = report.skipped, "Batch cancelled");
                break;
            }

            info!(video_id = %video.id, "[{}/{}] Reprocessing", index + 1, total);
            match self.pipeline.run(&video.id, cancel).await {
                Ok(_) => report.succeeded.push(video.id.clone()),
                Err(failure) => {
                    error!(video_id = %video.id, "Reprocessing failed: {}", failure);
                    report.failed.push((video.id.clone(), failure.to_string()));
                }
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            skipped = report.skipped,
            "Batch finished"
        );
        Ok(report)
    }

    async fn select(&self, options: &BatchOptions) -> Result<Vec<Video>, PersistenceError> {
        let repo = self.pipeline.repository();
        match options.selector {
            CandidateSelector::Stretched => repo.find_stretched_candidates(options.limit).await,
            CandidateSelector::Incomplete => repo.find_incomplete_candidates(options.limit).await,
        }
    }
}
