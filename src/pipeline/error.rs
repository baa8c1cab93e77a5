use std::fmt;

use thiserror::Error;

use crate::infrastructure::storage::StoreError;
use crate::media::{ProbeError, TranscodeError};
use crate::modules::video::PersistenceError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("video {0} not found")]
    VideoNotFound(String),

    #[error("video {0} has no source object")]
    MissingSource(String),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("source height {height}px is below every rung of the ladder")]
    NoRenditions { height: u32 },

    #[error("transcode of {rendition} timed out after {secs}s")]
    TimedOut { rendition: String, secs: u64 },

    #[error("pipeline cancelled")]
    Cancelled,

    #[error("scratch space error: {0}")]
    Scratch(#[source] std::io::Error),
}

/// Where a run was when it stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStage {
    Loading,
    Fetching,
    Probing,
    Purging,
    Transcoding(String),
    Uploading(String),
    Composing,
    Persisting,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::Loading => f.write_str("loading"),
            PipelineStage::Fetching => f.write_str("fetching"),
            PipelineStage::Probing => f.write_str("probing"),
            PipelineStage::Purging => f.write_str("purging"),
            PipelineStage::Transcoding(r) => write!(f, "transcoding {}", r),
            PipelineStage::Uploading(r) => write!(f, "uploading {}", r),
            PipelineStage::Composing => f.write_str("composing"),
            PipelineStage::Persisting => f.write_str("persisting"),
        }
    }
}

#[derive(Debug, Error)]
#[error("video {video_id} failed while {stage}: {error}")]
pub struct PipelineFailure {
    pub video_id: String,
    pub stage: PipelineStage,
    #[source]
    pub error: PipelineError,
}
