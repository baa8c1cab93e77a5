//! The per-video state machine and the batch driver built on it.

pub mod batch;
pub mod error;
pub mod keys;
pub mod orchestrator;
pub mod scratch;

#[cfg(test)]
pub mod testing;

pub use batch::{BatchDriver, BatchOptions, BatchReport, CandidateSelector};
pub use error::{PipelineError, PipelineFailure, PipelineStage};
pub use orchestrator::{PipelineOutcome, PipelineSettings, VideoPipeline};
