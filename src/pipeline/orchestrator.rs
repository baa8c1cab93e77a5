//! One video, start to finish: fetch, probe, purge, transcode and upload each
//! rendition, compose the master playlist, persist.
//!
//! Stages run strictly in sequence. Any error aborts the whole video, marks
//! it `FAILED` and leaves its stored URLs as they were. The scratch directory
//! is released on every path out, including cancellation.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::error::{PipelineError, PipelineFailure, PipelineStage};
use super::keys::{VideoKeyspace, MASTER_DIR};
use super::scratch::ScratchDir;
use crate::config::settings::AppConfig;
use crate::infrastructure::storage::{content_type_for, purge_prefix, ObjectStore, PLAYLIST_CONTENT_TYPE};
use crate::media::playlist::{compose_master, MASTER_PLAYLIST_NAME};
use crate::media::{
    plan_renditions, MediaProbe, PlannedRendition, Rendition, RenditionOutput, TranscodeError,
    TranscodeEvent, TranscodeRequest, Transcoder, LADDER,
};
use crate::modules::video::{ProcessedVideo, ProcessingStatus, Video, VideoRepository};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub scratch_root: PathBuf,
    pub ladder: Vec<Rendition>,
    /// Wall-clock seconds allowed per second of source, per rendition.
    pub transcode_timeout_factor: f64,
    pub transcode_timeout_min: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            scratch_root: config.scratch_dir.clone(),
            ladder: LADDER.to_vec(),
            transcode_timeout_factor: config.transcode_timeout_factor,
            transcode_timeout_min: Duration::from_secs(config.transcode_timeout_min_secs),
        }
    }

    pub fn transcode_timeout(&self, duration_seconds: f64) -> Duration {
        let scaled = duration_seconds.max(0.0) * self.transcode_timeout_factor;
        let scaled = if scaled.is_nan() {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(scaled).unwrap_or(Duration::MAX)
        };
        scaled.max(self.transcode_timeout_min)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    pub video_id: String,
    pub master_url: String,
    pub renditions: Vec<&'static str>,
    pub uploaded_keys: Vec<String>,
}

#[derive(Clone)]
pub struct VideoPipeline {
    store: Arc<dyn ObjectStore>,
    repo: Arc<dyn VideoRepository>,
    probe: Arc<dyn MediaProbe>,
    transcoder: Arc<dyn Transcoder>,
    settings: PipelineSettings,
}

impl VideoPipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        repo: Arc<dyn VideoRepository>,
        probe: Arc<dyn MediaProbe>,
        transcoder: Arc<dyn Transcoder>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            repo,
            probe,
            transcoder,
            settings,
        }
    }

    pub fn repository(&self) -> &dyn VideoRepository {
        self.repo.as_ref()
    }

    pub async fn run(
        &self,
        video_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, PipelineFailure> {
        let span = info_span!("video_pipeline", video_id = %video_id);
        self.run_inner(video_id, cancel).instrument(span).await
    }

    async fn run_inner(
        &self,
        video_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, PipelineFailure> {
        let loading_failure = |error: PipelineError| PipelineFailure {
            video_id: video_id.to_string(),
            stage: PipelineStage::Loading,
            error,
        };

        let video = match guard(cancel, self.repo.find_by_id(video_id)).await {
            Ok(Some(video)) => video,
            Ok(None) => return Err(loading_failure(PipelineError::VideoNotFound(video_id.to_string()))),
            Err(e) => return Err(loading_failure(e)),
        };

        info!("🎥 Processing video");

        if let Err(e) = guard(cancel, self.repo.mark_status(video_id, ProcessingStatus::Processing)).await {
            return Err(self.fail(&video, PipelineStage::Loading, e).await);
        }

        let scratch = match ScratchDir::create(&self.settings.scratch_root, video_id) {
            Ok(scratch) => scratch,
            Err(e) => return Err(self.fail(&video, PipelineStage::Loading, PipelineError::Scratch(e)).await),
        };

        let mut stage = PipelineStage::Loading;
        let result = self.execute(&video, &scratch, cancel, &mut stage).await;
        scratch.release();

        match result {
            Ok(outcome) => {
                info!(
                    renditions = ?outcome.renditions,
                    objects = outcome.uploaded_keys.len(),
                    "✅ Video processed"
                );
                Ok(outcome)
            }
            Err(error) => Err(self.fail(&video, stage, error).await),
        }
    }

    async fn execute(
        &self,
        video: &Video,
        scratch: &ScratchDir,
        cancel: &CancellationToken,
        stage: &mut PipelineStage,
    ) -> Result<PipelineOutcome, PipelineError> {
        let keyspace = VideoKeyspace::for_video(video);
        let source_key = video
            .storage_key
            .as_deref()
            .ok_or_else(|| PipelineError::MissingSource(video.id.clone()))?;

        advance(stage, PipelineStage::Fetching);
        let source_path = scratch.join(source_file_name(source_key));
        guard(cancel, self.store.download(source_key, &source_path)).await?;

        advance(stage, PipelineStage::Probing);
        let media = guard(cancel, self.probe.probe(&source_path)).await?;
        let planned = plan_renditions(media.width, media.height, &self.settings.ladder);
        if planned.is_empty() {
            return Err(PipelineError::NoRenditions { height: media.height });
        }
        info!(
            width = media.width,
            height = media.height,
            duration = media.duration_seconds,
            renditions = ?planned.iter().map(|p| p.name()).collect::<Vec<_>>(),
            "Planned renditions"
        );

        advance(stage, PipelineStage::Purging);
        guard(cancel, purge_prefix(self.store.as_ref(), keyspace.prefix())).await?;

        let mut processed = ProcessedVideo {
            width: media.width,
            height: media.height,
            duration_seconds: media.duration_seconds,
            ..Default::default()
        };
        let mut uploaded_keys = Vec::new();

        for rendition in &planned {
            let name = rendition.name();

            advance(stage, PipelineStage::Transcoding(name.to_string()));
            let output = self
                .transcode(&source_path, scratch.join(name), rendition, media.duration_seconds, cancel)
                .await?;

            advance(stage, PipelineStage::Uploading(name.to_string()));
            for file in output.upload_order() {
                let file_name = file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let key = keyspace.rendition_key(name, &file_name);
                let url = guard(cancel, self.store.upload(file, &key, content_type_for(file))).await?;

                if file == output.playlist.as_path() && !processed.set_rendition_url(name, url) {
                    warn!(rendition = name, "Rendition has no URL column; uploaded but not recorded");
                }
                uploaded_keys.push(key);
            }
        }

        advance(stage, PipelineStage::Composing);
        let master_path = scratch.join(MASTER_DIR).join(MASTER_PLAYLIST_NAME);
        write_file(&master_path, compose_master(&planned).as_bytes()).await?;
        let master_key = keyspace.master_key();
        processed.master_url = guard(
            cancel,
            self.store.upload(&master_path, &master_key, PLAYLIST_CONTENT_TYPE),
        )
        .await?;
        uploaded_keys.push(master_key);

        advance(stage, PipelineStage::Persisting);
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        // Once started, the completion write is allowed to land.
        self.repo.complete(&video.id, &processed).await?;

        Ok(PipelineOutcome {
            video_id: video.id.clone(),
            master_url: processed.master_url,
            renditions: planned.iter().map(PlannedRendition::name).collect(),
            uploaded_keys,
        })
    }

    async fn transcode(
        &self,
        input: &Path,
        output_dir: PathBuf,
        rendition: &PlannedRendition,
        duration_seconds: f64,
        cancel: &CancellationToken,
    ) -> Result<RenditionOutput, PipelineError> {
        let name = rendition.name();
        let timeout = self.settings.transcode_timeout(duration_seconds);

        let mut stream = self.transcoder.start(TranscodeRequest {
            input: input.to_path_buf(),
            output_dir,
            rendition: *rendition,
            duration_seconds,
        });

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut last_reported = 0.0_f64;

        let stop = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break PipelineError::Cancelled,
                _ = &mut deadline => {
                    break PipelineError::TimedOut {
                        rendition: name.to_string(),
                        secs: timeout.as_secs(),
                    };
                }
                event = stream.next() => match event {
                    Some(TranscodeEvent::Progress(pct)) => {
                        if pct >= last_reported + 10.0 {
                            last_reported = pct;
                            debug!(rendition = name, "Transcoding {:.0}%", pct);
                        }
                    }
                    Some(TranscodeEvent::Finished(result)) => return result.map_err(Into::into),
                    None => {
                        return Err(TranscodeError::new(name, "transcoder stopped without a result").into());
                    }
                },
            }
        };

        // The encoder must be gone before the scratch directory is released.
        stream.close().await;
        Err(stop)
    }

    async fn fail(&self, video: &Video, stage: PipelineStage, error: PipelineError) -> PipelineFailure {
        error!(stage = %stage, "❌ Video processing failed: {}", error);

        // Output is fully uploaded but unreferenced; the prefix was already
        // purged of the previous run, so remove the orphans too.
        if stage == PipelineStage::Persisting && matches!(error, PipelineError::Persistence(_)) {
            let keyspace = VideoKeyspace::for_video(video);
            match purge_prefix(self.store.as_ref(), keyspace.prefix()).await {
                Ok(removed) => warn!(removed, "Removed unreferenced output after persistence failure"),
                Err(e) => error!(prefix = keyspace.prefix(), "Orphaned output left behind: {}", e),
            }
        }

        if let Err(e) = self.repo.mark_status(&video.id, ProcessingStatus::Failed).await {
            warn!("Could not mark video as FAILED: {}", e);
        }

        PipelineFailure {
            video_id: video.id.clone(),
            stage,
            error,
        }
    }
}

fn advance(stage: &mut PipelineStage, next: PipelineStage) {
    info!(stage = %next, "Pipeline stage");
    *stage = next;
}

/// Race a suspension point against cancellation.
async fn guard<T, E>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, PipelineError>
where
    E: Into<PipelineError>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        result = fut => result.map_err(Into::into),
    }
}

fn source_file_name(source_key: &str) -> String {
    match Path::new(source_key).extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() => format!("source.{}", ext),
        _ => "source".to_string(),
    }
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(PipelineError::Scratch)?;
    }
    tokio::fs::write(path, contents).await.map_err(PipelineError::Scratch)
}
