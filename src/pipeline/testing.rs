//! In-memory stand-ins for the store, database, media tools and queue.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::orchestrator::{PipelineSettings, VideoPipeline};
use crate::infrastructure::queue::rabbitmq::JobPublisher;
use crate::infrastructure::storage::{public_url_for, ObjectStore, StoreError};
use crate::media::playlist::RENDITION_PLAYLIST_NAME;
use crate::media::transcode::collect_output;
use crate::media::{
    MediaInfo, MediaProbe, ProbeError, TranscodeError, TranscodeEvent, TranscodeRequest,
    TranscodeStream, Transcoder, LADDER,
};
use crate::modules::video::{
    model::utc_now, PersistenceError, ProcessedVideo, ProcessingStatus, Video, VideoRepository,
};

/// A chapter video in course `c1`, chapter `ch1`, already processed once.
pub fn sample_video(id: &str, width: i32, height: i32) -> Video {
    Video {
        id: id.to_string(),
        course_id: "c1".into(),
        chapter_id: Some("ch1".into()),
        storage_key: Some(format!("uploads/{}.mp4", id)),
        width: Some(width),
        height: Some(height),
        duration: Some(60.0),
        processing_status: ProcessingStatus::Completed.as_str().into(),
        hls_master_url: Some(format!("https://old.test/{}/master.m3u8", id)),
        hls_480p_url: Some(format!("https://old.test/{}/480p.m3u8", id)),
        hls_720p_url: Some(format!("https://old.test/{}/720p.m3u8", id)),
        hls_1080p_url: None,
        processed_at: None,
    }
}

/// Source object contents understood by [`FakeProbe`].
pub fn source_bytes(width: u32, height: u32, duration_seconds: f64) -> Vec<u8> {
    format!("{}x{}x{}", width, height, duration_seconds).into_bytes()
}

pub struct FakeStore {
    base: Url,
    objects: Mutex<BTreeMap<String, (Vec<u8>, String)>>,
    fail_uploads: Mutex<Option<String>>,
    fail_deletes: AtomicBool,
}

impl FakeStore {
    pub fn new() -> Self {
        Self {
            base: Url::parse("https://cdn.test").unwrap(),
            objects: Mutex::new(BTreeMap::new()),
            fail_uploads: Mutex::new(None),
            fail_deletes: AtomicBool::new(false),
        }
    }

    pub fn put(&self, key: &str, bytes: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (bytes.to_vec(), "application/octet-stream".into()));
    }

    pub fn remove(&self, key: &str) {
        self.objects.lock().unwrap().remove(key);
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).map(|(b, _)| b.clone())
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects.lock().unwrap().get(key).map(|(_, ct)| ct.clone())
    }

    /// Sorted keys under `prefix`.
    pub fn keys_under(&self, prefix: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Reject every upload whose key contains `pattern`.
    pub fn fail_uploads_matching(&self, pattern: &str) {
        *self.fail_uploads.lock().unwrap() = Some(pattern.to_string());
    }

    pub fn fail_deletes(&self) {
        self.fail_deletes.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn download(&self, key: &str, local_path: &Path) -> Result<(), StoreError> {
        let bytes = self
            .get(key)
            .ok_or_else(|| StoreError::download(key, "NoSuchKey"))?;
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::download(key, e))?;
        }
        tokio::fs::write(local_path, bytes)
            .await
            .map_err(|e| StoreError::download(key, e))
    }

    async fn upload(&self, local_path: &Path, key: &str, content_type: &str) -> Result<String, StoreError> {
        let rejected = self
            .fail_uploads
            .lock()
            .unwrap()
            .as_deref()
            .is_some_and(|p| key.contains(p));
        if rejected {
            return Err(StoreError::upload(key, "injected failure"));
        }

        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|e| StoreError::upload(key, e))?;
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (bytes, content_type.to_string()));
        Ok(self.public_url(key))
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.keys_under(prefix))
    }

    async fn delete_batch(&self, keys: &[String]) -> Result<(), StoreError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            let first = keys.first().cloned().unwrap_or_default();
            return Err(StoreError::delete(first, "injected failure"));
        }
        let mut objects = self.objects.lock().unwrap();
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        public_url_for(&self.base, key)
    }
}

#[derive(Default)]
pub struct FakeRepository {
    videos: Mutex<BTreeMap<String, Video>>,
    fail_complete: AtomicBool,
    cancel_on_complete: Mutex<Option<CancellationToken>>,
}

impl FakeRepository {
    pub fn with(videos: Vec<Video>) -> Self {
        let repo = Self::default();
        for video in videos {
            repo.insert(video);
        }
        repo
    }

    pub fn insert(&self, video: Video) {
        self.videos.lock().unwrap().insert(video.id.clone(), video);
    }

    pub fn get(&self, id: &str) -> Video {
        self.videos.lock().unwrap().get(id).cloned().unwrap()
    }

    pub fn fail_completion(&self) {
        self.fail_complete.store(true, Ordering::SeqCst);
    }

    /// Fire `cancel` right after the completion row is written.
    pub fn cancel_after_completion(&self, cancel: CancellationToken) {
        *self.cancel_on_complete.lock().unwrap() = Some(cancel);
    }

    fn select(&self, limit: Option<i64>, keep: impl Fn(&Video) -> bool) -> Vec<Video> {
        let limit = limit.map_or(usize::MAX, |l| l.max(0) as usize);
        self.videos
            .lock()
            .unwrap()
            .values()
            .filter(|v| keep(v))
            .take(limit)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl VideoRepository for FakeRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Video>, PersistenceError> {
        Ok(self.videos.lock().unwrap().get(id).cloned())
    }

    async fn find_stretched_candidates(&self, limit: Option<i64>) -> Result<Vec<Video>, PersistenceError> {
        Ok(self.select(limit, Video::is_stretched_candidate))
    }

    async fn find_incomplete_candidates(&self, limit: Option<i64>) -> Result<Vec<Video>, PersistenceError> {
        Ok(self.select(limit, Video::is_incomplete_candidate))
    }

    async fn mark_status(&self, id: &str, status: ProcessingStatus) -> Result<(), PersistenceError> {
        let mut videos = self.videos.lock().unwrap();
        let video = videos
            .get_mut(id)
            .ok_or_else(|| PersistenceError::VideoGone(id.to_string()))?;
        video.processing_status = status.as_str().to_string();
        Ok(())
    }

    async fn complete(&self, id: &str, processed: &ProcessedVideo) -> Result<(), PersistenceError> {
        if self.fail_complete.load(Ordering::SeqCst) {
            return Err(PersistenceError::VideoGone(id.to_string()));
        }
        {
            let mut videos = self.videos.lock().unwrap();
            let video = videos
                .get_mut(id)
                .ok_or_else(|| PersistenceError::VideoGone(id.to_string()))?;
            video.hls_master_url = Some(processed.master_url.clone());
            video.hls_480p_url = processed.url_480p.clone();
            video.hls_720p_url = processed.url_720p.clone();
            video.hls_1080p_url = processed.url_1080p.clone();
            video.width = Some(processed.width as i32);
            video.height = Some(processed.height as i32);
            video.duration = Some(processed.duration_seconds);
            video.processing_status = ProcessingStatus::Completed.as_str().to_string();
            video.processed_at = Some(utc_now());
        }

        let cancel = self.cancel_on_complete.lock().unwrap().take();
        if let Some(cancel) = cancel {
            cancel.cancel();
            tokio::task::yield_now().await;
        }
        Ok(())
    }
}

/// Reads `WIDTHxHEIGHTxDURATION` from the file instead of inspecting media.
pub struct FakeProbe;

#[async_trait]
impl MediaProbe for FakeProbe {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError> {
        let text = tokio::fs::read_to_string(path).await.unwrap_or_default();
        let parts: Vec<&str> = text.trim().split('x').collect();
        match parts.as_slice() {
            [w, h, d] => match (w.parse(), h.parse(), d.parse()) {
                (Ok(width), Ok(height), Ok(duration_seconds)) => {
                    MediaInfo::new(width, height, duration_seconds)
                }
                _ => Err(ProbeError::NoVideoStream(path.to_path_buf())),
            },
            _ => Err(ProbeError::NoVideoStream(path.to_path_buf())),
        }
    }
}

/// Writes one segment per six seconds of source plus a playlist.
#[derive(Default)]
pub struct FakeTranscoder {
    fail_rendition: Option<&'static str>,
    hang: bool,
    started: Mutex<Vec<String>>,
}

impl FakeTranscoder {
    pub fn failing_on(rendition: &'static str) -> Self {
        Self {
            fail_rendition: Some(rendition),
            ..Default::default()
        }
    }

    /// Reports progress once, then never finishes. Once the stream is
    /// closed it still takes a moment to exit and leaves a partial segment
    /// behind, the way a killed encoder does.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

impl Transcoder for FakeTranscoder {
    fn start(&self, request: TranscodeRequest) -> TranscodeStream {
        let name = request.rendition.name();
        self.started.lock().unwrap().push(name.to_string());

        let fail = self.fail_rendition == Some(name);
        let hang = self.hang;
        TranscodeStream::spawn(8, |tx| async move {
            let _ = tx.send(TranscodeEvent::Progress(50.0)).await;
            if hang {
                tx.closed().await;
                tokio::time::sleep(Duration::from_millis(20)).await;
                let _ = tokio::fs::create_dir_all(&request.output_dir).await;
                let _ = tokio::fs::write(request.output_dir.join("segment_partial.ts"), b"partial").await;
                return;
            }

            let result = if fail {
                Err(TranscodeError::new(name, "encoder exited with exit status: 1"))
            } else {
                write_rendition(&request.output_dir, request.duration_seconds, name).await
            };
            let _ = tx.send(TranscodeEvent::Finished(result)).await;
        })
    }
}

async fn write_rendition(dir: &Path, duration_seconds: f64, name: &str) -> Result<crate::media::RenditionOutput, TranscodeError> {
    let io_err = |e: std::io::Error| TranscodeError::new(name, e.to_string());
    tokio::fs::create_dir_all(dir).await.map_err(io_err)?;

    let count = (duration_seconds / 6.0).ceil().max(1.0) as usize;
    let mut playlist = String::from("#EXTM3U\n#EXT-X-PLAYLIST-TYPE:VOD\n");
    for i in 0..count {
        let segment = format!("segment_{:03}.ts", i);
        tokio::fs::write(dir.join(&segment), name.as_bytes()).await.map_err(io_err)?;
        playlist.push_str(&format!("#EXTINF:6.0,\n{}\n", segment));
    }
    playlist.push_str("#EXT-X-ENDLIST\n");
    tokio::fs::write(dir.join(RENDITION_PLAYLIST_NAME), playlist)
        .await
        .map_err(io_err)?;

    collect_output(dir, name).await
}

#[derive(Default)]
pub struct FakePublisher {
    messages: Mutex<Vec<(String, Vec<u8>)>>,
}

impl FakePublisher {
    pub fn messages(&self) -> Vec<(String, Vec<u8>)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobPublisher for FakePublisher {
    async fn publish(&self, queue: &str, payload: &[u8]) -> anyhow::Result<()> {
        self.messages
            .lock()
            .unwrap()
            .push((queue.to_string(), payload.to_vec()));
        Ok(())
    }
}

/// Fakes wired into a pipeline with a private scratch root.
pub struct Harness {
    pub store: Arc<FakeStore>,
    pub repo: Arc<FakeRepository>,
    pub transcoder: Arc<FakeTranscoder>,
    scratch_root: TempDir,
}

impl Harness {
    pub fn new(transcoder: FakeTranscoder) -> Self {
        Self {
            store: Arc::new(FakeStore::new()),
            repo: Arc::new(FakeRepository::default()),
            transcoder: Arc::new(transcoder),
            scratch_root: tempfile::tempdir().unwrap(),
        }
    }

    /// Register a video whose stored geometry is `width`x`height` and whose
    /// source object holds `source`.
    pub fn add_video(&self, id: &str, width: i32, height: i32, source: &[u8]) {
        let video = sample_video(id, width, height);
        if let Some(key) = &video.storage_key {
            self.store.put(key, source);
        }
        self.repo.insert(video);
    }

    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            scratch_root: self.scratch_path(),
            ladder: LADDER.to_vec(),
            transcode_timeout_factor: 4.0,
            transcode_timeout_min: Duration::from_secs(30),
        }
    }

    pub fn pipeline(&self) -> VideoPipeline {
        self.pipeline_with(self.settings())
    }

    pub fn pipeline_with(&self, settings: PipelineSettings) -> VideoPipeline {
        VideoPipeline::new(
            self.store.clone(),
            self.repo.clone(),
            Arc::new(FakeProbe),
            self.transcoder.clone(),
            settings,
        )
    }

    pub fn scratch_path(&self) -> PathBuf {
        self.scratch_root.path().to_path_buf()
    }

    pub fn scratch_is_empty(&self) -> bool {
        std::fs::read_dir(self.scratch_root.path())
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true)
    }
}
