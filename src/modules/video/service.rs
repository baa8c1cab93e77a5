use anyhow::{anyhow, Result};
use tracing::info;

use super::events::ProcessVideoJob;
use super::model::ProcessingStatus;
use super::repository::VideoRepository;
use crate::infrastructure::queue::rabbitmq::JobPublisher;

pub struct VideoService;

impl VideoService {
    /// Hand a freshly uploaded (or re-uploaded) video to the workers.
    pub async fn enqueue_processing(
        repo: &dyn VideoRepository,
        publisher: &dyn JobPublisher,
        queue: &str,
        video_id: &str,
    ) -> Result<()> {
        let video = repo
            .find_by_id(video_id)
            .await?
            .ok_or_else(|| anyhow!("Video {} not found", video_id))?;

        if video.storage_key.is_none() {
            return Err(anyhow!("Video {} has no uploaded source", video_id));
        }
        if video.status() == Some(ProcessingStatus::Processing) {
            return Err(anyhow!("Video {} is already being processed", video_id));
        }

        repo.mark_status(video_id, ProcessingStatus::Pending).await?;

        let payload = serde_json::to_vec(&ProcessVideoJob {
            video_id: video_id.to_string(),
        })?;
        publisher.publish(queue, &payload).await?;

        info!(video_id = %video_id, queue = %queue, "📤 Queued video for processing");
        Ok(())
    }
}
