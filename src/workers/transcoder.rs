use futures_util::StreamExt;
use lapin::message::Delivery;
use lapin::options::BasicAckOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::infrastructure::queue::rabbitmq::RabbitMqService;
use crate::modules::video::events::ProcessVideoJob;
use crate::pipeline::VideoPipeline;

const CONSUMER_TAG: &str = "video_pipeline_worker";

/// Consume `queue` until the connection closes or `cancel` fires.
///
/// Jobs run one at a time. Every delivery is acked whatever the outcome: a
/// failed video is recorded as `FAILED` and picked up again by the
/// incomplete-video sweep, never by redelivery.
pub async fn start_transcoder_worker(
    queue: &RabbitMqService,
    queue_name: &str,
    pipeline: &VideoPipeline,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    info!("🎥 Starting Transcoder Worker...");

    let mut consumer = queue.consume(queue_name, CONSUMER_TAG).await?;

    info!("🎥 Transcoder Worker listening on '{}'", queue_name);

    loop {
        let delivery = tokio::select! {
            _ = cancel.cancelled() => {
                info!("Shutdown requested, stopping consumer");
                break;
            }
            next = consumer.next() => next,
        };

        let delivery = match delivery {
            Some(Ok(delivery)) => delivery,
            Some(Err(e)) => {
                error!("❌ Consumer error: {}", e);
                continue;
            }
            None => {
                warn!("Consumer stream ended");
                break;
            }
        };

        info!("📦 Received video job");
        handle_delivery(pipeline, &delivery, cancel).await;

        if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
            error!("Failed to ack message: {}", e);
        }
    }

    Ok(())
}

async fn handle_delivery(pipeline: &VideoPipeline, delivery: &Delivery, cancel: &CancellationToken) {
    let job = match serde_json::from_slice::<ProcessVideoJob>(&delivery.data) {
        Ok(job) => job,
        Err(e) => {
            error!("❌ Failed to parse job: {}", e);
            return;
        }
    };

    match pipeline.run(&job.video_id, cancel).await {
        Ok(outcome) => info!(video_id = %job.video_id, master = %outcome.master_url, "✅ Job completed"),
        Err(failure) => error!(video_id = %job.video_id, "❌ Job failed: {}", failure),
    }
}
