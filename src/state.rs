use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::settings::AppConfig;
use crate::infrastructure::db::pool::{connect_to_db, DbPool};
use crate::infrastructure::queue::rabbitmq::RabbitMqService;
use crate::infrastructure::storage::s3::StorageService;
use crate::media::{FfmpegTranscoder, FfprobeProbe};
use crate::modules::video::PgVideoRepository;
use crate::pipeline::{PipelineSettings, VideoPipeline};

const DB_MAX_CONNECTIONS: u32 = 5;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,
    pub storage: StorageService,
}

impl AppState {
    pub async fn init(config: AppConfig) -> Result<Self> {
        let db = connect_to_db(&config.database_url, DB_MAX_CONNECTIONS)
            .await
            .context("Failed to connect to PostgreSQL")?;

        let storage = StorageService::new(
            &config.s3_endpoint,
            &config.s3_region,
            &config.s3_bucket,
            &config.s3_access_key,
            &config.s3_secret_key,
            config.public_base_url.clone(),
        );

        Ok(Self { config, db, storage })
    }

    pub fn video_repository(&self) -> PgVideoRepository {
        PgVideoRepository::new(self.db.clone())
    }

    pub async fn connect_queue(&self) -> Result<RabbitMqService> {
        let url = self.config.require_rabbitmq_url()?;
        RabbitMqService::new(url).await
    }

    pub fn build_pipeline(&self) -> VideoPipeline {
        VideoPipeline::new(
            Arc::new(self.storage.clone()),
            Arc::new(self.video_repository()),
            Arc::new(FfprobeProbe::new(&self.config.ffprobe_path)),
            Arc::new(FfmpegTranscoder::new(
                &self.config.ffmpeg_path,
                &self.config.ffmpeg_preset,
            )),
            PipelineSettings::from_config(&self.config),
        )
    }
}
