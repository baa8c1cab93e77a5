use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::config::env::{self, EnvKey};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub rabbitmq_url: Option<String>,
    pub video_queue: String,
    pub s3_endpoint: String,
    pub s3_bucket: String,
    pub s3_region: String,
    pub s3_access_key: String,
    pub s3_secret_key: String,
    pub public_base_url: Url,
    pub scratch_dir: PathBuf,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub ffmpeg_preset: String,
    pub transcode_timeout_factor: f64,
    pub transcode_timeout_min_secs: u64,
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let scratch_dir = env::get_opt(EnvKey::ScratchDir)
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("course-video"));

        let public_base_url = parse_public_base_url(&require(EnvKey::S3PublicBaseUrl)?)?;

        let transcode_timeout_factor = parse_timeout_factor(env::get_opt(EnvKey::TranscodeTimeoutFactor))?;
        let transcode_timeout_min_secs = parse_setting(
            EnvKey::TranscodeTimeoutMinSecs,
            env::get_opt(EnvKey::TranscodeTimeoutMinSecs),
            300_u64,
        )?;

        Ok(Self {
            database_url: require(EnvKey::DatabaseUrl)?,
            rabbitmq_url: env::get_opt(EnvKey::RabbitMqUrl),
            video_queue: env::get_or(EnvKey::VideoQueue, "video_processing"),
            s3_endpoint: require(EnvKey::S3Endpoint)?,
            s3_bucket: require(EnvKey::S3Bucket)?,
            s3_region: env::get_or(EnvKey::S3Region, "us-east-1"),
            s3_access_key: require(EnvKey::S3AccessKey)?,
            s3_secret_key: require(EnvKey::S3SecretKey)?,
            public_base_url,
            scratch_dir,
            ffmpeg_path: env::get_or(EnvKey::FfmpegPath, "ffmpeg"),
            ffprobe_path: env::get_or(EnvKey::FfprobePath, "ffprobe"),
            ffmpeg_preset: env::get_or(EnvKey::FfmpegPreset, "veryfast"),
            transcode_timeout_factor,
            transcode_timeout_min_secs,
        })
    }

    pub fn require_rabbitmq_url(&self) -> Result<&str, ConfigError> {
        self.rabbitmq_url
            .as_deref()
            .ok_or(ConfigError::Missing(EnvKey::RabbitMqUrl.as_str()))
    }
}

fn require(key: EnvKey) -> Result<String, ConfigError> {
    env::get_opt(key).ok_or(ConfigError::Missing(key.as_str()))
}

fn parse_setting<T>(key: EnvKey, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    env::parse_or(raw.as_deref(), default).map_err(|e| ConfigError::Invalid {
        key: key.as_str(),
        message: format!("{:?}: {}", raw.as_deref().unwrap_or_default(), e),
    })
}

fn parse_timeout_factor(raw: Option<String>) -> Result<f64, ConfigError> {
    let factor = parse_setting(EnvKey::TranscodeTimeoutFactor, raw, 4.0_f64)?;
    if !factor.is_finite() || factor <= 0.0 {
        return Err(ConfigError::Invalid {
            key: EnvKey::TranscodeTimeoutFactor.as_str(),
            message: format!("must be a positive number, got {}", factor),
        });
    }
    Ok(factor)
}

/// Public URLs are built as `{base}/{key}`, so the base must be absolute and
/// carry no trailing slash.
pub fn parse_public_base_url(raw: &str) -> Result<Url, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let url = Url::parse(trimmed).map_err(|e| ConfigError::Invalid {
        key: EnvKey::S3PublicBaseUrl.as_str(),
        message: e.to_string(),
    })?;

    if url.cannot_be_a_base() {
        return Err(ConfigError::Invalid {
            key: EnvKey::S3PublicBaseUrl.as_str(),
            message: format!("{} is not a base URL", trimmed),
        });
    }

    Ok(url)
}
