use std::env;
use std::str::FromStr;

#[derive(Clone, Copy, Debug)]
pub enum EnvKey {
    DatabaseUrl,
    RabbitMqUrl,
    VideoQueue,
    S3Endpoint,
    S3Bucket,
    S3Region,
    S3AccessKey,
    S3SecretKey,
    S3PublicBaseUrl,
    ScratchDir,
    FfmpegPath,
    FfprobePath,
    FfmpegPreset,
    TranscodeTimeoutFactor,
    TranscodeTimeoutMinSecs,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::DatabaseUrl => "DATABASE_URL",
            EnvKey::RabbitMqUrl => "RABBITMQ_URL",
            EnvKey::VideoQueue => "VIDEO_QUEUE",
            EnvKey::S3Endpoint => "S3_ENDPOINT",
            EnvKey::S3Bucket => "S3_BUCKET",
            EnvKey::S3Region => "S3_REGION",
            EnvKey::S3AccessKey => "AWS_ACCESS_KEY_ID",
            EnvKey::S3SecretKey => "AWS_SECRET_ACCESS_KEY",
            EnvKey::S3PublicBaseUrl => "S3_PUBLIC_BASE_URL",
            EnvKey::ScratchDir => "VIDEO_SCRATCH_DIR",
            EnvKey::FfmpegPath => "FFMPEG_PATH",
            EnvKey::FfprobePath => "FFPROBE_PATH",
            EnvKey::FfmpegPreset => "FFMPEG_PRESET",
            EnvKey::TranscodeTimeoutFactor => "TRANSCODE_TIMEOUT_FACTOR",
            EnvKey::TranscodeTimeoutMinSecs => "TRANSCODE_TIMEOUT_MIN_SECS",
        }
    }
}

pub fn get_opt(key: EnvKey) -> Option<String> {
    env::var(key.as_str()).ok().filter(|v| !v.trim().is_empty())
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    env::var(key.as_str()).unwrap_or_else(|_| default.to_string())
}

/// Absent or blank falls back to `default`; anything else must parse.
pub fn parse_or<T: FromStr>(raw: Option<&str>, default: T) -> Result<T, T::Err> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        Some(value) => value.parse(),
        None => Ok(default),
    }
}
