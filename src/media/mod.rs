//! External media tools: inspection, rendition planning, encoding and
//! master playlist composition.

pub mod error;
pub mod ladder;
pub mod playlist;
pub mod probe;
pub mod progress;
pub mod transcode;

pub use error::{ProbeError, TranscodeError};
pub use ladder::{plan_renditions, PlannedRendition, Rendition, LADDER};
pub use probe::{FfprobeProbe, MediaInfo, MediaProbe};
pub use transcode::{
    FfmpegTranscoder, RenditionOutput, TranscodeEvent, TranscodeRequest, TranscodeStream, Transcoder,
};

/// Resolve the encoder and inspection binaries before any work starts.
pub fn check_tools(ffmpeg_path: &str, ffprobe_path: &str) -> Result<(), which::Error> {
    which::which(ffmpeg_path)?;
    which::which(ffprobe_path)?;
    Ok(())
}
