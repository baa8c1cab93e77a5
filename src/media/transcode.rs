//! HLS rendition encoding through ffmpeg.
//!
//! A transcode is started with [`Transcoder::start`] and observed through a
//! [`TranscodeStream`]: zero or more [`TranscodeEvent::Progress`] updates
//! followed by exactly one [`TranscodeEvent::Finished`]. Dropping the stream
//! before it finishes kills the encoder process in the background;
//! [`TranscodeStream::close`] kills it and waits until it has exited.

use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::error::TranscodeError;
use super::ladder::PlannedRendition;
use super::playlist::RENDITION_PLAYLIST_NAME;
use super::progress::{is_progress_line, parse_progress_line, FfmpegProgress};

pub const SEGMENT_SECONDS: u32 = 6;
pub const GOP_SIZE: u32 = 48;
pub const SEGMENT_PATTERN: &str = "segment_%03d.ts";

const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub rendition: PlannedRendition,
    pub duration_seconds: f64,
}

/// Files produced for one rendition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenditionOutput {
    pub playlist: PathBuf,
    pub segments: Vec<PathBuf>,
}

impl RenditionOutput {
    /// Segments first, playlist last, so a published playlist never
    /// references a segment that is not there yet.
    pub fn upload_order(&self) -> impl Iterator<Item = &Path> {
        self.segments
            .iter()
            .map(PathBuf::as_path)
            .chain(std::iter::once(self.playlist.as_path()))
    }
}

#[derive(Debug)]
pub enum TranscodeEvent {
    Progress(f64),
    Finished(Result<RenditionOutput, TranscodeError>),
}

pub struct TranscodeStream {
    rx: mpsc::Receiver<TranscodeEvent>,
    task: JoinHandle<()>,
}

impl TranscodeStream {
    /// Run `work` on its own task. The task must stop once the sender
    /// reports the receiver closed.
    pub fn spawn<F, Fut>(buffer: usize, work: F) -> Self
    where
        F: FnOnce(mpsc::Sender<TranscodeEvent>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(buffer);
        let task = tokio::spawn(work(tx));
        Self { rx, task }
    }

    pub async fn next(&mut self) -> Option<TranscodeEvent> {
        self.rx.recv().await
    }

    /// Stop listening and wait for the producing task to wind down. When
    /// this returns, no encoder started for this stream is still running.
    pub async fn close(self) {
        let Self { rx, task } = self;
        drop(rx);
        if let Err(e) = task.await {
            warn!("Transcode task ended abnormally: {}", e);
        }
    }
}

pub trait Transcoder: Send + Sync {
    fn start(&self, request: TranscodeRequest) -> TranscodeStream;
}

#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg_path: String,
    preset: String,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: impl Into<String>, preset: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            preset: preset.into(),
        }
    }

    pub fn build_args(&self, request: &TranscodeRequest) -> Vec<String> {
        let rendition = &request.rendition.rendition;
        let segment_path = request.output_dir.join(SEGMENT_PATTERN);
        let playlist_path = request.output_dir.join(RENDITION_PLAYLIST_NAME);

        let mut args: Vec<String> = vec![
            "-y".into(),
            "-v".into(),
            "error".into(),
            "-nostats".into(),
            "-progress".into(),
            "pipe:2".into(),
            "-i".into(),
            request.input.to_string_lossy().into_owned(),
        ];

        args.extend(
            [
                "-vf".to_string(),
                request.rendition.scale_filter(),
                "-c:v".into(),
                "libx264".into(),
                "-preset".into(),
                self.preset.clone(),
                "-b:v".into(),
                format!("{}k", rendition.video_bitrate_kbps),
                "-g".into(),
                GOP_SIZE.to_string(),
                "-keyint_min".into(),
                GOP_SIZE.to_string(),
                "-sc_threshold".into(),
                "0".into(),
                "-c:a".into(),
                "aac".into(),
                "-b:a".into(),
                format!("{}k", rendition.audio_bitrate_kbps),
                "-f".into(),
                "hls".into(),
                "-hls_time".into(),
                SEGMENT_SECONDS.to_string(),
                "-hls_playlist_type".into(),
                "vod".into(),
                "-hls_segment_filename".into(),
                segment_path.to_string_lossy().into_owned(),
            ]
            .into_iter(),
        );
        args.push(playlist_path.to_string_lossy().into_owned());

        args
    }
}

impl Transcoder for FfmpegTranscoder {
    fn start(&self, request: TranscodeRequest) -> TranscodeStream {
        let ffmpeg_path = self.ffmpeg_path.clone();
        let args = self.build_args(&request);

        TranscodeStream::spawn(32, |tx| async move {
            let result = run_ffmpeg(&ffmpeg_path, &args, &request, &tx).await;
            if tx.is_closed() {
                return;
            }

            let result = match result {
                Ok(()) => collect_output(&request.output_dir, request.rendition.name()).await,
                Err(e) => Err(e),
            };
            let _ = tx.send(TranscodeEvent::Finished(result)).await;
        })
    }
}

async fn run_ffmpeg(
    ffmpeg_path: &str,
    args: &[String],
    request: &TranscodeRequest,
    tx: &mpsc::Sender<TranscodeEvent>,
) -> Result<(), TranscodeError> {
    let rendition = request.rendition.name();

    tokio::fs::create_dir_all(&request.output_dir)
        .await
        .map_err(|e| TranscodeError::new(rendition, format!("cannot create output dir: {}", e)))?;

    debug!("Running {} {}", ffmpeg_path, args.join(" "));

    let mut child = Command::new(ffmpeg_path)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| TranscodeError::new(rendition, format!("failed to launch {}: {}", ffmpeg_path, e)))?;

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| TranscodeError::new(rendition, "encoder stderr not captured"))?;

    let total_ms = (request.duration_seconds * 1000.0) as i64;
    let drained = tokio::select! {
        tail = drain_stderr(stderr, total_ms, tx) => Some(tail),
        _ = tx.closed() => None,
    };
    let Some(tail) = drained else {
        return stop_encoder(&mut child, rendition).await;
    };

    let status = tokio::select! {
        status = child.wait() => Some(status),
        _ = tx.closed() => None,
    };
    let Some(status) = status else {
        return stop_encoder(&mut child, rendition).await;
    };
    let status =
        status.map_err(|e| TranscodeError::new(rendition, format!("failed to wait for encoder: {}", e)))?;

    if status.success() {
        Ok(())
    } else {
        let detail: Vec<String> = tail.into_iter().collect();
        Err(TranscodeError::new(
            rendition,
            format!("encoder exited with {}: {}", status, detail.join(" | ")),
        ))
    }
}

/// Read stderr to EOF, forwarding progress and keeping the last diagnostic
/// lines. Bytes that are not UTF-8 are replaced, never fatal: the pipe has to
/// keep draining or the encoder blocks on a full buffer.
async fn drain_stderr(
    stderr: ChildStderr,
    total_ms: i64,
    tx: &mpsc::Sender<TranscodeEvent>,
) -> VecDeque<String> {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    let mut progress = FfmpegProgress::default();
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Stopped reading encoder stderr: {}", e);
                break;
            }
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end();
        if let Some(snapshot) = parse_progress_line(line, &mut progress) {
            let _ = tx.try_send(TranscodeEvent::Progress(snapshot.percentage(total_ms)));
        } else if !is_progress_line(line) && !line.trim().is_empty() {
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line.to_string());
        }
    }

    tail
}

/// Kill and reap an encoder whose output nobody is waiting for.
async fn stop_encoder(child: &mut Child, rendition: &str) -> Result<(), TranscodeError> {
    if let Err(e) = child.kill().await {
        warn!(rendition, "Failed to kill encoder: {}", e);
    }
    Err(TranscodeError::new(rendition, "stopped before the encoder finished"))
}

/// Gather the playlist and segments an encoder left in `dir`.
pub async fn collect_output(dir: &Path, rendition: &str) -> Result<RenditionOutput, TranscodeError> {
    let read_err = |e: std::io::Error| TranscodeError::new(rendition, format!("cannot read output dir: {}", e));

    let playlist = dir.join(RENDITION_PLAYLIST_NAME);
    if !tokio::fs::try_exists(&playlist).await.map_err(read_err)? {
        return Err(TranscodeError::new(rendition, "encoder produced no playlist"));
    }

    let mut segments = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await.map_err(read_err)?;
    while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("ts") {
            segments.push(path);
        }
    }
    segments.sort();

    if segments.is_empty() {
        return Err(TranscodeError::new(rendition, "encoder produced no segments"));
    }

    Ok(RenditionOutput { playlist, segments })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::ladder::{plan_renditions, LADDER};

    fn request(dir: &Path) -> TranscodeRequest {
        TranscodeRequest {
            input: PathBuf::from("/scratch/v1/source.mp4"),
            output_dir: dir.to_path_buf(),
            rendition: plan_renditions(1080, 1920, &LADDER)[1],
            duration_seconds: 120.0,
        }
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn args_carry_fixed_gop_and_vod_hls() {
        let transcoder = FfmpegTranscoder::new("ffmpeg", "veryfast");
        let args = transcoder.build_args(&request(Path::new("/scratch/v1/720p")));

        assert_eq!(value_after(&args, "-vf"), Some("scale=-2:720"));
        assert_eq!(value_after(&args, "-c:v"), Some("libx264"));
        assert_eq!(value_after(&args, "-c:a"), Some("aac"));
        assert_eq!(value_after(&args, "-b:v"), Some("2500k"));
        assert_eq!(value_after(&args, "-b:a"), Some("128k"));
        assert_eq!(value_after(&args, "-preset"), Some("veryfast"));
        assert_eq!(value_after(&args, "-g"), Some("48"));
        assert_eq!(value_after(&args, "-keyint_min"), Some("48"));
        assert_eq!(value_after(&args, "-sc_threshold"), Some("0"));
        assert_eq!(value_after(&args, "-hls_time"), Some("6"));
        assert_eq!(value_after(&args, "-hls_playlist_type"), Some("vod"));
        assert_eq!(
            value_after(&args, "-hls_segment_filename"),
            Some("/scratch/v1/720p/segment_%03d.ts")
        );
        assert_eq!(args.last().map(String::as_str), Some("/scratch/v1/720p/playlist.m3u8"));
    }

    #[tokio::test]
    async fn collect_output_sorts_segments() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["segment_002.ts", "segment_000.ts", "segment_001.ts", "playlist.m3u8", "log.txt"] {
            tokio::fs::write(dir.path().join(name), b"x").await.unwrap();
        }

        let output = collect_output(dir.path(), "720p").await.unwrap();
        let names: Vec<String> = output
            .upload_order()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["segment_000.ts", "segment_001.ts", "segment_002.ts", "playlist.m3u8"]
        );
    }

    #[tokio::test]
    async fn collect_output_requires_playlist_and_segments() {
        let dir = tempfile::tempdir().unwrap();
        let err = collect_output(dir.path(), "480p").await.unwrap_err();
        assert_eq!(err.rendition, "480p");

        tokio::fs::write(dir.path().join("playlist.m3u8"), b"#EXTM3U").await.unwrap();
        let err = collect_output(dir.path(), "480p").await.unwrap_err();
        assert!(err.message.contains("no segments"));
    }

    async fn finish(stream: &mut TranscodeStream) -> Option<Result<RenditionOutput, TranscodeError>> {
        let mut finished = None;
        while let Some(event) = stream.next().await {
            if let TranscodeEvent::Finished(result) = event {
                finished = Some(result);
            }
        }
        finished
    }

    /// Shell script standing in for ffmpeg. `$last` is the playlist path and
    /// `$dir` its rendition directory.
    #[cfg(unix)]
    fn fake_encoder(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-ffmpeg");
        let script = format!("#!/bin/sh\nfor last; do :; done\ndir=$(dirname \"$last\")\n{}\n", body);
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn missing_encoder_finishes_with_error() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = FfmpegTranscoder::new("/nonexistent/ffmpeg-binary", "veryfast");
        let mut stream = transcoder.start(request(&dir.path().join("720p")));

        let err = finish(&mut stream).await.expect("stream must end with Finished").unwrap_err();
        assert_eq!(err.rendition, "720p");
        assert!(err.message.contains("failed to launch"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn noisy_non_utf8_stderr_does_not_stall_the_encoder() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = fake_encoder(
            dir.path(),
            r#"printf 'Input #0 \377\376 title\n' >&2
head -c 300000 /dev/zero | tr '\0' 'x' >&2
echo >&2
printf 'more \377 noise\n' >&2
: > "$dir/segment_000.ts"
printf '#EXTM3U\n' > "$last"
exit 0"#,
        );
        let transcoder = FfmpegTranscoder::new(encoder, "veryfast");
        let mut stream = transcoder.start(request(&dir.path().join("720p")));

        let finished = tokio::time::timeout(std::time::Duration::from_secs(10), finish(&mut stream))
            .await
            .expect("encoder output was not drained");

        let output = finished.expect("stream must end with Finished").unwrap();
        assert_eq!(output.segments.len(), 1);
        assert!(output.playlist.ends_with("720p/playlist.m3u8"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failure_detail_survives_invalid_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = fake_encoder(
            dir.path(),
            r#"printf 'moov atom not found \377\376\n' >&2
exit 1"#,
        );
        let transcoder = FfmpegTranscoder::new(encoder, "veryfast");
        let mut stream = transcoder.start(request(&dir.path().join("720p")));

        let err = tokio::time::timeout(std::time::Duration::from_secs(10), finish(&mut stream))
            .await
            .unwrap()
            .expect("stream must end with Finished")
            .unwrap_err();

        assert!(err.message.contains("exited"), "{}", err.message);
        assert!(err.message.contains("moov atom not found"), "{}", err.message);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn close_waits_for_the_encoder_to_exit() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = fake_encoder(
            dir.path(),
            r#"echo $$ > "$dir/pid"
exec sleep 30"#,
        );
        let output_dir = dir.path().join("720p");
        let transcoder = FfmpegTranscoder::new(encoder, "veryfast");
        let stream = transcoder.start(request(&output_dir));

        let pid_file = output_dir.join("pid");
        let mut pid = String::new();
        for _ in 0..200 {
            pid = std::fs::read_to_string(&pid_file).unwrap_or_default().trim().to_string();
            if !pid.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        assert!(!pid.is_empty(), "encoder never started");
        assert!(Path::new(&format!("/proc/{}", pid)).exists());

        tokio::time::timeout(std::time::Duration::from_secs(5), stream.close())
            .await
            .expect("close did not return");

        assert!(!Path::new(&format!("/proc/{}", pid)).exists());
    }
}
