use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod infrastructure;
mod media;
mod modules;
mod pipeline;
mod state;
mod workers;

use crate::config::settings::AppConfig;
use crate::modules::video::service::VideoService;
use crate::pipeline::{BatchDriver, BatchOptions, CandidateSelector};
use crate::state::AppState;

/// HLS ingestion and transcoding for course videos
#[derive(Parser, Debug)]
#[command(name = "course-video", author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consume processing jobs from the queue until interrupted
    Worker,

    /// Mark a video PENDING and queue it for processing
    Enqueue { video_id: String },

    /// Run the pipeline once for one video, in this process
    Process { video_id: String },

    /// Re-run videos whose output was encoded with swapped axes
    ReprocessStretched(BatchArgs),

    /// Re-run videos that failed or never produced a master playlist
    ReprocessIncomplete(BatchArgs),
}

#[derive(clap::Args, Debug)]
struct BatchArgs {
    /// List the selected videos without processing them
    #[arg(long)]
    dry_run: bool,

    /// Process at most this many videos
    #[arg(long)]
    limit: Option<i64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// `Ok(false)` means the command ran but some video failed.
async fn run(cli: Cli) -> Result<bool> {
    let config = AppConfig::new().context("Invalid configuration")?;
    let state = AppState::init(config).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    match cli.command {
        Command::Worker => {
            check_tools(&state.config)?;
            let queue = state.connect_queue().await?;
            let pipeline = state.build_pipeline();
            workers::transcoder::start_transcoder_worker(
                &queue,
                &state.config.video_queue,
                &pipeline,
                &cancel,
            )
            .await?;
            Ok(true)
        }
        Command::Enqueue { video_id } => {
            let queue = state.connect_queue().await?;
            let repo = state.video_repository();
            VideoService::enqueue_processing(&repo, &queue, &state.config.video_queue, &video_id).await?;
            Ok(true)
        }
        Command::Process { video_id } => {
            check_tools(&state.config)?;
            match state.build_pipeline().run(&video_id, &cancel).await {
                Ok(outcome) => {
                    info!(master = %outcome.master_url, renditions = ?outcome.renditions, "Done");
                    Ok(true)
                }
                Err(failure) => {
                    error!("{}", failure);
                    Ok(false)
                }
            }
        }
        Command::ReprocessStretched(args) => {
            run_batch(&state, CandidateSelector::Stretched, args, &cancel).await
        }
        Command::ReprocessIncomplete(args) => {
            run_batch(&state, CandidateSelector::Incomplete, args, &cancel).await
        }
    }
}

async fn run_batch(
    state: &AppState,
    selector: CandidateSelector,
    args: BatchArgs,
    cancel: &CancellationToken,
) -> Result<bool> {
    if !args.dry_run {
        check_tools(&state.config)?;
    }

    let options = BatchOptions {
        selector,
        limit: args.limit,
        dry_run: args.dry_run,
    };
    let report = BatchDriver::new(state.build_pipeline())
        .run(&options, cancel)
        .await
        .context("Failed to select videos")?;

    for (video_id, reason) in &report.failed {
        error!(video_id = %video_id, "{}", reason);
    }
    info!(
        candidates = report.candidates.len(),
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        skipped = report.skipped,
        "Reprocessing summary"
    );

    Ok(report.is_clean())
}

fn check_tools(config: &AppConfig) -> Result<()> {
    media::check_tools(&config.ffmpeg_path, &config.ffprobe_path)
        .with_context(|| format!("{} / {} not found on PATH", config.ffmpeg_path, config.ffprobe_path))
}
