use anyhow::{anyhow, Result};
use clap::Parser;
use std::{path::PathBuf, process::ExitCode};
use tokio::sync::mpsc::unbounded_channel;
use tracing::{error, info, warn};

mod api;
mod app;
mod config;
mod error;
mod manifest;
mod media;
mod openrouter;
mod orchestrator;
mod prompt;
mod report;
mod scene;
mod structure;
mod types;
mod ui;

use config::AppConfig;
use media::Ffmpeg;
use openrouter::OpenRouterClient;
use orchestrator::{plan_slots, FailurePolicy, Orchestrator, RunSettings};
use scene::SceneWriter;
use structure::StructureCatalog;
use types::{file_is_nonempty, CompositionRequest, RequestDraft, Strategy, TerminalState};

const EXIT_SUCCESS: u8 = 0;
const EXIT_FAILURE: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(
    name = "musiccreator",
    version,
    about = "Build long-form compositions on a MusicGPT server, one clip at a time"
)]
struct Args {
    /// Base prompt shared by every clip
    #[arg(short, long)]
    prompt: String,

    /// sequential, hierarchical or ai
    #[arg(long, default_value = "sequential")]
    strategy: String,

    /// simple, song or classical
    #[arg(long)]
    structure: Option<String>,

    /// Number of clips when no structure is used
    #[arg(short = 'n', long)]
    num_clips: Option<u32>,

    /// Duration of each clip or section
    #[arg(short, long, default_value_t = 30)]
    seconds_per_clip: u32,

    /// Split this many seconds across the structure's sections by weight
    #[arg(long)]
    total_seconds: Option<u32>,

    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    #[arg(short, long, default_value = "composition.wav")]
    final_name: String,

    /// MusicGPT server as host:port
    #[arg(long)]
    service: Option<String>,

    /// Per-clip generation timeout
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Pause between generated clips
    #[arg(long)]
    pause_secs: Option<u64>,

    /// Keep generating after a clip fails
    #[arg(long)]
    continue_on_failure: bool,

    /// Print progress lines instead of the inline display
    #[arg(long)]
    plain: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    if let Err(err) = setup_tracing(ui::inline_enabled(args.plain)) {
        eprintln!("{err:#}");
        return ExitCode::from(EXIT_USAGE);
    }

    match run(args).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(EXIT_USAGE)
        }
    }
}

/// `Err` is reserved for configuration problems; every other failure is
/// reported here and mapped to an exit code.
async fn run(args: Args) -> Result<ExitCode> {
    let mut config = AppConfig::load()?;
    if let Some(addr) = &args.service {
        config.set_service_addr(addr.trim());
    }
    if let Some(seconds) = args.timeout_secs {
        config.set_clip_timeout_seconds(seconds);
    }
    if let Some(seconds) = args.pause_secs {
        config.set_clip_pause_seconds(seconds);
    }

    let request = RequestDraft {
        prompt: args.prompt.clone(),
        strategy: args.strategy.clone(),
        structure: args.structure.clone(),
        clip_count: args.num_clips,
        seconds_per_clip: args.seconds_per_clip,
        total_seconds: args.total_seconds,
        output_dir: args.output_dir.clone().unwrap_or_else(|| config.output_dir().to_path_buf()),
        final_name: args.final_name.clone(),
    }
    .validate()?;

    let scene_writer = match request.strategy {
        Strategy::Ai => {
            let api_key = config.openrouter_api_key().ok_or_else(|| {
                anyhow!("the ai strategy needs OPENROUTER_API_KEY (environment, .env or config file)")
            })?;
            let client = OpenRouterClient::new(
                config.openrouter_url(),
                api_key,
                config.openrouter_model(),
            )?;
            info!(model = client.model(), "scene descriptions from OpenRouter");
            Some(client)
        }
        _ => None,
    };

    let client = api::Client::new(config.service_addr(), config.clip_timeout())?;
    let ffmpeg = Ffmpeg::new(config.ffmpeg_path());

    if let Err(err) = preflight(&client, &ffmpeg, &request).await {
        error!("{err:#}");
        return Ok(ExitCode::from(EXIT_FAILURE));
    }

    let settings = RunSettings {
        failure_policy: if args.continue_on_failure {
            FailurePolicy::Continue
        } else {
            FailurePolicy::Abort
        },
        clip_pause: config.clip_pause(),
    };

    let (events_tx, events_rx) = unbounded_channel();
    let renderer = ui::spawn_renderer(args.plain, events_rx);

    let outcome = {
        let orchestrator = Orchestrator::new(&client, &ffmpeg)
            .with_scene_writer(scene_writer.as_ref().map(|writer| writer as &dyn SceneWriter))
            .with_events(events_tx)
            .with_settings(settings);
        tokio::select! {
            result = orchestrator.run(&request) => Some(result),
            _ = tokio::signal::ctrl_c() => None,
        }
    };

    match renderer.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!("progress display failed: {err:#}"),
        Err(err) => warn!("progress display task failed: {err}"),
    }

    let report = match outcome {
        Some(Ok(report)) => report,
        Some(Err(err)) if matches!(err, error::Error::Configuration(_)) => return Err(err.into()),
        Some(Err(err)) => {
            error!("{err}");
            return Ok(ExitCode::from(EXIT_FAILURE));
        }
        None => {
            println!(
                "\nInterrupted. Clips already written to {} are kept; rerun the same command to resume.",
                request.output_dir.display()
            );
            return Ok(ExitCode::from(EXIT_INTERRUPTED));
        }
    };

    print!("{}", report::render_summary(&report));
    Ok(ExitCode::from(exit_status(report.outcome)))
}

fn exit_status(outcome: TerminalState) -> u8 {
    if outcome.is_success() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    }
}

/// The service is only needed when at least one planned clip is missing.
fn needs_service(request: &CompositionRequest) -> bool {
    plan_slots(request, &StructureCatalog::new())
        .iter()
        .any(|slot| !file_is_nonempty(&request.clip_path(slot.ordinal)))
}

async fn preflight(
    client: &api::Client,
    ffmpeg: &Ffmpeg,
    request: &CompositionRequest,
) -> Result<()> {
    ffmpeg.ensure_available().await?;

    if !needs_service(request) {
        info!("all clips already exist; skipping service check");
        return Ok(());
    }
    client.probe().await?;
    info!(service = client.service_addr(), "generation service reachable");
    Ok(())
}

fn setup_tracing(inline_display: bool) -> Result<()> {
    // The inline display owns the terminal, so only warnings reach stderr by default.
    let default_directive = if inline_display { "warn" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err: Box<dyn std::error::Error + Send + Sync>| {
            anyhow!("failed to initialise tracing: {err}")
        })?;
    Ok(())
}
