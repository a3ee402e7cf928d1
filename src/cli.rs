//! Command-line interface: record a practice session and print scores.

use crate::audio::capture::{CpalMicrophone, list_devices};
use crate::config::{Config, GroundTruth, GroundTruthMode, SessionConfig};
use crate::scoring::adapter::{GroundTruthSource, ScoringPipeline};
use crate::scoring::pronunciation::{
    HttpPronunciationClient, PronunciationClientConfig, PronunciationScorer,
};
use crate::scoring::transcription::{HttpTranscriptionClient, TranscriptionClientConfig};
use crate::session::orchestrator::{AudioSession, SessionHooks};
use crate::session::types::{AudioSegment, SessionState, combined_transcription};
use clap::{ArgAction, Parser, Subcommand};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(
    name = "uttercut",
    version,
    about = "Segment live speech on silence and score each utterance"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record and score a session (the default when no subcommand is given)
    Run(RunArgs),
    /// List available audio input devices
    Devices,
}

#[derive(clap::Args, Debug, Default)]
pub struct RunArgs {
    /// Score every segment against this fixed phrase instead of its own
    /// transcription
    #[arg(long)]
    pub phrase: Option<String>,

    /// Normalized amplitude below which audio counts as silence (0, 1]
    #[arg(long)]
    pub threshold: Option<f32>,

    /// Silence duration that ends a segment (e.g. "1s", "800ms")
    #[arg(long, value_parser = humantime::parse_duration)]
    pub silence_delay: Option<Duration>,

    /// Per-segment recording ceiling (e.g. "12s")
    #[arg(long, value_parser = humantime::parse_duration)]
    pub max_segment: Option<Duration>,

    /// Total session ceiling (e.g. "1m")
    #[arg(long, value_parser = humantime::parse_duration)]
    pub max_total: Option<Duration>,

    /// Audio input device name (see `uttercut devices`)
    #[arg(long)]
    pub device: Option<String>,

    /// Suppress per-segment output
    #[arg(short, long)]
    pub quiet: bool,

    /// Show the live level meter (-v) and diagnostic events (-vv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Devices) => list_audio_devices(),
        Some(Commands::Run(args)) => run_session(cli.config.as_deref(), args).await,
        None => run_session(cli.config.as_deref(), RunArgs::default()).await,
    }
}

fn list_audio_devices() -> anyhow::Result<()> {
    let devices = list_devices()?;
    if devices.is_empty() {
        println!("No audio input devices found");
    } else {
        println!("Audio input devices:");
        for device in devices {
            println!("  {}", device);
        }
    }
    Ok(())
}

/// CLI flags win over environment variables, which win over the file.
fn apply_args(mut config: Config, args: &RunArgs) -> Config {
    if let Some(phrase) = &args.phrase {
        config.session.mode = GroundTruthMode::Fixed;
        config.session.fixed_phrase = Some(phrase.clone());
    }
    if let Some(threshold) = args.threshold {
        config.audio.silence_threshold = threshold;
    }
    if let Some(delay) = args.silence_delay {
        config.audio.silence_delay_ms = delay.as_millis() as u64;
    }
    if let Some(ceiling) = args.max_segment {
        config.audio.max_segment_ms = ceiling.as_millis() as u64;
    }
    if let Some(ceiling) = args.max_total {
        config.audio.max_total_ms = ceiling.as_millis() as u64;
    }
    if let Some(device) = &args.device {
        config.audio.device = Some(device.clone());
    }
    config
}

fn build_scorer(config: &Config) -> anyhow::Result<Arc<dyn PronunciationScorer>> {
    let services = &config.services;
    if services.scoring_url.is_empty() || services.scoring_api_key.is_empty() {
        anyhow::bail!(
            "pronunciation scoring needs services.scoring_url and services.scoring_api_key \
             (config file or UTTERCUT_SCORING_API_KEY)"
        );
    }

    let mut client_config = PronunciationClientConfig::new(
        &services.scoring_url,
        &services.scoring_api_key,
        &services.scoring_user_id,
    );
    client_config.request_timeout = Duration::from_secs(services.request_timeout_secs);
    Ok(Arc::new(HttpPronunciationClient::new(client_config)?))
}

fn build_ground_truth(
    config: &Config,
    session_config: &SessionConfig,
) -> anyhow::Result<GroundTruthSource> {
    match &session_config.ground_truth {
        GroundTruth::Fixed(phrase) => Ok(GroundTruthSource::Fixed(phrase.clone())),
        GroundTruth::Transcribed => {
            let services = &config.services;
            if services.transcription_url.is_empty() || services.transcription_api_key.is_empty() {
                anyhow::bail!(
                    "transcribed mode needs services.transcription_url and a transcription \
                     API key; pass --phrase \"...\" to score against a fixed phrase instead"
                );
            }

            let mut client_config = TranscriptionClientConfig::new(
                &services.transcription_url,
                &services.transcription_api_key,
            );
            client_config.request_timeout = Duration::from_secs(services.request_timeout_secs);
            Ok(GroundTruthSource::Transcribed(Arc::new(
                HttpTranscriptionClient::new(client_config)?,
            )))
        }
    }
}

async fn run_session(config_path: Option<&Path>, args: RunArgs) -> anyhow::Result<()> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&path)?.with_env_overrides();
    let config = apply_args(config, &args);
    let session_config = config.session_config()?;

    let scorer = build_scorer(&config)?;
    let ground_truth = build_ground_truth(&config, &session_config)?;
    let pipeline = Arc::new(ScoringPipeline::new(
        ground_truth,
        &session_config.language,
        &session_config.dialect,
        scorer,
    ));
    let microphone = Arc::new(CpalMicrophone::new(config.audio.device.as_deref()));

    let mut session = AudioSession::new(session_config, microphone, pipeline);
    if args.verbose >= 2 {
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        session = session.with_event_sender(event_tx);
        std::thread::spawn(move || {
            while let Ok(event) = event_rx.recv() {
                eprintln!("uttercut: {:?}", event);
            }
        });
    }

    let quiet = args.quiet;
    let hooks = SessionHooks::new().on_segment(move |segment| {
        if !quiet {
            print_segment(segment);
        }
    });

    if !quiet {
        eprintln!("uttercut: recording (Ctrl-C to stop)");
    }

    let handle = session.start(hooks).await?;
    if args.verbose >= 1 {
        spawn_level_meter(handle.level_watch(), handle.state_watch());
    }

    let mut state_rx = handle.state_watch();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            if !quiet {
                eprintln!("\nuttercut: stopping, waiting for in-flight scoring");
            }
            handle.stop();
        }
        _ = wait_finished(&mut state_rx) => {}
    }

    let segments = handle.wait().await;
    print_summary(&segments);
    Ok(())
}

async fn wait_finished(state_rx: &mut watch::Receiver<SessionState>) {
    while *state_rx.borrow_and_update() != SessionState::Finished {
        if state_rx.changed().await.is_err() {
            break;
        }
    }
}

fn print_segment(segment: &AudioSegment) {
    let score = segment
        .score
        .as_ref()
        .map(|s| format!("{:5.1}", s.overall))
        .unwrap_or_else(|| "   --".to_string());
    let text = segment.validated_transcription.as_deref().unwrap_or("");
    println!(
        "segment {:>2}  +{:>6}ms  {}  {}",
        segment.sequence, segment.offset_ms, score, text
    );
}

fn print_summary(segments: &[AudioSegment]) {
    println!("\n{} segment(s) collected", segments.len());

    let scores: Vec<f32> = segments
        .iter()
        .filter_map(|s| s.score.as_ref().map(|score| score.overall))
        .collect();
    if !scores.is_empty() {
        let average: f32 = scores.iter().sum::<f32>() / scores.len() as f32;
        println!("average score: {:.1} ({} scored)", average, scores.len());
    }

    let transcript = combined_transcription(segments);
    if !transcript.is_empty() {
        println!("transcript: {}", transcript);
    }
}

/// Live level meter on stderr, redrawn until the session finishes.
fn spawn_level_meter(
    level_rx: watch::Receiver<f32>,
    mut state_rx: watch::Receiver<SessionState>,
) {
    tokio::spawn(async move {
        let bar_width = 20usize;
        let mut ticker = tokio::time::interval(Duration::from_millis(100));
        loop {
            ticker.tick().await;
            if *state_rx.borrow_and_update() == SessionState::Finished {
                break;
            }

            let level = *level_rx.borrow();
            let filled = ((level / 0.1).min(1.0) * bar_width as f32) as usize;
            let mut bar = String::with_capacity(bar_width);
            for i in 0..bar_width {
                bar.push(if i < filled { '█' } else { '░' });
            }
            eprint!("\r[{}] {:.3} ", bar, level);
            let _ = io::stderr().flush();
        }
        eprint!("\r{:40}\r", "");
        let _ = io::stderr().flush();
    });
}
