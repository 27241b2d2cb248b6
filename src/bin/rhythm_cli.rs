use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rhythm_trainer::audio::{InstrumentKind, SampleLoader, VoiceOutput};
use rhythm_trainer::config::{AppConfig, DeliveryStrategy};
use rhythm_trainer::engine::backend::{self, AudioDevice, StubAudioDevice};
use rhythm_trainer::engine::Player;
use rhythm_trainer::playback::{
    gesture_channel, DisplaySink, DisplaySlot, Gesture, GestureChannel, PlayerRequest, SyncOutcome,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "rhythm_cli",
    about = "Play chord progressions with a metronome and a beat display"
)]
struct Cli {
    /// Player configuration (defaults to assets/player_config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play a progression until it ends or Ctrl-C is pressed
    Play(PlayArgs),
    /// Play a single note on one instrument
    Preview(PreviewArgs),
    /// Print the effective configuration as JSON
    DumpConfig,
}

#[derive(Args, Debug)]
struct PlayArgs {
    /// Chord symbols, one per measure (e.g. C Am F G7)
    #[arg(required_unless_present = "request")]
    chords: Vec<String>,
    /// Full player request as JSON instead of chord symbols
    #[arg(long, conflicts_with = "chords")]
    request: Option<PathBuf>,
    #[arg(long, default_value_t = 100.0)]
    bpm: f64,
    #[arg(long, default_value_t = 4)]
    beats: u32,
    #[arg(long, value_enum, default_value_t = DeviceArg::Cpal)]
    device: DeviceArg,
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,
    /// Wait for Enter before unlocking audio, like a browser tap
    #[arg(long)]
    restricted: bool,
    /// Emit host events and the telemetry snapshot as JSON lines
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct PreviewArgs {
    #[arg(long, default_value = "C2")]
    note: String,
    #[arg(long, value_enum, default_value_t = InstrumentArg::Bass)]
    instrument: InstrumentArg,
    #[arg(long, default_value_t = 1.0)]
    duration: f64,
    #[arg(long, default_value_t = 0.8)]
    gain: f32,
    #[arg(long, value_enum, default_value_t = DeviceArg::Cpal)]
    device: DeviceArg,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum DeviceArg {
    /// System output through cpal
    Cpal,
    /// Silent virtual device
    Stub,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum StrategyArg {
    Native,
    Deferred,
}

impl From<StrategyArg> for DeliveryStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Native => DeliveryStrategy::Native,
            StrategyArg::Deferred => DeliveryStrategy::Deferred,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum InstrumentArg {
    Bass,
    Percussion,
}

impl From<InstrumentArg> for InstrumentKind {
    fn from(arg: InstrumentArg) -> Self {
        match arg {
            InstrumentArg::Bass => InstrumentKind::Bass,
            InstrumentArg::Percussion => InstrumentKind::Percussion,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path),
        None => AppConfig::load(),
    };

    match cli.command {
        Command::Play(args) => run_play(config, args).await,
        Command::Preview(args) => run_preview(config, args).await,
        Command::DumpConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_player<D>(
    device: Arc<D>,
    config: AppConfig,
    sink: Arc<dyn DisplaySink>,
    gestures: Option<GestureChannel>,
) -> Player
where
    D: AudioDevice + VoiceOutput + 'static,
{
    let output: Arc<dyn VoiceOutput> = device.clone();
    let loader = Arc::new(SampleLoader::new(output));
    let mut builder = Player::builder(device, loader, sink).config(config);
    if let Some(gestures) = gestures {
        builder = builder.gestures(Box::new(gestures));
    }
    builder.build()
}

fn player_for(
    device: DeviceArg,
    config: AppConfig,
    sink: Arc<dyn DisplaySink>,
    gestures: Option<GestureChannel>,
) -> Player {
    match device {
        DeviceArg::Cpal => build_player(backend::default_device(), config, sink, gestures),
        DeviceArg::Stub => build_player(Arc::new(StubAudioDevice::new()), config, sink, gestures),
    }
}

async fn run_play(mut config: AppConfig, args: PlayArgs) -> Result<ExitCode> {
    if let Some(strategy) = args.strategy {
        config.scheduler.strategy = strategy.into();
    }
    if args.restricted {
        config.platform.restricted_audio = Some(true);
    }

    let request = match &args.request {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            PlayerRequest::from_json(&raw)?
        }
        None => PlayerRequest::from_chord_labels(&args.chords, args.bpm, args.beats, &config.playback)?,
    };

    let sink: Arc<dyn DisplaySink> = if args.json {
        Arc::new(SilentSink)
    } else {
        Arc::new(ConsoleSink::default())
    };

    let gestures = if args.restricted {
        let (tx, gestures) = gesture_channel();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(_)) = lines.next_line().await {
                if tx.send(Gesture::PointerUp).is_err() {
                    break;
                }
            }
        });
        eprintln!("Press Enter to start");
        Some(gestures)
    } else {
        None
    };

    let player = Arc::new(player_for(args.device, config, sink, gestures));

    let json = args.json;
    let mut host_events = BroadcastStream::new(player.subscribe_host_events());
    let printer = tokio::spawn(async move {
        while let Some(event) = host_events.next().await {
            let Ok(event) = event else { continue };
            if json {
                if let Ok(line) = serde_json::to_string(&event) {
                    println!("{line}");
                }
            } else {
                tracing::info!(?event, "host event");
            }
        }
    });

    tokio::spawn({
        let player = Arc::clone(&player);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                if let Err(err) = player.stop() {
                    tracing::warn!("stop on Ctrl-C: {}", err);
                }
            }
        }
    });

    let outcome = player.init_player(request).await;
    printer.abort();

    if json {
        println!("{}", serde_json::to_string(&player.telemetry().snapshot())?);
    } else {
        println!();
    }

    match outcome {
        Ok(SyncOutcome::Completed) => Ok(ExitCode::SUCCESS),
        Ok(SyncOutcome::Cancelled) => Ok(ExitCode::from(130)),
        Err(err) => Err(err.into()),
    }
}

async fn run_preview(config: AppConfig, args: PreviewArgs) -> Result<ExitCode> {
    let sink: Arc<dyn DisplaySink> = Arc::new(SilentSink);
    let player = player_for(args.device, config, sink, None);
    player
        .play_note(&args.note, args.duration, args.gain, args.instrument.into())
        .await?;
    // keep the process alive until the note has rung out
    tokio::time::sleep(std::time::Duration::from_secs_f64(args.duration + 0.1)).await;
    Ok(ExitCode::SUCCESS)
}

struct SilentSink;

impl DisplaySink for SilentSink {
    fn set_text(&self, _slot: DisplaySlot, _text: &str) {}
    fn set_style(&self, _slot: DisplaySlot, _property: &str, _value: &str) {}
}

#[derive(Default)]
struct ConsoleState {
    beat: String,
    chords: [String; 4],
    countdown: String,
    loading: String,
}

/// Renders the display slots as one status line on stdout.
#[derive(Default)]
struct ConsoleSink {
    state: Mutex<ConsoleState>,
}

impl ConsoleSink {
    fn redraw(state: &ConsoleState) {
        let line = if !state.countdown.is_empty() {
            format!("count-in {}", state.countdown)
        } else if !state.loading.is_empty() && state.beat.is_empty() {
            state.loading.clone()
        } else {
            let upcoming: Vec<&str> = state.chords[1..]
                .iter()
                .map(String::as_str)
                .filter(|chord| !chord.is_empty())
                .collect();
            format!("{}   {:<6} | {}", state.beat, state.chords[0], upcoming.join(" "))
        };
        let mut stdout = std::io::stdout().lock();
        let _ = write!(stdout, "\r\x1b[2K{line}");
        let _ = stdout.flush();
    }
}

impl DisplaySink for ConsoleSink {
    fn set_text(&self, slot: DisplaySlot, text: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let text = text.to_string();
        match slot {
            DisplaySlot::BeatIndicator => state.beat = text,
            DisplaySlot::CurrentChord => state.chords[0] = text,
            DisplaySlot::NextChord1 => state.chords[1] = text,
            DisplaySlot::NextChord2 => state.chords[2] = text,
            DisplaySlot::NextChord3 => state.chords[3] = text,
            DisplaySlot::Countdown => state.countdown = text,
            DisplaySlot::LoadingText => state.loading = text,
            DisplaySlot::LoadingOverlay => return,
        }
        Self::redraw(&state);
    }

    fn set_style(&self, slot: DisplaySlot, property: &str, value: &str) {
        if slot == DisplaySlot::LoadingOverlay && property == "display" && value == "none" {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.loading.clear();
        }
    }
}
