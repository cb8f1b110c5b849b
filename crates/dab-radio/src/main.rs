mod banner;
mod build_info;
mod input;
mod logging;
mod loopback;
mod module;
mod output;
mod shutdown;
mod state;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use dab_core::config::RadioConfig;
use dab_core::params::{DabParameters, TransmissionMode};
use input::SoftBitFormat;
use module::DabModule;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "dab-radio",
    version,
    about = "Decode DAB soft-bit frames into a mixed PCM stream."
)]
struct Cli {
    /// Enable debug logging for dab_radio and dab_core (RUST_LOG overrides)
    #[arg(long, global = true)]
    debug: bool,

    /// Also write daily rotated logs to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Write logs to ./logs (ignored when --log-dir is given)
    #[arg(long, global = true)]
    log_to_file: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Decode a soft-bit frame stream and write s16 stereo PCM
    Run(RunArgs),
    /// Generate a scrambled test-tone frame stream for `run`
    Synth(SynthArgs),
    /// Persistently enable the module
    Enable(StateArgs),
    /// Persistently disable the module
    Disable(StateArgs),
    /// Print build information as JSON
    BuildInfo,
}

#[derive(Debug, Args)]
struct StateArgs {
    /// Module state file
    #[arg(long, default_value = "dab-radio.state.json")]
    state: PathBuf,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Soft-bit input file (`-` for stdin)
    #[arg(short, long, default_value = "-")]
    input: PathBuf,

    /// PCM output file (`-` for stdout)
    #[arg(short, long, default_value = "-")]
    output: PathBuf,

    /// JSON radio configuration; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured transmission mode (1-4)
    #[arg(long)]
    mode: Option<u8>,

    #[arg(long, value_enum, default_value_t = SoftBitFormat::S8)]
    format: SoftBitFormat,

    /// Submit frames as fast as they can be read instead of one per frame period
    #[arg(long)]
    no_pace: bool,

    /// Enable the module (and persist that) before running
    #[arg(long)]
    enable: bool,

    /// Seconds between status lines
    #[arg(long, default_value_t = 5)]
    status_interval_secs: u64,

    #[command(flatten)]
    state: StateArgs,
}

#[derive(Debug, Args)]
struct SynthArgs {
    /// Output file (`-` for stdout)
    #[arg(short, long, default_value = "-")]
    output: PathBuf,

    /// Transmission mode (1-4)
    #[arg(long, default_value_t = 1)]
    mode: u8,

    /// Number of frames to generate
    #[arg(long, default_value_t = 100)]
    frames: usize,

    #[arg(long, default_value_t = 1000.0)]
    tone_hz: f32,

    /// Tone amplitude in [0, 1]
    #[arg(long, default_value_t = 0.5)]
    amplitude: f32,

    /// Peak of uniform noise added to each soft bit
    #[arg(long, default_value_t = 40)]
    noise: i16,

    #[arg(long, default_value_t = 1)]
    seed: u64,

    #[arg(long, value_enum, default_value_t = SoftBitFormat::S8)]
    format: SoftBitFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guards = logging::init(&logging::LoggingConfig {
        debug: cli.debug,
        log_dir: cli
            .log_dir
            .clone()
            .or_else(|| cli.log_to_file.then(logging::default_log_dir)),
        ..logging::LoggingConfig::default()
    })?;

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Synth(args) => tokio::task::spawn_blocking(move || synth(args))
            .await
            .context("synth task")?,
        Command::Enable(args) => set_enabled(&args.state, true),
        Command::Disable(args) => set_enabled(&args.state, false),
        Command::BuildInfo => {
            let info = serde_json::to_string_pretty(&build_info::collect())
                .context("serialize build info")?;
            println!("{info}");
            Ok(())
        }
    }
}

fn transmission_mode(n: u8) -> anyhow::Result<TransmissionMode> {
    TransmissionMode::from_number(n)
        .with_context(|| format!("unknown transmission mode {n} (expected 1-4)"))
}

fn set_enabled(state: &Path, is_enabled: bool) -> anyhow::Result<()> {
    let mut module = DabModule::new(RadioConfig::default(), state)?;
    module.set_enabled(is_enabled)
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    banner::log_startup_banner();

    let mut config = match &args.config {
        Some(path) => dab_core::config::load_from_file(path)?,
        None => RadioConfig::default(),
    };
    if let Some(n) = args.mode {
        config.transmission_mode = transmission_mode(n)?;
    }

    let mut module = DabModule::new(config, &args.state.state)?;
    if args.enable {
        module.set_enabled(true)?;
    }
    anyhow::ensure!(
        module.is_enabled(),
        "module is disabled in {} (run `dab-radio enable` or pass --enable)",
        args.state.state.display()
    );

    let (output, output_name) = output::create(&args.output)?;
    let (reader, input_name) = input::open(&args.input)?;
    let radio = module.start(output, output_name.clone())?;
    tracing::info!(input = %input_name, output = %output_name, format = ?args.format, "running");

    let format = args.format;
    let pace = !args.no_pace;
    let mut pump =
        tokio::task::spawn_blocking(move || module::pump_frames(&radio, reader, format, pace));

    let shutdown = shutdown::shutdown_signal();
    tokio::pin!(shutdown);
    let mut status = tokio::time::interval(Duration::from_secs(args.status_interval_secs.max(1)));
    status.tick().await;

    let mut is_stopping = false;
    let pumped = loop {
        tokio::select! {
            res = &mut pump => break res.context("input task")?,
            // The pump notices the flag at its next frame boundary.
            _ = &mut shutdown, if !is_stopping => is_stopping = true,
            _ = status.tick() => {
                module.render();
            }
        }
    };

    let grace = if shutdown::is_shutdown_requested() {
        Duration::ZERO
    } else {
        Duration::from_secs(5)
    };
    let stopping = tokio::task::spawn_blocking(move || {
        module.stop(grace);
    });
    stopping.await.context("stop task")?;

    let frames = pumped?;
    tracing::info!(frames, "done");
    Ok(())
}

fn synth(args: SynthArgs) -> anyhow::Result<()> {
    let params = DabParameters::for_mode(transmission_mode(args.mode)?);
    let mut synth = loopback::ToneSynth::new(
        params,
        args.tone_hz,
        args.amplitude,
        args.noise,
        args.seed,
    );
    let (mut out, name) = output::create(&args.output)?;

    let mut frame = Vec::new();
    for _ in 0..args.frames {
        synth.next_frame(&mut frame);
        input::write_soft_bits(&mut *out, &frame, args.format)?;
    }
    out.flush().with_context(|| format!("flush {name}"))?;

    tracing::info!(
        output = %name,
        frames = args.frames,
        mode = params.mode.number(),
        pcm_rate = synth.sample_rate(),
        "synthesised"
    );
    Ok(())
}
