//! vidsqueeze
//! Shrinks videos with ffmpeg using resolution-aware quality presets.

mod compression;
mod config;
mod error;
mod policy;
mod report;
mod types;
mod video;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rust_i18n::t;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode, WriteLogger};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use compression::{CompressionJob, Compressor};
use config::AppConfig;
use error::CompressError;
use report::ProgressDisplay;
use types::{QualityMode, ResolutionChoice, SourceVideo, Variant, APP_NAME, APP_VERSION};

rust_i18n::i18n!("locales", fallback = "en");

/// Compress videos with ffmpeg using resolution-aware presets.
#[derive(Parser, Debug)]
#[command(name = "vidsqueeze", author, version, about)]
struct Cli {
    /// Write a debug log to debug.log
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compress a video
    Compress {
        #[command(flatten)]
        encode: EncodeArgs,
        /// Open the compressed file when done
        #[arg(long)]
        open: bool,
    },
    /// Show the ffmpeg arguments a compression would use
    Plan {
        #[command(flatten)]
        encode: EncodeArgs,
        /// Print parameters and arguments as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show video info and the available resolutions
    Probe {
        /// Video file
        input: PathBuf,
    },
    /// Write a default settings.json in the current directory
    InitConfig,
}

#[derive(Args, Debug)]
struct EncodeArgs {
    /// Video file
    input: PathBuf,

    /// Output file (default: compressed_<name>.mp4)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Target resolution: auto, original, custom, or WIDTHxHEIGHT
    #[arg(short, long, default_value = "auto")]
    resolution: String,

    /// Width for --resolution custom
    #[arg(long)]
    width: Option<u32>,

    /// Height for --resolution custom
    #[arg(long)]
    height: Option<u32>,

    /// Quality mode (default from settings.json)
    #[arg(short, long, value_enum)]
    quality_mode: Option<QualityMode>,

    /// Quality factor for manual mode, 0-51 (lower is better)
    #[arg(long)]
    crf: Option<u32>,

    /// x264 speed preset, e.g. ultrafast, fast, medium, slow
    #[arg(short, long)]
    preset: Option<String>,

    /// Audio bitrate, e.g. 128k
    #[arg(long)]
    audio_bitrate: Option<String>,

    /// Compressor flavour (default from settings.json)
    #[arg(long, value_enum)]
    variant: Option<Variant>,
}

/// Everything derived for a request before ffmpeg runs
struct Plan {
    source: SourceVideo,
    mode: QualityMode,
    job: CompressionJob,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug)?;
    log::debug!("Starting {} {} with {:?}", APP_NAME, APP_VERSION, cli.command);

    let config = AppConfig::load()?;
    rust_i18n::set_locale(&config.language);

    match cli.command {
        Commands::Compress { encode, open } => run_compress(&encode, &config, open).await,
        Commands::Plan { encode, json } => run_plan(&encode, &config, json).await,
        Commands::Probe { input } => run_probe(&input).await,
        Commands::InitConfig => {
            let path = AppConfig::create_default()?;
            println!("{}", t!("cli.config_written", path = path.display()));
            Ok(())
        }
    }
}

fn init_logging(debug: bool) -> Result<()> {
    if debug {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open("debug.log")
            .context("Failed to open debug.log")?;
        let _ = WriteLogger::init(LevelFilter::Debug, Config::default(), file);
        log::info!("Starting {} with debug logging", APP_NAME);
    } else {
        let _ = TermLogger::init(
            LevelFilter::Warn,
            Config::default(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        );
    }
    Ok(())
}

async fn run_probe(input: &Path) -> Result<()> {
    video::check_dependencies()?;
    let source = video::probe_source(input).await?;

    println!("{}", report::source_info(&source));
    println!();
    let suggested = policy::suggest_closest_resolution(&source);
    println!(
        "{}",
        report::resolution_menu(&policy::resolution_availability(&source), &suggested)
    );
    Ok(())
}

async fn run_plan(args: &EncodeArgs, config: &AppConfig, json: bool) -> Result<()> {
    video::check_dependencies()?;
    let plan = build_plan(args, config).await?;
    let ffmpeg_args = plan.job.arguments();

    if json {
        let output = serde_json::json!({
            "source": plan.source,
            "quality_mode": plan.mode,
            "parameters": plan.job.params,
            "arguments": ffmpeg_args,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", report::source_info(&plan.source));
        println!();
        println!("ffmpeg {}", ffmpeg_args.join(" "));
    }
    Ok(())
}

async fn run_compress(args: &EncodeArgs, config: &AppConfig, open_result: bool) -> Result<()> {
    video::check_dependencies()?;
    let plan = build_plan(args, config).await?;

    println!("{}", report::source_info(&plan.source));
    println!("  {}", plan.mode.tip());
    println!();
    if plan.job.params.upscale_detected {
        log::warn!("Selected resolution is larger than the original video");
        println!("{}", t!("cli.upscale_warning"));
    }

    let compressor = Compressor::default();
    let display = ProgressDisplay::new();
    let outcome = compressor.compress(&plan.job, Some(display.callback())).await;
    display.finish();
    let result = outcome?;

    println!(
        "{}",
        report::compression_stats(&plan.source, &result, plan.mode, &plan.job.params)
    );
    println!();
    println!(
        "{}",
        report::result_info(&result, &plan.job.params, &plan.job.settings.preset)
    );
    println!();
    println!("{}", t!("cli.saved_to", path = plan.job.output.display()));

    if open_result {
        open::that(&plan.job.output)
            .with_context(|| format!("Failed to open {}", plan.job.output.display()))?;
    }
    Ok(())
}

async fn build_plan(args: &EncodeArgs, config: &AppConfig) -> Result<Plan> {
    let variant = args.variant.unwrap_or(config.variant);
    // Basic only knows a manual quality factor
    let requested_mode = args.quality_mode.unwrap_or(config.quality_mode);
    let mode = match variant {
        Variant::Advanced => requested_mode,
        Variant::Basic => QualityMode::Manual,
    };
    let manual_crf = args.crf.unwrap_or(config.manual_crf);

    let mut settings = config.compression_settings();
    if let Some(preset) = &args.preset {
        settings.preset = preset.clone();
    }
    if let Some(bitrate) = &args.audio_bitrate {
        settings.audio_bitrate = bitrate.clone();
    }

    // Validate what we can before touching the file
    let explicit_choice = parse_choice(args)?;

    let source = video::probe_source(&args.input).await?;
    let choice = match explicit_choice {
        Some(choice) => choice,
        None => policy::suggest_closest_resolution(&source),
    };

    let params = policy::build_encoding_parameters(&source, &choice, mode, manual_crf, variant)?;
    let output = output_path(args, config, &source);
    video::ensure_distinct_output(&args.input, &output)?;

    log::info!(
        "Plan for {}: resolution {}, mode {:?}, variant {:?}",
        source.file_name,
        choice,
        mode,
        variant
    );

    Ok(Plan {
        job: CompressionJob {
            input: args.input.clone(),
            output,
            params,
            settings,
            duration_seconds: source.duration_seconds,
        },
        source,
        mode,
    })
}

/// `None` means pick the suggested resolution once the source is known
fn parse_choice(args: &EncodeArgs) -> Result<Option<ResolutionChoice>, CompressError> {
    match args.resolution.trim().to_ascii_lowercase().as_str() {
        "auto" => Ok(None),
        "custom" => {
            let (width, height) = args.width.zip(args.height).ok_or_else(|| {
                CompressError::Validation(t!("errors.custom_needs_size").into_owned())
            })?;
            ResolutionChoice::custom(width, height).map(Some)
        }
        other => other.parse().map(Some),
    }
}

fn output_path(args: &EncodeArgs, config: &AppConfig, source: &SourceVideo) -> PathBuf {
    if let Some(output) = &args.output {
        return output.clone();
    }
    let name = video::output_file_name(&source.file_name);
    match &config.output_dir {
        Some(dir) => PathBuf::from(dir).join(name),
        None => args
            .input
            .parent()
            .map(|parent| parent.join(&name))
            .unwrap_or_else(|| PathBuf::from(&name)),
    }
}
