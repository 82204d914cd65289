//! slimg CLI: drive the optimization and estimation core on local files.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use slimg::{
    estimate, optimize_image, CompressionGate, OptimizationConfig, Preset, Settings,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Format-aware image optimization and size estimation")]
struct Cli {
    /// Write logs to this directory as well as stderr
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Optimize an image file in place or to a new path
    Optimize {
        input: PathBuf,

        /// Output path (defaults to stdout summary only, no write)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Quality 1-100, lower is more aggressive
        #[arg(short, long)]
        quality: Option<u8>,

        /// Named preset: high, medium or low
        #[arg(short, long, conflicts_with = "quality")]
        preset: Option<String>,

        /// Keep all metadata instead of stripping to orientation + ICC
        #[arg(long)]
        keep_metadata: bool,

        /// Emit progressive JPEG
        #[arg(long)]
        progressive: bool,

        /// Forbid lossy PNG palette quantization
        #[arg(long)]
        png_lossless: bool,

        /// Cap lossy reduction at this percentage
        #[arg(long)]
        max_reduction: Option<f32>,
    },
    /// Estimate compression savings without writing anything
    Estimate {
        input: PathBuf,

        #[arg(short, long)]
        quality: Option<u8>,

        #[arg(short, long, conflicts_with = "quality")]
        preset: Option<String>,
    },
    /// Report which external encoders are available
    Tools,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = slimg::logging::LogConfig::default();
    if let Some(dir) = &cli.log_dir {
        log_config = log_config.with_log_dir(dir);
    }
    let _guard = slimg::logging::init_logging("slimg", log_config)?;

    let settings = Settings::from_env();

    match cli.command {
        Command::Optimize {
            input,
            output,
            quality,
            preset,
            keep_metadata,
            progressive,
            png_lossless,
            max_reduction,
        } => {
            let mut config = build_config(quality, preset)?;
            config.strip_metadata = !keep_metadata;
            config.progressive_jpeg = progressive;
            if png_lossless {
                config.png_lossy = false;
            }
            if let Some(cap) = max_reduction {
                config = config.with_max_reduction(cap)?;
            }

            let data = std::fs::read(&input)
                .with_context(|| format!("failed to read {}", input.display()))?;
            settings.check_file_size(data.len())?;

            let gate = CompressionGate::from_settings(&settings);
            let result = optimize_image(&data, &config, &gate).await?;

            info!(
                format = %result.format,
                method = %result.method,
                original = result.original_size,
                optimized = result.optimized_size,
                reduction = result.reduction_percent,
                "optimization complete"
            );
            println!("{}", serde_json::to_string_pretty(&result)?);

            if let Some(out_path) = output {
                std::fs::write(&out_path, &result.optimized_bytes)
                    .with_context(|| format!("failed to write {}", out_path.display()))?;
            }
        }
        Command::Estimate {
            input,
            quality,
            preset,
        } => {
            let config = build_config(quality, preset)?;
            let data = std::fs::read(&input)
                .with_context(|| format!("failed to read {}", input.display()))?;
            settings.check_file_size(data.len())?;

            let response = estimate(&data, &config).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Tools => {
            println!(
                "{}",
                serde_json::to_string_pretty(slimg::tools::available_tools())?
            );
        }
    }

    Ok(())
}

fn build_config(quality: Option<u8>, preset: Option<String>) -> Result<OptimizationConfig> {
    match (quality, preset) {
        (Some(q), _) => Ok(OptimizationConfig::new(q)?),
        (None, Some(p)) => Ok(p.parse::<Preset>()?.config()),
        (None, None) => Ok(OptimizationConfig::default()),
    }
}
