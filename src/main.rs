// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "stereo-camera")]
#[command(about = "Synchronized stereo photo and video capture on a dual-lens camera")]
#[command(version = stereo_camera::constants::app_info::version())]
struct Cli {
    /// Output root (default: ~/Pictures/stereo-camera)
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Settings file (default: ~/.config/stereo-camera/settings.json)
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    /// Simulated lens rig to drive
    #[arg(long, global = true, value_enum, default_value = "pixel")]
    rig: RigPreset,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum RigPreset {
    /// Handheld phone with ultrawide, wide and a 2x crop lens
    Pixel,
    /// Landscape stereo rig without a 2x lens
    Landscape,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved lens rig and negotiated sizes
    Rig,

    /// Take stereo photos
    Photo {
        /// Capture RAW instead of JPEG
        #[arg(short, long)]
        raw: bool,

        /// Number of stereo pairs to capture
        #[arg(short, long, default_value = "1")]
        count: u32,
    },

    /// Record a dual-lens video
    Video {
        /// Recording duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,
    },

    /// Switch to the 2x wide lens and take one stereo photo
    Zoom,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=stereo_camera=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let options = cli::CliOptions {
        output: cli.output,
        settings: cli.settings,
        rig: cli.rig,
    };

    match cli.command {
        Commands::Rig => cli::show_rig(&options),
        Commands::Photo { raw, count } => cli::take_photos(&options, raw, count),
        Commands::Video { duration } => cli::record_video(&options, duration),
        Commands::Zoom => cli::zoom_photo(&options),
    }
}
