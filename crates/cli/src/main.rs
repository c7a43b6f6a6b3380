//! clipline - command-line front end for the Clipline engine.
//!
//! # Commands
//! - `clipline resolve <project> --at <time>` - nodes active at one instant
//! - `clipline duration <project>` - resolved timeline length
//! - `clipline segments <project>` - audio segments of the timeline
//! - `clipline format <time>` - normalize a time value to clock notation
//! - `clipline export <project> --assets <dir>` - render every frame without
//!   encoding and print a content digest

mod inspect;
mod render;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cl_common::EngineConfig;
use cl_timeline_eval::FormatTimeOptions;
use tracing_subscriber::EnvFilter;

/// Clipline engine CLI
#[derive(Parser)]
#[command(name = "clipline")]
#[command(version, about = "Inspect and dry-run Clipline projects")]
struct Cli {
    /// Engine config file (JSON). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the nodes active at a time
    Resolve {
        /// Project document
        project: PathBuf,

        /// Query time: milliseconds or clock notation (`1:02.5`)
        #[arg(short, long)]
        at: String,

        /// Print JSON instead of an indented tree
        #[arg(long)]
        json: bool,
    },

    /// Print the resolved timeline duration
    Duration {
        /// Project document
        project: PathBuf,
    },

    /// List the audio segments the scheduler would play
    Segments {
        /// Project document
        project: PathBuf,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Normalize a time value to clock notation
    Format {
        /// Milliseconds or clock notation
        time: String,

        /// Always print minutes
        #[arg(long)]
        force_minutes: bool,

        /// Always pad seconds to two digits
        #[arg(long)]
        force_seconds: bool,

        /// Fixed number of fractional digits
        #[arg(short, long)]
        decimals: Option<usize>,
    },

    /// Render every frame of a project without encoding
    Export {
        /// Project document
        project: PathBuf,

        /// Directory media sources are resolved against
        #[arg(short, long)]
        assets: PathBuf,

        /// Skip audio rendering
        #[arg(long)]
        no_audio: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Resolve { project, at, json } => {
            let project = inspect::load_project(&project)?;
            let at = inspect::parse_time_arg(&at)?;
            print!("{}", inspect::describe_activation(&project, at, json)?);
        }
        Commands::Duration { project } => {
            let project = inspect::load_project(&project)?;
            println!("{}", inspect::describe_duration(&project)?);
        }
        Commands::Segments { project, json } => {
            let project = inspect::load_project(&project)?;
            print!("{}", inspect::describe_segments(&project, json)?);
        }
        Commands::Format {
            time,
            force_minutes,
            force_seconds,
            decimals,
        } => {
            let options = FormatTimeOptions {
                force_minutes,
                force_seconds,
                milli_decimal_places: decimals,
            };
            println!("{}", inspect::format_time_arg(&time, &options)?);
        }
        Commands::Export {
            project,
            assets,
            no_audio,
        } => {
            let project = inspect::load_project(&project)?;
            let report = render::dry_run(project, &assets, &config, !no_audio)?;
            println!("{report}");
        }
    }
    Ok(())
}
