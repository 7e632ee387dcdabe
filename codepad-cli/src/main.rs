//! # codepad CLI
//!
//! Command-line host for codepad learner programs.

mod commands;
mod report;

use clap::{Parser, Subcommand};
use codepad_types::Variant;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "codepad")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "codepad.yml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter codepad.yml
    Init {
        /// Target directory (defaults to current directory)
        path: Option<PathBuf>,
    },

    /// Run a program once in a sandbox and print what it produced
    Run {
        /// Program file (JavaScript, or HTML for the page variant)
        file: PathBuf,

        /// Sandbox variant (canvas, console, page); guessed from the extension when omitted
        #[arg(long)]
        variant: Option<Variant>,

        /// Virtual milliseconds to run after the program starts
        #[arg(long = "for", default_value_t = 1000)]
        duration_ms: u64,

        /// Press a key at a virtual time, e.g. ArrowUp@100 (repeatable)
        #[arg(long = "press", value_name = "KEY@MS")]
        presses: Vec<String>,

        /// How long each pressed key stays held
        #[arg(long, default_value_t = 50)]
        hold: u64,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,

        /// Write the final canvas as SVG
        #[arg(long, value_name = "OUT")]
        svg: Option<PathBuf>,
    },

    /// Re-run a program every time the file changes
    Watch {
        /// Program file to watch
        file: PathBuf,

        /// Sandbox variant (canvas, console, page)
        #[arg(long)]
        variant: Option<Variant>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize tracing
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(if cli.verbose {
                tracing::Level::DEBUG.into()
            } else {
                tracing::Level::INFO.into()
            }),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init { path } => {
            commands::init_project(path.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            file,
            variant,
            duration_ms,
            presses,
            hold,
            json,
            svg,
        } => {
            let opts = commands::RunOptions {
                variant,
                duration_ms,
                presses,
                hold_ms: hold,
                json,
                svg,
            };
            commands::run_file(&cli.config, &file, opts)
        }
        Commands::Watch { file, variant } => {
            commands::watch_file(&cli.config, &file, variant).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
