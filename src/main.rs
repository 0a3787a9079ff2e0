use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod agent;
mod analysis;
mod commands;
mod config;
mod detect;
mod env;
mod error;
mod messages;
mod orchestrator;
mod prompt;
mod runner;
mod sandbox;
mod sanitize;

#[derive(Parser)]
#[command(name = "ferry")]
#[command(
    author,
    version,
    about = "Sandboxed streaming bridge for CLI coding agents"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one completion and stream the sanitized output to stdout
    Run {
        /// Messages file: a JSON array of {role, content} ('-' for stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Shortcut: a single user prompt instead of a messages file
        #[arg(short, long, conflicts_with = "input")]
        prompt: Option<String>,

        /// Model override for this request
        #[arg(short, long)]
        model: Option<String>,

        /// Skip detection and force XML format enforcement
        #[arg(long)]
        force_format: bool,

        /// Image file(s) to analyze and splice into the conversation
        #[arg(long = "image")]
        images: Vec<PathBuf>,
    },

    /// Print the format-requirement verdict for a conversation
    Detect {
        /// Messages file: a JSON array of {role, content} ('-' for stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Shortcut: a single user prompt instead of a messages file
        #[arg(short, long, conflicts_with = "input")]
        prompt: Option<String>,

        /// Strategy override: cascade or confidence
        #[arg(short, long)]
        strategy: Option<String>,
    },

    /// Verify the configured agent binary responds
    Check {
        /// Provider override: claude, gemini, or qwen
        #[arg(long)]
        provider: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging. Diagnostics go to stderr; stdout carries only
    // the streamed completion text.
    let filter = if cli.verbose {
        EnvFilter::new("ferry=debug")
    } else {
        EnvFilter::new("ferry=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Run {
            input,
            prompt,
            model,
            force_format,
            images,
        } => {
            commands::run::run(input, prompt, model, force_format, images).await?;
        }
        Commands::Detect {
            input,
            prompt,
            strategy,
        } => {
            commands::detect::run(input, prompt, strategy).await?;
        }
        Commands::Check { provider } => {
            commands::check::run(provider).await?;
        }
    }

    Ok(())
}
