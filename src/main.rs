use anyhow::Result;
use clap::{Parser, Subcommand};
use prism_cli::transport::cli;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "prism")]
#[command(
    author,
    version = concat!(env!("CARGO_PKG_VERSION"), env!("PRISM_VERSION_SUFFIX")),
    about = "Prism - AI image generation, vision and chat from the terminal",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an image from a text prompt, then describe it
    Image {
        /// What to draw
        prompt: String,

        /// Save the generated image to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip the automatic vision description
        #[arg(long)]
        no_describe: bool,
    },

    /// Describe an existing image (URL, data URL or local file)
    Describe {
        /// Image URL or path
        source: String,
    },

    /// Chat with the assistant
    Chat {
        /// Initial message to send
        message: Option<String>,
    },

    /// Take the typing speed test
    Typing {
        /// Which sample text to use (0-based, wraps around)
        #[arg(short, long, default_value = "0")]
        text: usize,

        /// Submit the result to the local leaderboard under this name
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Show the local typing leaderboard
    Leaderboard {
        /// Remove all entries
        #[arg(long)]
        clear: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "prism_cli=debug,prism=debug"
    } else {
        "prism_cli=info,prism=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Image {
            prompt,
            output,
            no_describe,
        } => {
            tracing::debug!("Generating image for prompt of {} chars", prompt.len());
            cli::run_image(&prompt, output, !no_describe).await?;
        }
        Commands::Describe { source } => {
            cli::run_describe(&source).await?;
        }
        Commands::Chat { message } => {
            cli::run_chat(message).await?;
        }
        Commands::Typing { text, name } => {
            cli::run_typing(text, name).await?;
        }
        Commands::Leaderboard { clear } => {
            cli::run_leaderboard(clear).await?;
        }
    }

    Ok(())
}
