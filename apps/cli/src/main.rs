//! rangedl CLI - segmented and resumable HTTP downloads
//!
//! A thin front end over `rangedl-core`: parses arguments, loads settings,
//! renders progress and prints results.

mod commands;
mod output;
mod progress;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rangedl_core::{default_config_path, SettingsStore};
use rangedl_types::Settings;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// rangedl - parallel range downloader
#[derive(Parser)]
#[command(name = "rangedl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Settings file
    #[arg(long, env = "RANGEDL_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "human", global = true)]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a file in parallel segments
    Get {
        /// URL to download
        url: String,

        /// Output directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Output filename (default: from the server or the URL)
        #[arg(short, long)]
        filename: Option<String>,

        /// Number of segments (default: one per CPU)
        #[arg(short, long)]
        segments: Option<u32>,

        /// Extra request header, `Name: value` (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Expected SHA-256 of the finished file
        #[arg(long)]
        sha256: Option<String>,

        /// Abort on the first failed segment
        #[arg(long)]
        fail_fast: bool,

        /// Speed limit in bytes/sec shared by all segments
        #[arg(long)]
        limit: Option<u64>,
    },

    /// Download over a single connection, resuming a partial file
    Stream {
        /// URL to download, optionally prefixed with `<kbps>:`
        url: String,

        /// Output directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Output filename (default: from the server or the URL)
        #[arg(short, long)]
        filename: Option<String>,

        /// Extra request header, `Name: value` (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Speed limit in kilobytes/sec
        #[arg(long)]
        limit_kbps: Option<u64>,
    },

    /// Probe URLs for size, filename and range support
    Probe {
        /// URLs to probe
        urls: Vec<String>,

        /// Extra request header, `Name: value` (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },

    /// Show/update settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key
        key: String,
    },

    /// Set a config value
    Set {
        /// Config key
        key: String,

        /// Config value
        value: String,
    },

    /// Show all config
    Show,

    /// Print the settings file location
    Path,

    /// Reset to defaults
    Reset {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli.config.unwrap_or_else(default_config_path);
    // `config path` and `config reset` must work even with a broken file.
    if let Commands::Config { action } = cli.command {
        return commands::config_action(&config_path, action, cli.output).await;
    }

    let settings = Settings::load(&config_path).await?;
    tracing::debug!("Loaded settings from {:?}", config_path);

    match cli.command {
        Commands::Get {
            url,
            output_dir,
            filename,
            segments,
            headers,
            sha256,
            fail_fast,
            limit,
        } => {
            let args = commands::GetArgs {
                url,
                output_dir,
                filename,
                segments,
                headers,
                sha256,
                fail_fast,
                limit,
            };
            commands::get(settings, args, cli.output).await?
        }

        Commands::Stream {
            url,
            output_dir,
            filename,
            headers,
            limit_kbps,
        } => {
            let args = commands::StreamArgs {
                url,
                output_dir,
                filename,
                headers,
                limit_kbps,
            };
            commands::stream(settings, args, cli.output).await?
        }

        Commands::Probe { urls, headers } => {
            commands::probe_urls(settings, urls, headers, cli.output).await?
        }

        Commands::Config { .. } => {}

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            clap_complete::generate(shell, &mut Cli::command(), "rangedl", &mut std::io::stdout());
        }
    }

    Ok(())
}
