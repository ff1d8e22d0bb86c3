use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

mod commands;
mod config;
mod session;

use commands::*;

#[derive(Parser)]
#[command(version, about = "Drive contactless signing card sessions against a simulated card")]
struct Cli {
    /// Configuration file (defaults to ./tapcard.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Debug level output
    #[arg(short, long)]
    verbose: bool,

    /// Milliseconds before the simulated card is presented
    #[arg(long)]
    tap_delay_ms: Option<u64>,

    /// Drop the first tap after this many card commands
    #[arg(long)]
    drop_after: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read the master extended public key
    Derive {
        /// Card PIN
        #[arg(long)]
        pin: String,
    },

    /// Export an encrypted backup of the master key
    Backup {
        /// Card PIN
        #[arg(long)]
        pin: String,

        /// Directory the backup file is written to
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },

    /// Sign a PSBT
    Sign {
        /// Card PIN
        #[arg(long)]
        pin: String,

        /// PSBT as a hex string
        #[arg(required = true)]
        psbt: String,
    },

    /// Change the card PIN
    ChangePin {
        /// Current PIN
        #[arg(long)]
        current: String,

        /// New PIN
        #[arg(long)]
        new: String,
    },

    /// Set up a fresh card: initialise, back up, read the key and set the PIN
    Setup {
        /// PIN printed on the card
        #[arg(long)]
        factory_pin: String,

        /// PIN to set once setup completes
        #[arg(long)]
        new_pin: String,

        /// Chain code in hex (random if not specified)
        #[arg(long)]
        chain_code: Option<String>,

        /// Directory to write the backup file to
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let mut config = config::load_config(cli.config.as_deref())?;
    if let Some(delay) = cli.tap_delay_ms {
        config.simulator.tap_delay_ms = delay;
    }
    if cli.drop_after.is_some() {
        config.simulator.drop_after = cli.drop_after;
    }

    let fresh = matches!(cli.command, Commands::Setup { .. });
    let orchestrator = session::build_orchestrator(&config, fresh)?;
    let printer = session::spawn_progress_printer(&orchestrator);
    info!(timeout = ?config.session.tag_timeout, "Waiting for a card");

    let result = match &cli.command {
        Commands::Derive { pin } => derive_command(&orchestrator, pin).await,
        Commands::Backup { pin, out } => backup_command(&orchestrator, pin, out).await,
        Commands::Sign { pin, psbt } => sign_command(&orchestrator, pin, psbt).await,
        Commands::ChangePin { current, new } => {
            change_pin_command(&orchestrator, current, new).await
        }
        Commands::Setup {
            factory_pin,
            new_pin,
            chain_code,
            out,
        } => {
            setup_command(
                &orchestrator,
                factory_pin,
                new_pin,
                chain_code.as_deref(),
                out.as_deref(),
            )
            .await
        }
    };

    printer.abort();
    result
}

fn setup_logging(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(verbose))
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .init();
}

/// `RUST_LOG` if set, otherwise everything at the default level
fn log_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(verbose).to_string()))
}

const fn default_level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    }
}
