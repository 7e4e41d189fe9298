use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use ratewatch::core::log::init_logging;
use ratewatch::{AppCommand, SubscriberCommand};
use rust_decimal::Decimal;
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Run the monitor until interrupted
    Run {
        /// Keep rates and subscribers in memory only
        #[arg(long)]
        ephemeral: bool,
    },
    /// Fetch and store current rates
    Ingest,
    /// Evaluate thresholds and send alerts
    Check,
    /// Send the daily report to every enabled subscriber
    Digest,
    /// Delete rates older than the retention period
    Prune,
    /// Display the latest rates
    Rates,
    /// Display stored rates for a currency
    History {
        currency: String,
        /// Source id; defaults to the default subscriber source
        #[arg(short, long)]
        source: Option<String>,
        #[arg(short, long, default_value_t = 7)]
        days: u32,
    },
    /// Manage subscribers
    #[command(subcommand)]
    Subscriber(SubscriberCommands),
}

#[derive(Subcommand)]
enum SubscriberCommands {
    /// Register a subscriber with default settings
    Add { id: String },
    /// Display a subscriber's settings
    Show { id: String },
    /// List all subscribers
    List,
    /// Set the alert threshold in percent (0.1 to 50)
    Threshold { id: String, value: Decimal },
    /// Set the watched currency
    Currency { id: String, code: String },
    /// Set the rate source
    Source { id: String, source: String },
    /// Turn alerts on
    Enable { id: String },
    /// Turn alerts off
    Disable { id: String },
}

impl From<SubscriberCommands> for SubscriberCommand {
    fn from(cmd: SubscriberCommands) -> SubscriberCommand {
        match cmd {
            SubscriberCommands::Add { id } => SubscriberCommand::Add(id),
            SubscriberCommands::Show { id } => SubscriberCommand::Show(id),
            SubscriberCommands::List => SubscriberCommand::List,
            SubscriberCommands::Threshold { id, value } => SubscriberCommand::Threshold { id, value },
            SubscriberCommands::Currency { id, code } => SubscriberCommand::Currency { id, code },
            SubscriberCommands::Source { id, source } => SubscriberCommand::Source { id, source },
            SubscriberCommands::Enable { id } => SubscriberCommand::Enable(id),
            SubscriberCommands::Disable { id } => SubscriberCommand::Disable(id),
        }
    }
}

impl From<Commands> for AppCommand {
    fn from(cmd: Commands) -> AppCommand {
        match cmd {
            Commands::Run { ephemeral } => AppCommand::Run { ephemeral },
            Commands::Ingest => AppCommand::Ingest,
            Commands::Check => AppCommand::Check,
            Commands::Digest => AppCommand::Digest,
            Commands::Prune => AppCommand::Prune,
            Commands::Rates => AppCommand::Rates,
            Commands::History {
                currency,
                source,
                days,
            } => AppCommand::History {
                currency,
                source,
                days,
            },
            Commands::Subscriber(sub) => AppCommand::Subscriber(sub.into()),
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let floor = match cli.command {
        Some(Commands::Run { .. }) => LevelFilter::INFO,
        _ => LevelFilter::OFF,
    };
    init_logging(cli.verbose, floor);

    let result = match cli.command {
        Some(Commands::Setup) => ratewatch::cli::setup::setup(),
        Some(cmd) => ratewatch::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
