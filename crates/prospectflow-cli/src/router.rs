//! Command routing and dispatch

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use prospectflow_config::{ConfigError, ConfigManager, ConfigManagerTrait};
use prospectflow_workflows::{SessionStatus, WorkflowStep};
use tracing::debug;

use crate::commands::*;
use crate::error::CliResult;

/// ProspectFlow - guided prospect enrichment workflows
#[derive(Parser, Debug)]
#[command(name = "prospectflow")]
#[command(bin_name = "prospectflow")]
#[command(about = "Inspect and maintain ProspectFlow workflow sessions")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (default: platform config dir)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// View and validate configuration
    Config {
        #[command(subcommand)]
        action: ConfigSubcommand,
    },

    /// Browse workflow sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsSubcommand,
    },

    /// Inspect and maintain persisted workflow state
    State {
        #[command(subcommand)]
        action: StateSubcommand,
    },

    /// Run a demo workflow against a simulated enrichment provider
    Simulate {
        /// Number of prospects to enrich
        #[arg(short, long, default_value_t = 5)]
        prospects: usize,

        /// Make every Nth prospect fail to store
        #[arg(long, value_name = "N")]
        fail_every: Option<usize>,

        /// Owning user session
        #[arg(long, default_value = "demo-user")]
        user: String,

        /// Start jobs without the configured inter-request delay
        #[arg(long)]
        no_delay: bool,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Print the effective configuration
    Show,
    /// Check the configuration and report problems
    Validate,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SessionsSubcommand {
    /// List sessions, newest first
    List {
        /// Only sessions of this user
        #[arg(long)]
        user: Option<String>,

        /// Only sessions with this status (active, paused, ...)
        #[arg(long)]
        status: Option<SessionStatus>,

        /// Only sessions on this step (upload_csv, ...)
        #[arg(long)]
        step: Option<WorkflowStep>,

        /// Sessions to skip
        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Maximum sessions to show
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Show aggregate statistics
    Stats {
        /// Only sessions created in the last N days
        #[arg(long, value_name = "N")]
        days: Option<u32>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum StateSubcommand {
    /// Show a compact summary of a state
    Summary {
        /// Session id
        session_id: String,
    },
    /// Show the checkpoint log
    History {
        /// Session id
        session_id: String,
    },
    /// Export a state as JSON
    Export {
        /// Session id
        session_id: String,

        /// Write to a file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Import an exported state
    Import {
        /// Session id to import under
        session_id: String,

        /// Exported JSON file
        file: PathBuf,
    },
    /// Delete states not updated for a while
    Cleanup {
        /// Age threshold in days (default: configured retention)
        #[arg(long, value_name = "N")]
        days: Option<u32>,
    },
}

/// Command router
pub struct CommandRouter;

impl CommandRouter {
    /// Parse the process arguments and run the command
    pub async fn route() -> CliResult<()> {
        let cli = Cli::parse();
        Self::execute(cli).await
    }

    /// Run a parsed command line
    pub async fn execute(cli: Cli) -> CliResult<()> {
        let mut manager = match &cli.config {
            Some(path) => ConfigManager::with_path(path.clone()),
            None => ConfigManager::new(),
        };
        let config_path = manager.config_path().to_path_buf();

        // Validation reports load failures itself
        if let Commands::Config {
            action: ConfigSubcommand::Validate,
        } = &cli.command
        {
            return ConfigCommand::validate(&mut manager, cli.json);
        }

        let config = manager.load_config()?;
        // A subscriber may already be installed when embedded
        match prospectflow_config::init_logging(&config.logging) {
            Ok(()) => {}
            Err(ConfigError::SubscriberInstalled(reason)) => {
                debug!("Keeping existing tracing subscriber: {}", reason);
            }
            Err(e) => return Err(e.into()),
        }

        let context = CommandContext::new(config, config_path, cli.json);
        let command: Box<dyn Command> = match cli.command {
            Commands::Config { .. } => Box::new(ConfigCommand),
            Commands::Sessions { action } => Box::new(SessionsCommand::new(match action {
                SessionsSubcommand::List {
                    user,
                    status,
                    step,
                    offset,
                    limit,
                } => SessionsAction::List {
                    user,
                    status,
                    step,
                    offset,
                    limit,
                },
                SessionsSubcommand::Stats { days } => SessionsAction::Stats { days },
            })),
            Commands::State { action } => Box::new(StateCommand::new(match action {
                StateSubcommand::Summary { session_id } => StateAction::Summary { session_id },
                StateSubcommand::History { session_id } => StateAction::History { session_id },
                StateSubcommand::Export { session_id, output } => {
                    StateAction::Export { session_id, output }
                }
                StateSubcommand::Import { session_id, file } => {
                    StateAction::Import { session_id, file }
                }
                StateSubcommand::Cleanup { days } => StateAction::Cleanup { days },
            })),
            Commands::Simulate {
                prospects,
                fail_every,
                user,
                no_delay,
            } => Box::new(SimulateCommand::new(SimulateOptions {
                prospects,
                fail_every,
                user,
                no_delay,
            })),
        };

        command.execute(&context).await
    }
}
