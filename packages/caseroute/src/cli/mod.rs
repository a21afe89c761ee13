mod report;

use crate::{
    config::{LogConfig, LogFormat, LogLevel, DEFAULT_CONFIG_FILE_PATH},
    connect,
    error::Error,
    log::DEVELOPMENT,
    store,
    sweeper::Sweeper,
    Router, RouterConfig,
};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

pub use report::Report;

#[derive(Clone, Debug, Parser)]
#[command(version, about, verbatim_doc_comment)]
///
/// Case router
///
/// Routes unclaimed patient cases to eligible doctors and expires abandoned temporary claims.
/// Without a command, runs the expiry sweeper until interrupted.
///
pub struct Args {
    /// Optional path to a configuration file.
    ///
    /// Default is "caseroute.toml".
    /// Configuration is loaded from this file, if present.
    /// Environment variables are used instead of the file or to override any values defined in the file.
    #[arg(short = 'p', long, default_value = DEFAULT_CONFIG_FILE_PATH, verbatim_doc_comment, global = true)]
    pub config_file_path: String,

    ///
    /// Optional log level.
    ///
    #[arg(short, long, value_enum, default_value_t = LogConfig::default_log_level(), env = "CR_LOG__LEVEL", global = true)]
    pub log_level: LogLevel,

    ///
    /// Optional log format. Default level is "pretty" if running in a terminal session, otherwise "structured".
    ///
    #[arg(short='f', long, value_enum, default_value_t = LogConfig::default_log_format(), env = "CR_LOG__FORMAT", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Commands {
    /// Run a single sweep over expired claims and print the report
    Sweep,

    /// Create or update the database schema
    Schema,

    /// Print queue reports as JSON
    #[command(subcommand)]
    Report(Report),
}

///
/// Runs command specified in command line
/// Returns Ok(true) if the caller should exit
///
pub async fn run(args: &Args, config: &RouterConfig) -> Result<bool, Error> {
    let Some(command) = &args.command else {
        return Ok(false);
    };

    debug!(target: DEVELOPMENT, ?command);

    let mut client = connect::database_with_retry(config).await?;

    match command {
        Commands::Schema => {
            store::apply_schema(&mut client).await?;
            info!(msg = "Schema applied", database = config.database.name);
        }
        Commands::Sweep => {
            let router = Router::init(&client, Default::default(), config.claim.clone()).await?;
            let sweeper = Sweeper::new(config.sweeper.clone(), router);

            let report = sweeper.sweep_once(&mut client).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Report(report) => {
            let router = Router::init(&client, Default::default(), config.claim.clone()).await?;
            report.run(&router, &client).await?;
        }
    }

    Ok(true)
}
