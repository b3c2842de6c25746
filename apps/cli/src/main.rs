//! Pek CLI - Command-line front end for a Pek progressive clustering server
//!
//! Provides the `pek` command: inspect the server, fetch dataset attributes and
//! run an ensemble while streaming its partial results.

mod commands;
mod config;

use clap::{CommandFactory, Parser, Subcommand};
use commands::{dataset, info, run};
use pek_client::DatasetKey;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Pek CLI - progressive ensemble clustering client
#[derive(Parser, Debug)]
#[command(name = "pek", author, version, about = "Pek - progressive ensemble k-means client")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn", global = true)]
    log_level: String,

    /// Server URL (overrides PEK_SERVER_URL and config files)
    #[arg(short, long, global = true)]
    server: Option<String>,

    /// Configuration file to use instead of ~/.pek/config.toml and ./.pekrc
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the client id, server version and available datasets
    Info {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Fetch one attribute of a dataset and print it as JSON
    Dataset {
        /// Dataset name
        name: String,

        /// Attribute (features, original, scaled, isomap, mds, pca, tsne, umap)
        key: DatasetKey,
    },

    /// Start a clustering task and stream its partial results
    ///
    /// Runs until the server reports completion. Ctrl-C kills the task.
    Run(run::RunArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(());
    };

    let client_config = config::load_config(args.config.as_deref(), args.server)?;

    match command {
        Command::Info { json } => info::execute(client_config, json).await,
        Command::Dataset { name, key } => dataset::execute(client_config, &name, key).await,
        Command::Run(run_args) => run::execute(client_config, run_args).await,
    }
}
