pub mod commands;
pub mod config;
pub mod find_cmd;
pub mod server;

use clap::Parser;
use config::Config;

/// wash presents heterogeneous infrastructure as a single hierarchical
/// namespace, addressable through filesystem-flavored commands and a
/// query-capable find.
#[derive(Debug, Parser)]
#[command(author, name = "wash", version, rename_all = "kebab-case")]
pub struct Cli {
    /// Logging filter, e.g. "info" or "wash=debug".
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Subcommand)]
#[command(rename_all = "kebab-case")]
pub enum Command {
    /// Start the wash daemon: load plugins and serve the API.
    Server(server::ServerArgs),
    /// List the children of a path.
    List(commands::ListArgs),
    /// Print entry details for each path.
    Info(commands::InfoArgs),
    /// Print an entry's full metadata.
    Meta(commands::MetaArgs),
    /// Delete entries.
    Rm(commands::RmArgs),
    /// Walk the tree, printing entries that match an expression.
    Find(find_cmd::FindArgs),
    /// Render a path's schema as a tree.
    Stree(commands::StreeArgs),
}

pub fn init_logging(filter: &str) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_new(filter)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Runs a subcommand. The boolean mirrors find(1)-style exit codes:
/// false means at least one path failed.
pub async fn run(command: Command) -> anyhow::Result<bool> {
    let config = Config::load()?;
    match command {
        Command::Server(args) => {
            server::run(args, config).await?;
            Ok(true)
        }
        command => {
            let client = api::Client::new(config.socket_path());
            match command {
                Command::List(args) => commands::list(&client, args).await,
                Command::Info(args) => commands::info(&client, args).await,
                Command::Meta(args) => commands::meta(&client, args).await,
                Command::Rm(args) => commands::rm(&client, args).await,
                Command::Find(args) => find_cmd::run(&client, args).await,
                Command::Stree(args) => commands::stree(&client, args).await,
                Command::Server(_) => unreachable!("handled above"),
            }
        }
    }
}
