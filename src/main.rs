use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

use pmo::config::PmoConfig;

#[derive(Parser)]
#[command(name = "pmo")]
#[command(version, about = "PMO toolbox - project and organization administration backend")]
pub struct Cli {
    /// Log at debug level (RUST_LOG still wins)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to pmo.toml
    #[arg(long, global = true, env = "PMO_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server with the embedded admin UI
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Interface to bind
        #[arg(long)]
        host: Option<String>,

        /// SQLite database file
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Open the browser once the server is up
        #[arg(long)]
        open: bool,
    },
    /// Create the database file and apply migrations
    InitDb {
        /// SQLite database file
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// View, validate or create pmo.toml
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Create a user directly in the database (e.g. the first admin)
    CreateUser {
        #[arg(long)]
        email: String,

        #[arg(long)]
        name: String,

        #[arg(long)]
        password: String,

        /// ADMIN, MANAGER or MEMBER
        #[arg(long, default_value = "MEMBER")]
        role: String,

        /// SQLite database file
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate the configuration file
    Validate,
    /// Create a default pmo.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = PmoConfig::load(cli.config.as_deref())?;
    if cli.verbose {
        config.toml.logging.level = "debug".to_string();
    }

    match cli.command {
        Commands::Serve {
            port,
            host,
            db_path,
            open,
        } => {
            let config = config.with_overrides(host, port, db_path);
            let _guard = pmo::logging::init(&config.toml.logging)?;
            cmd::cmd_serve(&config, open).await?;
        }
        Commands::InitDb { db_path } => {
            let config = config.with_overrides(None, None, db_path);
            cmd::cmd_init_db(&config)?;
        }
        Commands::Config { command } => cmd::cmd_config(&config, command)?,
        Commands::CreateUser {
            email,
            name,
            password,
            role,
            db_path,
        } => {
            let config = config.with_overrides(None, None, db_path);
            cmd::cmd_create_user(&config, &email, &name, &password, &role)?;
        }
    }

    Ok(())
}
