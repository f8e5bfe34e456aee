//! Configuration view and validation commands: `pmo config`.

use anyhow::Result;

use pmo::config::{PmoConfig, PmoToml};

use super::super::ConfigCommands;

pub fn cmd_config(config: &PmoConfig, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = &config.config_path;

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("PMO Configuration");
            println!("=================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No pmo.toml found at {} (using defaults)", config_path.display());
            }
            println!();

            let toml = &config.toml;
            println!("[server]");
            println!("  host = \"{}\"", toml.server.host);
            println!("  port = {}", toml.server.port);
            println!("  cors = {}", toml.server.cors);
            println!();
            println!("[database]");
            println!("  path = \"{}\"", toml.database.path.display());
            println!();
            println!("[auth]");
            println!("  jwt_secret = \"<redacted>\"");
            println!("  token_ttl = \"{}\"", toml.auth.token_ttl);
            println!("  bcrypt_cost = {}", toml.auth.bcrypt_cost);
            println!();
            println!("[logging]");
            println!("  level = \"{}\"", toml.logging.level);
            println!("  format = \"{}\"", toml.logging.format);
            if let Some(dir) = &toml.logging.directory {
                println!("  directory = \"{}\"", dir.display());
            }
            println!();
            println!("Effective values include environment and .env overrides.");
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No pmo.toml found. Using defaults.");
            }

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("pmo.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            if let Some(parent) = config_path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }

            PmoToml::default().save(config_path)?;

            println!("Created pmo.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] host, port, cors");
            println!("  - [auth] jwt_secret, token_ttl, bcrypt_cost");
            println!("  - [logging] level, format, directory");
            println!();
        }
    }

    Ok(())
}
