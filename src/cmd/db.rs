//! Database bootstrap commands: `pmo init-db` and `pmo create-user`.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, bail};

use pmo::config::PmoConfig;
use pmo::office::auth::hash_password;
use pmo::office::db::{NewUser, PmoDb};
use pmo::office::models::UserRole;
use pmo::office::validate::is_valid_email;

fn open_db(path: &Path) -> Result<PmoDb> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    PmoDb::new(path)
}

pub fn cmd_init_db(config: &PmoConfig) -> Result<()> {
    let path = &config.toml.database.path;
    open_db(path)?;
    println!("PMO database initialized at {}", path.display());
    Ok(())
}

pub fn cmd_create_user(
    config: &PmoConfig,
    email: &str,
    name: &str,
    password: &str,
    role: &str,
) -> Result<()> {
    let email = email.trim().to_lowercase();
    if !is_valid_email(&email) {
        bail!("Invalid email: {}", email);
    }
    if name.trim().is_empty() {
        bail!("Name must not be empty");
    }
    if password.chars().count() < 6 {
        bail!("Password must be at least 6 characters");
    }
    let role = UserRole::from_str(&role.to_uppercase()).map_err(anyhow::Error::msg)?;

    let db = open_db(&config.toml.database.path)?;
    let password_hash = hash_password(password, config.toml.auth.bcrypt_cost)?;
    let user = db.create_user(NewUser {
        email,
        password_hash,
        name: name.trim().to_string(),
        role,
        department_id: None,
        company_id: None,
    })?;

    println!("Created {} user {} ({})", user.role, user.email, user.id);
    Ok(())
}
