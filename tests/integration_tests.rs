//! Integration tests for the pmo CLI
//!
//! These run the compiled binary against temporary directories.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a pmo Command isolated from the caller's environment
fn pmo(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("pmo");
    cmd.current_dir(dir.path())
        .env_remove("PMO_CONFIG")
        .env_remove("PMO_HOST")
        .env_remove("PORT")
        .env_remove("DATABASE_PATH")
        .env_remove("JWT_SECRET")
        .env_remove("JWT_EXPIRES_IN")
        .env_remove("RUST_LOG");
    cmd
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_pmo_help() {
        let dir = TempDir::new().unwrap();
        pmo(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("create-user"));
    }

    #[test]
    fn test_pmo_version() {
        let dir = TempDir::new().unwrap();
        pmo(&dir)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_unknown_subcommand_fails() {
        let dir = TempDir::new().unwrap();
        pmo(&dir).arg("frobnicate").assert().failure();
    }
}

// =============================================================================
// Config Tests
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();
        pmo(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created pmo.toml"));

        let content = fs::read_to_string(dir.path().join("pmo.toml")).unwrap();
        assert!(content.contains("[server]"));
        assert!(content.contains("port = 3002"));
    }

    #[test]
    fn test_config_init_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pmo.toml"), "[server]\nport = 9000\n").unwrap();
        pmo(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
        let content = fs::read_to_string(dir.path().join("pmo.toml")).unwrap();
        assert!(content.contains("9000"));
    }

    #[test]
    fn test_config_show_reads_file_and_redacts_secret() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("pmo.toml"),
            "[server]\nport = 9000\n\n[auth]\njwt_secret = \"super-secret-value\"\n",
        )
        .unwrap();
        pmo(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 9000"))
            .stdout(predicate::str::contains("<redacted>"))
            .stdout(predicate::str::contains("super-secret-value").not());
    }

    #[test]
    fn test_config_show_env_override() {
        let dir = TempDir::new().unwrap();
        pmo(&dir)
            .args(["config", "show"])
            .env("PORT", "4100")
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 4100"));
    }

    #[test]
    fn test_config_validate_warns_about_default_secret() {
        let dir = TempDir::new().unwrap();
        pmo(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("jwt_secret"));
    }

    #[test]
    fn test_config_validate_clean_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("pmo.toml"),
            "[auth]\njwt_secret = \"a-real-secret\"\ntoken_ttl = \"12h\"\nbcrypt_cost = 8\n",
        )
        .unwrap();
        pmo(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }

    #[test]
    fn test_config_validate_warns_about_unknown_log_format() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pmo.toml"), "[logging]\nformat = \"xml\"\n").unwrap();
        pmo(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Invalid log format 'xml'"));
    }

    #[test]
    fn test_explicit_config_path() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("etc")).unwrap();
        fs::write(dir.path().join("etc/custom.toml"), "[server]\nport = 7007\n").unwrap();
        pmo(&dir)
            .args(["--config", "etc/custom.toml", "config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 7007"));
    }

    #[test]
    fn test_malformed_config_fails() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pmo.toml"), "[server\nport = ").unwrap();
        pmo(&dir)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to parse pmo.toml"));
    }
}

// =============================================================================
// Database Bootstrap Tests
// =============================================================================

mod database {
    use super::*;

    #[test]
    fn test_init_db_creates_file() {
        let dir = TempDir::new().unwrap();
        pmo(&dir)
            .args(["init-db", "--db-path", "data/pmo.db"])
            .assert()
            .success()
            .stdout(predicate::str::contains("PMO database initialized"));
        assert!(dir.path().join("data/pmo.db").exists());
    }

    #[test]
    fn test_init_db_is_idempotent() {
        let dir = TempDir::new().unwrap();
        for _ in 0..2 {
            pmo(&dir).arg("init-db").assert().success();
        }
        assert!(dir.path().join(".pmo/pmo.db").exists());
    }

    #[test]
    fn test_create_user_and_duplicate() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pmo.toml"), "[auth]\nbcrypt_cost = 4\n").unwrap();
        let args = [
            "create-user",
            "--email",
            "Admin@Example.com",
            "--name",
            "Admin",
            "--password",
            "secret1",
            "--role",
            "admin",
        ];

        pmo(&dir)
            .args(args)
            .assert()
            .success()
            .stdout(predicate::str::contains("Created ADMIN user admin@example.com"));

        pmo(&dir)
            .args(args)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Email already registered"));
    }

    #[test]
    fn test_create_user_rejects_bad_input() {
        let dir = TempDir::new().unwrap();
        pmo(&dir)
            .args([
                "create-user", "--email", "nope", "--name", "X", "--password", "secret1",
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid email"));

        pmo(&dir)
            .args([
                "create-user", "--email", "x@example.com", "--name", "X", "--password", "123",
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains("at least 6 characters"));

        pmo(&dir)
            .args([
                "create-user", "--email", "x@example.com", "--name", "X", "--password",
                "secret1", "--role", "owner",
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid role"));
    }
}
