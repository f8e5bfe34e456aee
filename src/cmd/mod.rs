//! CLI command implementations.
//!
//! | Module   | Commands handled          |
//! |----------|---------------------------|
//! | `serve`  | `Serve`                   |
//! | `db`     | `InitDb`, `CreateUser`    |
//! | `config` | `Config`                  |

pub mod config;
pub mod db;
pub mod serve;

pub use config::cmd_config;
pub use db::{cmd_create_user, cmd_init_db};
pub use serve::cmd_serve;
