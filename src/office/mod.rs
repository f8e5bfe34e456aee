//! PMO toolbox back-end: REST API over SQLite plus the embedded admin UI.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │  (React) │ <─────── │    ├─ request_tracing.rs  (http.request span)    │
//! └──────────┘          │    ├─ auth.rs  (JWT bearer middleware, bcrypt)   │
//!                       │    └─ api/  (route handlers, AppState, ApiError) │
//!                       │         │                                        │
//!                       │         │ DbHandle::call(|db| ...)               │
//!                       │         v                                        │
//!                       │  db/  (PmoDb: one module per entity)             │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module      | Responsibility                                            |
//! |-------------|-----------------------------------------------------------|
//! | `models`    | Entities, wire enums, filters and dashboard views         |
//! | `validate`  | Field validation collecting every error, date/UUID checks |
//! | `tree`      | Department forest builder and reparent cycle check        |
//! | `embedded`  | Statically embeds the compiled admin UI (`rust-embed`)    |
//!
//! ## Typical Request Flow (create an issue)
//!
//! 1. `POST /api/issues` passes `request_tracing`, then `auth::require_auth`
//!    which verifies the bearer token and loads the caller as `CurrentUser`.
//! 2. `api::issues::create_issue` validates the body with `Validator`,
//!    answering 400 with every field error at once.
//! 3. `PmoDb::create_issue` runs on a blocking thread, checks the project
//!    exists and inserts the row.
//! 4. Domain failures travel as `PmoError` inside `anyhow::Error` and are
//!    mapped to status codes by `ApiError`.

pub mod api;
pub mod auth;
pub mod db;
pub mod embedded;
pub mod models;
pub mod request_tracing;
pub mod server;
pub mod tree;
pub mod validate;
