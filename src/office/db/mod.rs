//! SQLite storage for the PMO toolbox.
//!
//! `PmoDb` owns a single connection; entity queries live in one submodule
//! per table group, each adding an `impl PmoDb` block.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, ErrorCode, Row, params_from_iter};

use crate::errors::PmoError;

mod companies;
mod dashboard;
mod departments;
mod issues;
mod plans;
mod projects;
mod systems;
mod users;

pub use companies::{CompanyPatch, NewCompany};
pub use departments::{DepartmentPatch, NewDepartment};
pub use issues::{IssuePatch, NewIssue};
pub use plans::{MilestonePatch, NewDetailPlan, NewMilestone};
pub use projects::{NewProject, PROJECT_MANAGER_ROLE, ProjectPatch};
pub use systems::{INITIAL_SYSTEM_STATUS, NewSystem, SystemPatch};
pub use users::NewUser;

/// Async-safe handle to the database.
///
/// Wraps `PmoDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O
/// never ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<PmoDb>>,
}

impl DbHandle {
    pub fn new(db: PmoDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&PmoDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| PmoError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Only for startup tasks
    /// and tests, never from a request path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, PmoDb>> {
        self.inner
            .lock()
            .map_err(|_| anyhow::Error::from(PmoError::LockPoisoned))
    }
}

pub struct PmoDb {
    conn: Connection,
}

impl PmoDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.register_functions()
            .context("Failed to register SQL functions")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    /// `unicode_lower(x)`: SQLite's built-in `lower()` only folds ASCII.
    fn register_functions(&self) -> Result<()> {
        self.conn.create_scalar_function(
            "unicode_lower",
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let value: Option<String> = ctx.get(0)?;
                Ok(value.map(|s| s.to_lowercase()))
            },
        )?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS companies (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    code TEXT NOT NULL UNIQUE,
                    contact_name TEXT,
                    contact_phone TEXT,
                    contact_email TEXT,
                    address TEXT,
                    description TEXT,
                    status TEXT NOT NULL DEFAULT 'active',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS departments (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    parent_id TEXT REFERENCES departments(id) ON DELETE RESTRICT,
                    sort_order INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    email TEXT NOT NULL UNIQUE,
                    password_hash TEXT NOT NULL,
                    name TEXT NOT NULL,
                    role TEXT NOT NULL DEFAULT 'MEMBER',
                    department_id TEXT REFERENCES departments(id) ON DELETE SET NULL,
                    company_id TEXT REFERENCES companies(id) ON DELETE SET NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS business_systems (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    code TEXT NOT NULL UNIQUE,
                    purpose TEXT,
                    is_product INTEGER NOT NULL DEFAULT 0,
                    department TEXT,
                    description TEXT,
                    status TEXT NOT NULL DEFAULT 'ACTIVE',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS projects (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    code TEXT NOT NULL UNIQUE,
                    status TEXT NOT NULL DEFAULT 'PLANNING',
                    description TEXT,
                    start_date TEXT,
                    planned_end_date TEXT,
                    actual_end_date TEXT,
                    implementer_id TEXT REFERENCES companies(id) ON DELETE SET NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS project_members (
                    id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL REFERENCES projects(id),
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    role TEXT NOT NULL,
                    join_date TEXT NOT NULL,
                    UNIQUE(project_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS milestones (
                    id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL REFERENCES projects(id),
                    name TEXT NOT NULL,
                    planned_date TEXT NOT NULL,
                    actual_date TEXT,
                    status TEXT NOT NULL DEFAULT 'PENDING',
                    description TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS detail_plans (
                    id TEXT PRIMARY KEY,
                    milestone_id TEXT NOT NULL REFERENCES milestones(id),
                    name TEXT NOT NULL,
                    plan_type TEXT NOT NULL,
                    start_date TEXT NOT NULL,
                    end_date TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'PENDING',
                    description TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS issues (
                    id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL REFERENCES projects(id),
                    title TEXT NOT NULL,
                    description TEXT NOT NULL,
                    issue_type TEXT NOT NULL,
                    priority TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'OPEN',
                    due_date TEXT,
                    resolved_at TEXT,
                    assignee_id TEXT REFERENCES users(id) ON DELETE SET NULL,
                    reporter_id TEXT REFERENCES users(id) ON DELETE SET NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS project_systems (
                    project_id TEXT NOT NULL REFERENCES projects(id),
                    system_id TEXT NOT NULL REFERENCES business_systems(id) ON DELETE CASCADE,
                    PRIMARY KEY (project_id, system_id)
                );

                CREATE INDEX IF NOT EXISTS idx_departments_parent ON departments(parent_id);
                CREATE INDEX IF NOT EXISTS idx_users_department ON users(department_id);
                CREATE INDEX IF NOT EXISTS idx_members_project ON project_members(project_id);
                CREATE INDEX IF NOT EXISTS idx_milestones_project ON milestones(project_id);
                CREATE INDEX IF NOT EXISTS idx_detail_plans_milestone ON detail_plans(milestone_id);
                CREATE INDEX IF NOT EXISTS idx_issues_project ON issues(project_id);
                CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(status);
                CREATE INDEX IF NOT EXISTS idx_project_systems_system ON project_systems(system_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    /// Whether a row with the given id exists in `table`.
    fn exists(&self, table: &str, id: &str) -> Result<bool> {
        let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)", table);
        self.conn
            .query_row(&sql, [id], |row| row.get(0))
            .with_context(|| format!("Failed to check {} existence", table))
    }
}

/// Read a wire enum stored as text.
pub(crate) fn enum_column<E: FromStr<Err = String>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<E> {
    let raw: String = row.get(idx)?;
    E::from_str(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

/// Column assignments for a partial `UPDATE`.
///
/// Column names are always static strings from the calling query code;
/// values go through bound parameters.
#[derive(Default)]
pub(crate) struct Assignments {
    columns: Vec<&'static str>,
    values: Vec<Value>,
}

impl Assignments {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set(&mut self, column: &'static str, value: impl Into<Value>) {
        self.columns.push(column);
        self.values.push(value.into());
    }

    pub(crate) fn set_opt(&mut self, column: &'static str, value: Option<String>) {
        self.set(column, value.map_or(Value::Null, Value::Text));
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Run `UPDATE table SET ... WHERE id = ?`. Returns the affected row count.
    pub(crate) fn apply(mut self, conn: &Connection, table: &str, id: &str) -> Result<usize> {
        if self.columns.is_empty() {
            return Ok(0);
        }
        let set_clause = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, col)| format!("{} = ?{}", col, i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?{}",
            table,
            set_clause,
            self.columns.len() + 1
        );
        self.values.push(Value::Text(id.to_string()));
        conn.execute(&sql, params_from_iter(self.values.iter()))
            .with_context(|| format!("Failed to update {}", table))
    }
}

/// Accumulates `WHERE` conditions and their bound values.
#[derive(Default)]
pub(crate) struct Conditions {
    clauses: Vec<String>,
    values: Vec<Value>,
}

impl Conditions {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// `column = ?`
    pub(crate) fn eq(&mut self, column: &'static str, value: impl Into<Value>) {
        self.values.push(value.into());
        self.clauses.push(format!("{} = ?{}", column, self.values.len()));
    }

    /// Case-insensitive substring match on any of `columns`.
    pub(crate) fn contains_any(&mut self, columns: &[&'static str], needle: &str) {
        self.values.push(Value::Text(needle.to_lowercase()));
        let idx = self.values.len();
        let ors = columns
            .iter()
            .map(|col| format!("instr(unicode_lower({}), ?{}) > 0", col, idx))
            .collect::<Vec<_>>()
            .join(" OR ");
        self.clauses.push(format!("({})", ors));
    }

    pub(crate) fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub(crate) fn values(&self) -> &[Value] {
        &self.values
    }
}

/// Classify SQLite constraint failures the way the API reports them.
pub fn constraint_violation(err: &rusqlite::Error) -> Option<PmoError> {
    let rusqlite::Error::SqliteFailure(failure, _) = err else {
        return None;
    };
    if failure.code != ErrorCode::ConstraintViolation {
        return None;
    }
    let message = match failure.extended_code {
        rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
            "Record already exists, check unique fields"
        }
        rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => "Referenced record does not exist or is still in use",
        _ => "Constraint violation",
    };
    Some(PmoError::Conflict(message.to_string()))
}


/// Seed helpers shared by the storage and API tests.
#[cfg(test)]
pub(crate) mod test_support {
    use anyhow::Result;

    use super::{NewProject, NewUser, PmoDb};
    use crate::office::models::{Project, ProjectStatus, User, UserRole};

    pub(crate) fn seed_user(db: &PmoDb, email: &str, role: UserRole) -> Result<User> {
        let name = email.split('@').next().unwrap_or(email).to_string();
        db.create_user(NewUser {
            email: email.to_string(),
            password_hash: "$2b$04$placeholderhash".to_string(),
            name,
            role,
            department_id: None,
            company_id: None,
        })
    }

    pub(crate) fn seed_project(db: &PmoDb, name: &str, code: &str, creator_id: &str) -> Result<Project> {
        db.create_project(
            NewProject {
                name: name.to_string(),
                code: code.to_string(),
                status: ProjectStatus::Planning,
                description: None,
                start_date: None,
                planned_end_date: None,
                implementer_id: None,
            },
            creator_id,
        )
    }
}
