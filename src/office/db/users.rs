use std::str::FromStr;

use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::PmoDb;
use crate::errors::PmoError;
use crate::office::models::{User, UserRole};
use crate::office::validate::{new_id, now_timestamp};

const USER_COLUMNS: &str =
    "id, email, password_hash, name, role, department_id, company_id, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub role: UserRole,
    pub department_id: Option<String>,
    pub company_id: Option<String>,
}

/// Intermediate row struct; `role` is parsed in `into_user`.
struct UserRow {
    id: String,
    email: String,
    password_hash: String,
    name: String,
    role: String,
    department_id: Option<String>,
    company_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl UserRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            password_hash: row.get(2)?,
            name: row.get(3)?,
            role: row.get(4)?,
            department_id: row.get(5)?,
            company_id: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_user(self) -> Result<User> {
        let role = UserRole::from_str(&self.role)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse user role")?;
        Ok(User {
            id: self.id,
            email: self.email,
            password_hash: self.password_hash,
            name: self.name,
            role,
            department_id: self.department_id,
            company_id: self.company_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl PmoDb {
    // ── User CRUD ─────────────────────────────────────────────────────

    /// Insert a user. A taken email is reported as a conflict.
    pub fn create_user(&self, new: NewUser) -> Result<User> {
        if self.find_user_by_email(&new.email)?.is_some() {
            return Err(PmoError::Conflict("Email already registered".into()).into());
        }
        let id = new_id();
        let now = now_timestamp();
        self.conn
            .execute(
                "INSERT INTO users (id, email, password_hash, name, role, department_id, company_id,
                                    created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    id,
                    new.email,
                    new.password_hash,
                    new.name,
                    new.role.as_str(),
                    new.department_id,
                    new.company_id,
                    now,
                ],
            )
            .context("Failed to insert user")?;
        self.get_user(&id)?.context("User not found after insert")
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, [id], UserRow::from_row)
            .optional()
            .context("Failed to query user")?;
        row.map(UserRow::into_user).transpose()
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, [email], UserRow::from_row)
            .optional()
            .context("Failed to query user by email")?;
        row.map(UserRow::into_user).transpose()
    }

    /// All users ordered by name.
    pub fn list_users(&self) -> Result<Vec<User>> {
        self.query_users(
            &format!("SELECT {} FROM users ORDER BY name, email", USER_COLUMNS),
            params![],
        )
    }

    pub(crate) fn list_users_in_department(&self, department_id: &str) -> Result<Vec<User>> {
        self.query_users(
            &format!(
                "SELECT {} FROM users WHERE department_id = ?1 ORDER BY name, email",
                USER_COLUMNS
            ),
            params![department_id],
        )
    }

    fn query_users(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<User>> {
        let mut stmt = self.conn.prepare(sql).context("Failed to prepare user query")?;
        let rows = stmt
            .query_map(params, UserRow::from_row)
            .context("Failed to query users")?;
        let mut users = Vec::new();
        for row in rows {
            let r = row.context("Failed to read user row")?;
            users.push(r.into_user()?);
        }
        Ok(users)
    }
}
