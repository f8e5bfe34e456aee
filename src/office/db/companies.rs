use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params, params_from_iter};

use super::{Assignments, Conditions, PmoDb};
use crate::errors::PmoError;
use crate::office::models::{Company, CompanySummary, SearchFilter};
use crate::office::validate::{new_id, now_timestamp};

const COMPANY_COLUMNS: &str = "id, name, code, contact_name, contact_phone, contact_email, \
                               address, description, status, created_at, updated_at";

#[derive(Debug, Clone, Default)]
pub struct NewCompany {
    pub name: String,
    pub code: String,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
}

/// Partial update; `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default)]
pub struct CompanyPatch {
    pub name: Option<String>,
    pub code: Option<String>,
    pub contact_name: Option<Option<String>>,
    pub contact_phone: Option<Option<String>>,
    pub contact_email: Option<Option<String>>,
    pub address: Option<Option<String>>,
    pub description: Option<Option<String>>,
    pub status: Option<String>,
}

fn company_from_row(row: &Row<'_>) -> rusqlite::Result<Company> {
    Ok(Company {
        id: row.get(0)?,
        name: row.get(1)?,
        code: row.get(2)?,
        contact_name: row.get(3)?,
        contact_phone: row.get(4)?,
        contact_email: row.get(5)?,
        address: row.get(6)?,
        description: row.get(7)?,
        status: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

impl PmoDb {
    // ── Company CRUD ──────────────────────────────────────────────────

    pub fn create_company(&self, new: NewCompany) -> Result<Company> {
        let id = new_id();
        let now = now_timestamp();
        self.conn
            .execute(
                "INSERT INTO companies (id, name, code, contact_name, contact_phone, contact_email,
                                        address, description, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                params![
                    id,
                    new.name,
                    new.code,
                    new.contact_name,
                    new.contact_phone,
                    new.contact_email,
                    new.address,
                    new.description,
                    new.status.unwrap_or_else(|| "active".to_string()),
                    now,
                ],
            )
            .context("Failed to insert company")?;
        self.get_company(&id)?
            .context("Company not found after insert")
    }

    /// Newest first, optionally filtered by status and name/code substring.
    pub fn list_companies(&self, filter: &SearchFilter) -> Result<Vec<Company>> {
        let mut conditions = Conditions::new();
        if let Some(status) = &filter.status {
            conditions.eq("status", status.clone());
        }
        if let Some(search) = &filter.search {
            conditions.contains_any(&["name", "code"], search);
        }
        let sql = format!(
            "SELECT {} FROM companies{} ORDER BY created_at DESC, rowid DESC",
            COMPANY_COLUMNS,
            conditions.where_clause()
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_companies")?;
        let rows = stmt
            .query_map(params_from_iter(conditions.values().iter()), company_from_row)
            .context("Failed to query companies")?;
        let mut companies = Vec::new();
        for row in rows {
            companies.push(row.context("Failed to read company row")?);
        }
        Ok(companies)
    }

    pub fn get_company(&self, id: &str) -> Result<Option<Company>> {
        let sql = format!("SELECT {} FROM companies WHERE id = ?1", COMPANY_COLUMNS);
        self.conn
            .query_row(&sql, [id], company_from_row)
            .optional()
            .context("Failed to query company")
    }

    pub(crate) fn get_company_summary(&self, id: &str) -> Result<Option<CompanySummary>> {
        self.conn
            .query_row(
                "SELECT id, name, code FROM companies WHERE id = ?1",
                [id],
                |row| {
                    Ok(CompanySummary {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        code: row.get(2)?,
                    })
                },
            )
            .optional()
            .context("Failed to query company summary")
    }

    pub fn update_company(&self, id: &str, patch: CompanyPatch) -> Result<Company> {
        if !self.exists("companies", id)? {
            return Err(PmoError::not_found("Company", id).into());
        }
        let mut set = Assignments::new();
        if let Some(name) = patch.name {
            set.set("name", name);
        }
        if let Some(code) = patch.code {
            set.set("code", code);
        }
        if let Some(v) = patch.contact_name {
            set.set_opt("contact_name", v);
        }
        if let Some(v) = patch.contact_phone {
            set.set_opt("contact_phone", v);
        }
        if let Some(v) = patch.contact_email {
            set.set_opt("contact_email", v);
        }
        if let Some(v) = patch.address {
            set.set_opt("address", v);
        }
        if let Some(v) = patch.description {
            set.set_opt("description", v);
        }
        if let Some(status) = patch.status {
            set.set("status", status);
        }
        if !set.is_empty() {
            set.set("updated_at", now_timestamp());
            set.apply(&self.conn, "companies", id)?;
        }
        self.get_company(id)?
            .context("Company not found after update")
    }

    /// Projects lose their implementer and users their company.
    pub fn delete_company(&self, id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM companies WHERE id = ?1", params![id])
            .context("Failed to delete company")?;
        Ok(count > 0)
    }
}
