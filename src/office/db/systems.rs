use std::collections::HashMap;

use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params, params_from_iter};

use super::{Assignments, Conditions, PmoDb};
use crate::errors::PmoError;
use crate::office::models::{BusinessSystem, BusinessSystemWithProjects, ProjectSummary, SearchFilter};
use crate::office::validate::{new_id, now_timestamp};

const SYSTEM_COLUMNS: &str =
    "id, name, code, purpose, is_product, department, description, status, created_at, updated_at";

/// Status every new system starts in, whatever the request says.
pub const INITIAL_SYSTEM_STATUS: &str = "ACTIVE";

#[derive(Debug, Clone, Default)]
pub struct NewSystem {
    pub name: String,
    pub code: String,
    pub purpose: Option<String>,
    pub is_product: bool,
    pub department: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SystemPatch {
    pub name: Option<String>,
    pub code: Option<String>,
    pub purpose: Option<Option<String>>,
    pub is_product: Option<bool>,
    pub department: Option<Option<String>>,
    pub description: Option<Option<String>>,
    pub status: Option<String>,
}

fn system_from_row(row: &Row<'_>) -> rusqlite::Result<BusinessSystem> {
    Ok(BusinessSystem {
        id: row.get(0)?,
        name: row.get(1)?,
        code: row.get(2)?,
        purpose: row.get(3)?,
        is_product: row.get(4)?,
        department: row.get(5)?,
        description: row.get(6)?,
        status: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

impl PmoDb {
    // ── Business system CRUD ──────────────────────────────────────────

    pub fn create_system(&self, new: NewSystem) -> Result<BusinessSystem> {
        let id = new_id();
        let now = now_timestamp();
        self.conn
            .execute(
                "INSERT INTO business_systems (id, name, code, purpose, is_product, department,
                                               description, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                params![
                    id,
                    new.name,
                    new.code,
                    new.purpose,
                    new.is_product,
                    new.department,
                    new.description,
                    INITIAL_SYSTEM_STATUS,
                    now,
                ],
            )
            .context("Failed to insert business system")?;
        self.get_system(&id)?
            .context("Business system not found after insert")
    }

    pub fn list_systems(&self, filter: &SearchFilter) -> Result<Vec<BusinessSystemWithProjects>> {
        let mut conditions = Conditions::new();
        if let Some(status) = &filter.status {
            conditions.eq("status", status.clone());
        }
        if let Some(search) = &filter.search {
            conditions.contains_any(&["name", "code"], search);
        }
        let sql = format!(
            "SELECT {} FROM business_systems{} ORDER BY created_at DESC, rowid DESC",
            SYSTEM_COLUMNS,
            conditions.where_clause()
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_systems")?;
        let rows = stmt
            .query_map(params_from_iter(conditions.values().iter()), system_from_row)
            .context("Failed to query business systems")?;
        let mut systems = Vec::new();
        for row in rows {
            systems.push(row.context("Failed to read business system row")?);
        }

        let mut projects_by_system = self.system_project_links()?;
        Ok(systems
            .into_iter()
            .map(|system| BusinessSystemWithProjects {
                projects: projects_by_system.remove(&system.id).unwrap_or_default(),
                system,
            })
            .collect())
    }

    pub fn get_system(&self, id: &str) -> Result<Option<BusinessSystem>> {
        let sql = format!("SELECT {} FROM business_systems WHERE id = ?1", SYSTEM_COLUMNS);
        self.conn
            .query_row(&sql, [id], system_from_row)
            .optional()
            .context("Failed to query business system")
    }

    pub fn get_system_with_projects(&self, id: &str) -> Result<Option<BusinessSystemWithProjects>> {
        let Some(system) = self.get_system(id)? else {
            return Ok(None);
        };
        let projects = self
            .system_project_links()?
            .remove(id)
            .unwrap_or_default();
        Ok(Some(BusinessSystemWithProjects { system, projects }))
    }

    /// Linked project summaries keyed by system id.
    fn system_project_links(&self) -> Result<HashMap<String, Vec<ProjectSummary>>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT ps.system_id, p.id, p.name, p.code
                 FROM project_systems ps JOIN projects p ON p.id = ps.project_id
                 ORDER BY p.name",
            )
            .context("Failed to prepare system project links")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    ProjectSummary {
                        id: row.get(1)?,
                        name: row.get(2)?,
                        code: row.get(3)?,
                    },
                ))
            })
            .context("Failed to query system project links")?;
        let mut links: HashMap<String, Vec<ProjectSummary>> = HashMap::new();
        for row in rows {
            let (system_id, project) = row.context("Failed to read system project link")?;
            links.entry(system_id).or_default().push(project);
        }
        Ok(links)
    }

    pub(crate) fn list_systems_for_project(&self, project_id: &str) -> Result<Vec<BusinessSystem>> {
        let sql = format!(
            "SELECT {} FROM business_systems
             WHERE id IN (SELECT system_id FROM project_systems WHERE project_id = ?1)
             ORDER BY name",
            SYSTEM_COLUMNS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare project systems query")?;
        let rows = stmt
            .query_map([project_id], system_from_row)
            .context("Failed to query project systems")?;
        let mut systems = Vec::new();
        for row in rows {
            systems.push(row.context("Failed to read business system row")?);
        }
        Ok(systems)
    }

    pub fn update_system(&self, id: &str, patch: SystemPatch) -> Result<BusinessSystem> {
        if !self.exists("business_systems", id)? {
            return Err(PmoError::not_found("Business system", id).into());
        }
        let mut set = Assignments::new();
        if let Some(name) = patch.name {
            set.set("name", name);
        }
        if let Some(code) = patch.code {
            set.set("code", code);
        }
        if let Some(v) = patch.purpose {
            set.set_opt("purpose", v);
        }
        if let Some(is_product) = patch.is_product {
            set.set("is_product", is_product);
        }
        if let Some(v) = patch.department {
            set.set_opt("department", v);
        }
        if let Some(v) = patch.description {
            set.set_opt("description", v);
        }
        if let Some(status) = patch.status {
            set.set("status", status);
        }
        if !set.is_empty() {
            set.set("updated_at", now_timestamp());
            set.apply(&self.conn, "business_systems", id)?;
        }
        self.get_system(id)?
            .context("Business system not found after update")
    }

    /// Project links go with the system.
    pub fn delete_system(&self, id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM business_systems WHERE id = ?1", params![id])
            .context("Failed to delete business system")?;
        Ok(count > 0)
    }
}
