use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::{Assignments, PmoDb, enum_column};
use crate::errors::PmoError;
use crate::office::models::{
    BusinessSystem, CompanySummary, MemberWithUser, Project, ProjectCounts, ProjectDetail,
    ProjectListItem, ProjectMember, ProjectStatus, UserSummary,
};
use crate::office::validate::{new_id, now_timestamp};

const PROJECT_COLUMNS: &str = "id, name, code, status, description, start_date, planned_end_date, \
                               actual_end_date, implementer_id, created_at, updated_at";

/// Member role given to whoever creates a project.
pub const PROJECT_MANAGER_ROLE: &str = "Project Manager";

#[derive(Debug, Clone)]
pub struct NewProject {
    pub name: String,
    pub code: String,
    pub status: ProjectStatus,
    pub description: Option<String>,
    pub start_date: Option<String>,
    pub planned_end_date: Option<String>,
    pub implementer_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub status: Option<ProjectStatus>,
    pub description: Option<Option<String>>,
    pub start_date: Option<Option<String>>,
    pub planned_end_date: Option<Option<String>>,
    pub actual_end_date: Option<Option<String>>,
    pub implementer_id: Option<Option<String>>,
}

pub(crate) fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        code: row.get(2)?,
        status: enum_column(row, 3)?,
        description: row.get(4)?,
        start_date: row.get(5)?,
        planned_end_date: row.get(6)?,
        actual_end_date: row.get(7)?,
        implementer_id: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<MemberWithUser> {
    Ok(MemberWithUser {
        member: ProjectMember {
            id: row.get(0)?,
            project_id: row.get(1)?,
            user_id: row.get(2)?,
            role: row.get(3)?,
            join_date: row.get(4)?,
        },
        user: UserSummary {
            id: row.get(2)?,
            email: row.get(5)?,
            name: row.get(6)?,
            role: enum_column(row, 7)?,
        },
    })
}

const MEMBER_SELECT: &str = "SELECT m.id, m.project_id, m.user_id, m.role, m.join_date, \
                             u.email, u.name, u.role \
                             FROM project_members m JOIN users u ON u.id = m.user_id";

impl PmoDb {
    // ── Project CRUD ──────────────────────────────────────────────────

    /// Insert a project and enrol `creator_id` as its project manager.
    pub fn create_project(&self, new: NewProject, creator_id: &str) -> Result<Project> {
        let taken: bool = self
            .conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM projects WHERE code = ?1)",
                [&new.code],
                |row| row.get(0),
            )
            .context("Failed to check project code")?;
        if taken {
            return Err(PmoError::Conflict("Project code already exists".into()).into());
        }

        let id = new_id();
        let now = now_timestamp();
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "INSERT INTO projects (id, name, code, status, description, start_date, planned_end_date,
                                   implementer_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                id,
                new.name,
                new.code,
                new.status.as_str(),
                new.description,
                new.start_date,
                new.planned_end_date,
                new.implementer_id,
                now,
            ],
        )
        .context("Failed to insert project")?;
        tx.execute(
            "INSERT INTO project_members (id, project_id, user_id, role, join_date)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![new_id(), id, creator_id, PROJECT_MANAGER_ROLE, now],
        )
        .context("Failed to enrol project creator")?;
        tx.commit().context("Failed to commit project")?;

        self.get_project(&id)?
            .context("Project not found after insert")
    }

    /// Newest first, with implementer summary and relation counts.
    pub fn list_projects(&self) -> Result<Vec<ProjectListItem>> {
        let sql = format!(
            "SELECT {},
                    c.id, c.name, c.code,
                    (SELECT COUNT(*) FROM project_members m WHERE m.project_id = p.id),
                    (SELECT COUNT(*) FROM milestones ms WHERE ms.project_id = p.id),
                    (SELECT COUNT(*) FROM issues i WHERE i.project_id = p.id)
             FROM projects p
             LEFT JOIN companies c ON c.id = p.implementer_id
             ORDER BY p.created_at DESC, p.rowid DESC",
            prefixed_project_columns("p"),
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_projects")?;
        let rows = stmt
            .query_map([], |row| {
                let implementer = match row.get::<_, Option<String>>(11)? {
                    Some(id) => Some(CompanySummary {
                        id,
                        name: row.get(12)?,
                        code: row.get(13)?,
                    }),
                    None => None,
                };
                Ok(ProjectListItem {
                    project: project_from_row(row)?,
                    implementer,
                    count: ProjectCounts {
                        members: row.get(14)?,
                        milestones: row.get(15)?,
                        issues: row.get(16)?,
                    },
                })
            })
            .context("Failed to query projects")?;
        let mut projects = Vec::new();
        for row in rows {
            projects.push(row.context("Failed to read project row")?);
        }
        Ok(projects)
    }

    pub fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let sql = format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_COLUMNS);
        self.conn
            .query_row(&sql, [id], project_from_row)
            .optional()
            .context("Failed to query project")
    }

    /// The `limit` most recently created projects.
    pub fn recent_projects(&self, limit: usize) -> Result<Vec<Project>> {
        let sql = format!(
            "SELECT {} FROM projects ORDER BY created_at DESC, rowid DESC LIMIT ?1",
            PROJECT_COLUMNS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare recent_projects")?;
        let rows = stmt
            .query_map([limit as i64], project_from_row)
            .context("Failed to query recent projects")?;
        let mut projects = Vec::new();
        for row in rows {
            projects.push(row.context("Failed to read project row")?);
        }
        Ok(projects)
    }

    pub fn get_project_detail(&self, id: &str) -> Result<Option<ProjectDetail>> {
        let Some(project) = self.get_project(id)? else {
            return Ok(None);
        };
        let implementer = match &project.implementer_id {
            Some(company_id) => self.get_company(company_id)?,
            None => None,
        };
        Ok(Some(ProjectDetail {
            implementer,
            members: self.list_members(id)?,
            milestones: self.list_milestones_with_plans(id)?,
            issues: self.list_project_issues(id, &Default::default())?,
            business_systems: self.list_systems_for_project(id)?,
            project,
        }))
    }

    pub fn update_project(&self, id: &str, patch: ProjectPatch) -> Result<Project> {
        if !self.exists("projects", id)? {
            return Err(PmoError::not_found("Project", id).into());
        }
        let mut set = Assignments::new();
        if let Some(name) = patch.name {
            set.set("name", name);
        }
        if let Some(status) = patch.status {
            set.set("status", status.as_str().to_string());
        }
        if let Some(v) = patch.description {
            set.set_opt("description", v);
        }
        if let Some(v) = patch.start_date {
            set.set_opt("start_date", v);
        }
        if let Some(v) = patch.planned_end_date {
            set.set_opt("planned_end_date", v);
        }
        if let Some(v) = patch.actual_end_date {
            set.set_opt("actual_end_date", v);
        }
        if let Some(v) = patch.implementer_id {
            set.set_opt("implementer_id", v);
        }
        if !set.is_empty() {
            set.set("updated_at", now_timestamp());
            set.apply(&self.conn, "projects", id)?;
        }
        self.get_project(id)?
            .context("Project not found after update")
    }

    /// Remove a project and everything hanging off it in one transaction.
    pub fn delete_project(&self, id: &str) -> Result<bool> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute("DELETE FROM project_members WHERE project_id = ?1", [id])
            .context("Failed to delete project members")?;
        tx.execute(
            "DELETE FROM detail_plans
             WHERE milestone_id IN (SELECT id FROM milestones WHERE project_id = ?1)",
            [id],
        )
        .context("Failed to delete detail plans")?;
        tx.execute("DELETE FROM milestones WHERE project_id = ?1", [id])
            .context("Failed to delete milestones")?;
        tx.execute("DELETE FROM issues WHERE project_id = ?1", [id])
            .context("Failed to delete issues")?;
        tx.execute("DELETE FROM project_systems WHERE project_id = ?1", [id])
            .context("Failed to delete project system links")?;
        let count = tx
            .execute("DELETE FROM projects WHERE id = ?1", [id])
            .context("Failed to delete project")?;
        tx.commit().context("Failed to commit project deletion")?;
        Ok(count > 0)
    }

    // ── Members ───────────────────────────────────────────────────────

    pub fn list_members(&self, project_id: &str) -> Result<Vec<MemberWithUser>> {
        let sql = format!(
            "{} WHERE m.project_id = ?1 ORDER BY m.join_date, m.rowid",
            MEMBER_SELECT
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_members")?;
        let rows = stmt
            .query_map([project_id], member_from_row)
            .context("Failed to query project members")?;
        let mut members = Vec::new();
        for row in rows {
            members.push(row.context("Failed to read project member row")?);
        }
        Ok(members)
    }

    pub fn add_member(&self, project_id: &str, user_id: &str, role: &str) -> Result<MemberWithUser> {
        if !self.exists("projects", project_id)? {
            return Err(PmoError::not_found("Project", project_id).into());
        }
        if !self.exists("users", user_id)? {
            return Err(PmoError::not_found("User", user_id).into());
        }
        let already: bool = self
            .conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM project_members WHERE project_id = ?1 AND user_id = ?2)",
                [project_id, user_id],
                |row| row.get(0),
            )
            .context("Failed to check project membership")?;
        if already {
            return Err(PmoError::Conflict("User is already a project member".into()).into());
        }

        let id = new_id();
        self.conn
            .execute(
                "INSERT INTO project_members (id, project_id, user_id, role, join_date)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, project_id, user_id, role, now_timestamp()],
            )
            .context("Failed to insert project member")?;
        let sql = format!("{} WHERE m.id = ?1", MEMBER_SELECT);
        self.conn
            .query_row(&sql, [&id], member_from_row)
            .context("Project member not found after insert")
    }

    /// Only removes the membership if it belongs to `project_id`.
    pub fn remove_member(&self, project_id: &str, member_id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "DELETE FROM project_members WHERE id = ?1 AND project_id = ?2",
                params![member_id, project_id],
            )
            .context("Failed to delete project member")?;
        Ok(count > 0)
    }

    // ── Business system links ─────────────────────────────────────────

    /// Replace the set of business systems linked to a project.
    pub fn set_project_systems(
        &self,
        project_id: &str,
        system_ids: &[String],
    ) -> Result<Vec<BusinessSystem>> {
        if !self.exists("projects", project_id)? {
            return Err(PmoError::not_found("Project", project_id).into());
        }
        for system_id in system_ids {
            if !self.exists("business_systems", system_id)? {
                return Err(PmoError::BadRequest(format!(
                    "Business system {} does not exist",
                    system_id
                ))
                .into());
            }
        }
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute("DELETE FROM project_systems WHERE project_id = ?1", [project_id])
            .context("Failed to clear project system links")?;
        for system_id in system_ids {
            tx.execute(
                "INSERT OR IGNORE INTO project_systems (project_id, system_id) VALUES (?1, ?2)",
                [project_id, system_id.as_str()],
            )
            .context("Failed to link business system")?;
        }
        tx.commit().context("Failed to commit project system links")?;
        self.list_systems_for_project(project_id)
    }
}

fn prefixed_project_columns(alias: &str) -> String {
    PROJECT_COLUMNS
        .split(", ")
        .map(|col| format!("{}.{}", alias, col))
        .collect::<Vec<_>>()
        .join(", ")
}
