use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params, params_from_iter};

use super::{Assignments, Conditions, PmoDb, enum_column};
use crate::errors::PmoError;
use crate::office::models::{
    Issue, IssueFilter, IssuePriority, IssueStatus, IssueType, IssueWithProject, ProjectSummary,
    ResolvedAtChange,
};
use crate::office::validate::{new_id, now_timestamp};

const ISSUE_COLUMNS: &str = "i.id, i.project_id, i.title, i.description, i.issue_type, i.priority, \
                             i.status, i.due_date, i.resolved_at, i.assignee_id, i.reporter_id, \
                             i.created_at, i.updated_at";

#[derive(Debug, Clone)]
pub struct NewIssue {
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub issue_type: IssueType,
    pub priority: IssuePriority,
    pub status: IssueStatus,
    pub due_date: Option<String>,
    pub assignee_id: Option<String>,
    pub reporter_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct IssuePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub issue_type: Option<IssueType>,
    pub priority: Option<IssuePriority>,
    pub status: Option<IssueStatus>,
    pub due_date: Option<Option<String>>,
    pub assignee_id: Option<Option<String>>,
}

fn issue_from_row(row: &Row<'_>) -> rusqlite::Result<Issue> {
    Ok(Issue {
        id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        issue_type: enum_column(row, 4)?,
        priority: enum_column(row, 5)?,
        status: enum_column(row, 6)?,
        due_date: row.get(7)?,
        resolved_at: row.get(8)?,
        assignee_id: row.get(9)?,
        reporter_id: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

/// Issue columns followed by `p.id, p.name, p.code`.
fn issue_with_project_from_row(row: &Row<'_>) -> rusqlite::Result<IssueWithProject> {
    Ok(IssueWithProject {
        issue: issue_from_row(row)?,
        project: ProjectSummary {
            id: row.get(13)?,
            name: row.get(14)?,
            code: row.get(15)?,
        },
    })
}

fn issue_conditions(filter: &IssueFilter) -> Conditions {
    let mut conditions = Conditions::new();
    if let Some(project_id) = &filter.project_id {
        conditions.eq("i.project_id", project_id.clone());
    }
    if let Some(issue_type) = filter.issue_type {
        conditions.eq("i.issue_type", issue_type.as_str().to_string());
    }
    if let Some(status) = filter.status {
        conditions.eq("i.status", status.as_str().to_string());
    }
    if let Some(priority) = filter.priority {
        conditions.eq("i.priority", priority.as_str().to_string());
    }
    conditions
}

impl PmoDb {
    // ── Issue CRUD ────────────────────────────────────────────────────

    /// An issue created directly as `RESOLVED` is stamped resolved now.
    pub fn create_issue(&self, new: NewIssue) -> Result<Issue> {
        if !self.exists("projects", &new.project_id)? {
            return Err(PmoError::not_found("Project", new.project_id).into());
        }
        let id = new_id();
        let now = now_timestamp();
        let resolved_at = (new.status == IssueStatus::Resolved).then(|| now.clone());
        self.conn
            .execute(
                "INSERT INTO issues (id, project_id, title, description, issue_type, priority, status,
                                     due_date, resolved_at, assignee_id, reporter_id,
                                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
                params![
                    id,
                    new.project_id,
                    new.title,
                    new.description,
                    new.issue_type.as_str(),
                    new.priority.as_str(),
                    new.status.as_str(),
                    new.due_date,
                    resolved_at,
                    new.assignee_id,
                    new.reporter_id,
                    now,
                ],
            )
            .context("Failed to insert issue")?;
        self.get_issue(&id)?.context("Issue not found after insert")
    }

    /// Newest first, each with its project summary.
    pub fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<IssueWithProject>> {
        let conditions = issue_conditions(filter);
        let sql = format!(
            "SELECT {}, p.id, p.name, p.code
             FROM issues i JOIN projects p ON p.id = i.project_id{}
             ORDER BY i.created_at DESC, i.rowid DESC",
            ISSUE_COLUMNS,
            conditions.where_clause()
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_issues")?;
        let rows = stmt
            .query_map(
                params_from_iter(conditions.values().iter()),
                issue_with_project_from_row,
            )
            .context("Failed to query issues")?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row.context("Failed to read issue row")?);
        }
        Ok(issues)
    }

    /// Issues of one project; `filter.project_id` is ignored.
    pub fn list_project_issues(&self, project_id: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
        let conditions = issue_conditions(&IssueFilter {
            project_id: Some(project_id.to_string()),
            ..filter.clone()
        });
        let sql = format!(
            "SELECT {} FROM issues i{} ORDER BY i.created_at DESC, i.rowid DESC",
            ISSUE_COLUMNS,
            conditions.where_clause()
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_project_issues")?;
        let rows = stmt
            .query_map(params_from_iter(conditions.values().iter()), issue_from_row)
            .context("Failed to query project issues")?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row.context("Failed to read issue row")?);
        }
        Ok(issues)
    }

    pub fn recent_issues(&self, limit: usize) -> Result<Vec<IssueWithProject>> {
        let sql = format!(
            "SELECT {}, p.id, p.name, p.code
             FROM issues i JOIN projects p ON p.id = i.project_id
             ORDER BY i.created_at DESC, i.rowid DESC LIMIT ?1",
            ISSUE_COLUMNS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare recent_issues")?;
        let rows = stmt
            .query_map([limit as i64], issue_with_project_from_row)
            .context("Failed to query recent issues")?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row.context("Failed to read issue row")?);
        }
        Ok(issues)
    }

    pub fn get_issue(&self, id: &str) -> Result<Option<Issue>> {
        let sql = format!("SELECT {} FROM issues i WHERE i.id = ?1", ISSUE_COLUMNS);
        self.conn
            .query_row(&sql, [id], issue_from_row)
            .optional()
            .context("Failed to query issue")
    }

    pub fn get_issue_with_project(&self, id: &str) -> Result<Option<IssueWithProject>> {
        let sql = format!(
            "SELECT {}, p.id, p.name, p.code
             FROM issues i JOIN projects p ON p.id = i.project_id
             WHERE i.id = ?1",
            ISSUE_COLUMNS
        );
        self.conn
            .query_row(&sql, [id], issue_with_project_from_row)
            .optional()
            .context("Failed to query issue")
    }

    /// Partial update. A status change keeps `resolved_at` in step with
    /// the `RESOLVED` status.
    pub fn update_issue(&self, id: &str, patch: IssuePatch) -> Result<Issue> {
        let current = self
            .get_issue(id)?
            .ok_or_else(|| PmoError::not_found("Issue", id))?;
        let now = now_timestamp();
        let mut set = Assignments::new();
        if let Some(title) = patch.title {
            set.set("title", title);
        }
        if let Some(description) = patch.description {
            set.set("description", description);
        }
        if let Some(issue_type) = patch.issue_type {
            set.set("issue_type", issue_type.as_str().to_string());
        }
        if let Some(priority) = patch.priority {
            set.set("priority", priority.as_str().to_string());
        }
        if let Some(status) = patch.status {
            set.set("status", status.as_str().to_string());
            match IssueStatus::resolved_at_change(current.status, status) {
                ResolvedAtChange::Stamp => set.set("resolved_at", now.clone()),
                ResolvedAtChange::Clear => set.set_opt("resolved_at", None),
                ResolvedAtChange::Keep => {}
            }
        }
        if let Some(v) = patch.due_date {
            set.set_opt("due_date", v);
        }
        if let Some(v) = patch.assignee_id {
            set.set_opt("assignee_id", v);
        }
        if !set.is_empty() {
            set.set("updated_at", now);
            set.apply(&self.conn, "issues", id)?;
        }
        self.get_issue(id)?.context("Issue not found after update")
    }

    pub fn delete_issue(&self, id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM issues WHERE id = ?1", params![id])
            .context("Failed to delete issue")?;
        Ok(count > 0)
    }
}
