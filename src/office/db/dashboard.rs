use anyhow::{Context, Result};

use super::PmoDb;
use crate::office::models::{DashboardView, IssueStats, ProjectStats};

/// How many recent projects and issues the dashboard shows.
pub const RECENT_LIMIT: usize = 5;

impl PmoDb {
    pub fn project_stats(&self) -> Result<ProjectStats> {
        self.conn
            .query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(status = 'PLANNING'), 0),
                        COALESCE(SUM(status = 'ONGOING'), 0),
                        COALESCE(SUM(status = 'COMPLETED'), 0)
                 FROM projects",
                [],
                |row| {
                    Ok(ProjectStats {
                        total: row.get(0)?,
                        planning: row.get(1)?,
                        ongoing: row.get(2)?,
                        completed: row.get(3)?,
                    })
                },
            )
            .context("Failed to count projects")
    }

    pub fn issue_stats(&self) -> Result<IssueStats> {
        self.conn
            .query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(status = 'OPEN'), 0),
                        COALESCE(SUM(status = 'IN_PROGRESS'), 0),
                        COALESCE(SUM(status = 'RESOLVED'), 0)
                 FROM issues",
                [],
                |row| {
                    Ok(IssueStats {
                        total: row.get(0)?,
                        open: row.get(1)?,
                        in_progress: row.get(2)?,
                        resolved: row.get(3)?,
                    })
                },
            )
            .context("Failed to count issues")
    }

    pub fn dashboard(&self) -> Result<DashboardView> {
        Ok(DashboardView {
            projects: self.project_stats()?,
            issues: self.issue_stats()?,
            recent_projects: self.recent_projects(RECENT_LIMIT)?,
            recent_issues: self.recent_issues(RECENT_LIMIT)?,
        })
    }
}
