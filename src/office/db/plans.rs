use std::collections::HashMap;

use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::{Assignments, PmoDb, enum_column};
use crate::errors::PmoError;
use crate::office::models::{DetailPlan, Milestone, MilestoneWithPlans, PlanStatus};
use crate::office::validate::{new_id, now_timestamp};

const MILESTONE_COLUMNS: &str =
    "id, project_id, name, planned_date, actual_date, status, description, created_at";

const DETAIL_PLAN_COLUMNS: &str =
    "id, milestone_id, name, plan_type, start_date, end_date, status, description, created_at";

#[derive(Debug, Clone)]
pub struct NewMilestone {
    pub project_id: String,
    pub name: String,
    pub planned_date: String,
    pub actual_date: Option<String>,
    pub status: PlanStatus,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MilestonePatch {
    pub name: Option<String>,
    pub planned_date: Option<String>,
    pub actual_date: Option<Option<String>>,
    pub status: Option<PlanStatus>,
    pub description: Option<Option<String>>,
}

#[derive(Debug, Clone)]
pub struct NewDetailPlan {
    pub name: String,
    pub plan_type: String,
    pub start_date: String,
    pub end_date: String,
    pub status: PlanStatus,
    pub description: Option<String>,
}

fn milestone_from_row(row: &Row<'_>) -> rusqlite::Result<Milestone> {
    Ok(Milestone {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        planned_date: row.get(3)?,
        actual_date: row.get(4)?,
        status: enum_column(row, 5)?,
        description: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn detail_plan_from_row(row: &Row<'_>) -> rusqlite::Result<DetailPlan> {
    Ok(DetailPlan {
        id: row.get(0)?,
        milestone_id: row.get(1)?,
        name: row.get(2)?,
        plan_type: row.get(3)?,
        start_date: row.get(4)?,
        end_date: row.get(5)?,
        status: enum_column(row, 6)?,
        description: row.get(7)?,
        created_at: row.get(8)?,
    })
}

impl PmoDb {
    // ── Milestones ────────────────────────────────────────────────────

    pub fn create_milestone(&self, new: NewMilestone) -> Result<Milestone> {
        if !self.exists("projects", &new.project_id)? {
            return Err(PmoError::not_found("Project", new.project_id).into());
        }
        let id = new_id();
        self.conn
            .execute(
                "INSERT INTO milestones (id, project_id, name, planned_date, actual_date, status,
                                         description, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    new.project_id,
                    new.name,
                    new.planned_date,
                    new.actual_date,
                    new.status.as_str(),
                    new.description,
                    now_timestamp(),
                ],
            )
            .context("Failed to insert milestone")?;
        self.get_milestone(&id)?
            .context("Milestone not found after insert")
    }

    pub fn get_milestone(&self, id: &str) -> Result<Option<Milestone>> {
        let sql = format!("SELECT {} FROM milestones WHERE id = ?1", MILESTONE_COLUMNS);
        self.conn
            .query_row(&sql, [id], milestone_from_row)
            .optional()
            .context("Failed to query milestone")
    }

    /// Milestones of a project by planned date, each with its detail plans.
    pub fn list_milestones_with_plans(&self, project_id: &str) -> Result<Vec<MilestoneWithPlans>> {
        let sql = format!(
            "SELECT {} FROM milestones WHERE project_id = ?1 ORDER BY planned_date, rowid",
            MILESTONE_COLUMNS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_milestones")?;
        let rows = stmt
            .query_map([project_id], milestone_from_row)
            .context("Failed to query milestones")?;
        let mut milestones = Vec::new();
        for row in rows {
            milestones.push(row.context("Failed to read milestone row")?);
        }

        let sql = format!(
            "SELECT {} FROM detail_plans
             WHERE milestone_id IN (SELECT id FROM milestones WHERE project_id = ?1)
             ORDER BY start_date, rowid",
            DETAIL_PLAN_COLUMNS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_detail_plans")?;
        let rows = stmt
            .query_map([project_id], detail_plan_from_row)
            .context("Failed to query detail plans")?;
        let mut plans_by_milestone: HashMap<String, Vec<DetailPlan>> = HashMap::new();
        for row in rows {
            let plan = row.context("Failed to read detail plan row")?;
            plans_by_milestone
                .entry(plan.milestone_id.clone())
                .or_default()
                .push(plan);
        }

        Ok(milestones
            .into_iter()
            .map(|milestone| MilestoneWithPlans {
                detail_plans: plans_by_milestone.remove(&milestone.id).unwrap_or_default(),
                milestone,
            })
            .collect())
    }

    pub fn update_milestone(&self, id: &str, patch: MilestonePatch) -> Result<Milestone> {
        if !self.exists("milestones", id)? {
            return Err(PmoError::not_found("Milestone", id).into());
        }
        let mut set = Assignments::new();
        if let Some(name) = patch.name {
            set.set("name", name);
        }
        if let Some(date) = patch.planned_date {
            set.set("planned_date", date);
        }
        if let Some(v) = patch.actual_date {
            set.set_opt("actual_date", v);
        }
        if let Some(status) = patch.status {
            set.set("status", status.as_str().to_string());
        }
        if let Some(v) = patch.description {
            set.set_opt("description", v);
        }
        set.apply(&self.conn, "milestones", id)?;
        self.get_milestone(id)?
            .context("Milestone not found after update")
    }

    /// Deletes the milestone together with its detail plans.
    pub fn delete_milestone(&self, id: &str) -> Result<bool> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute("DELETE FROM detail_plans WHERE milestone_id = ?1", [id])
            .context("Failed to delete detail plans")?;
        let count = tx
            .execute("DELETE FROM milestones WHERE id = ?1", [id])
            .context("Failed to delete milestone")?;
        tx.commit().context("Failed to commit milestone deletion")?;
        Ok(count > 0)
    }

    // ── Detail plans ──────────────────────────────────────────────────

    /// Dates are normalized timestamps, so string order is time order.
    pub fn create_detail_plan(&self, milestone_id: &str, new: NewDetailPlan) -> Result<DetailPlan> {
        if !self.exists("milestones", milestone_id)? {
            return Err(PmoError::not_found("Milestone", milestone_id).into());
        }
        if new.end_date < new.start_date {
            return Err(PmoError::invalid("endDate", "End date must not be before start date").into());
        }
        let id = new_id();
        self.conn
            .execute(
                "INSERT INTO detail_plans (id, milestone_id, name, plan_type, start_date, end_date,
                                           status, description, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    id,
                    milestone_id,
                    new.name,
                    new.plan_type,
                    new.start_date,
                    new.end_date,
                    new.status.as_str(),
                    new.description,
                    now_timestamp(),
                ],
            )
            .context("Failed to insert detail plan")?;
        let sql = format!("SELECT {} FROM detail_plans WHERE id = ?1", DETAIL_PLAN_COLUMNS);
        self.conn
            .query_row(&sql, [&id], detail_plan_from_row)
            .context("Detail plan not found after insert")
    }

    pub fn delete_detail_plan(&self, id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM detail_plans WHERE id = ?1", params![id])
            .context("Failed to delete detail plan")?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::office::db::test_support::{seed_project, seed_user};
    use crate::office::models::UserRole;

    fn milestone(project_id: &str, name: &str, planned: &str) -> NewMilestone {
        NewMilestone {
            project_id: project_id.to_string(),
            name: name.to_string(),
            planned_date: planned.to_string(),
            actual_date: None,
            status: PlanStatus::Pending,
            description: None,
        }
    }

    fn plan(start: &str, end: &str) -> NewDetailPlan {
        NewDetailPlan {
            name: "Data migration".into(),
            plan_type: "TASK".into(),
            start_date: start.to_string(),
            end_date: end.to_string(),
            status: PlanStatus::Pending,
            description: None,
        }
    }

    #[test]
    fn test_milestones_ordered_with_plans() -> Result<()> {
        let db = PmoDb::new_in_memory()?;
        let pm = seed_user(&db, "pm@example.com", UserRole::Manager)?;
        let project = seed_project(&db, "ERP", "ERP", &pm.id)?;
        let late = db.create_milestone(milestone(&project.id, "Go-live", "2026-09-01T00:00:00.000Z"))?;
        let early = db.create_milestone(milestone(&project.id, "Kickoff", "2026-01-15T00:00:00.000Z"))?;
        db.create_detail_plan(
            &late.id,
            plan("2026-08-01T00:00:00.000Z", "2026-08-20T00:00:00.000Z"),
        )?;

        let list = db.list_milestones_with_plans(&project.id)?;
        let names: Vec<_> = list.iter().map(|m| m.milestone.name.as_str()).collect();
        assert_eq!(names, ["Kickoff", "Go-live"]);
        assert!(list[0].detail_plans.is_empty());
        assert_eq!(list[1].detail_plans.len(), 1);
        assert_eq!(early.status, PlanStatus::Pending);
        Ok(())
    }

    #[test]
    fn test_milestone_for_unknown_project() -> Result<()> {
        let db = PmoDb::new_in_memory()?;
        let err = db
            .create_milestone(milestone("missing", "Kickoff", "2026-01-15T00:00:00.000Z"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PmoError>(),
            Some(PmoError::NotFound { entity: "Project", .. })
        ));
        Ok(())
    }

    #[test]
    fn test_update_milestone() -> Result<()> {
        let db = PmoDb::new_in_memory()?;
        let pm = seed_user(&db, "pm@example.com", UserRole::Manager)?;
        let project = seed_project(&db, "ERP", "ERP", &pm.id)?;
        let m = db.create_milestone(milestone(&project.id, "Kickoff", "2026-01-15T00:00:00.000Z"))?;
        let updated = db.update_milestone(
            &m.id,
            MilestonePatch {
                status: Some(PlanStatus::Completed),
                actual_date: Some(Some("2026-01-16T00:00:00.000Z".into())),
                ..Default::default()
            },
        )?;
        assert_eq!(updated.status, PlanStatus::Completed);
        assert_eq!(updated.actual_date.as_deref(), Some("2026-01-16T00:00:00.000Z"));
        assert_eq!(updated.name, "Kickoff");
        Ok(())
    }

    #[test]
    fn test_detail_plan_end_before_start_is_rejected() -> Result<()> {
        let db = PmoDb::new_in_memory()?;
        let pm = seed_user(&db, "pm@example.com", UserRole::Manager)?;
        let project = seed_project(&db, "ERP", "ERP", &pm.id)?;
        let m = db.create_milestone(milestone(&project.id, "Kickoff", "2026-01-15T00:00:00.000Z"))?;
        let err = db
            .create_detail_plan(
                &m.id,
                plan("2026-02-01T00:00:00.000Z", "2026-01-01T00:00:00.000Z"),
            )
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PmoError>(),
            Some(PmoError::Validation(_))
        ));
        Ok(())
    }

    #[test]
    fn test_delete_milestone_removes_plans() -> Result<()> {
        let db = PmoDb::new_in_memory()?;
        let pm = seed_user(&db, "pm@example.com", UserRole::Manager)?;
        let project = seed_project(&db, "ERP", "ERP", &pm.id)?;
        let m = db.create_milestone(milestone(&project.id, "Kickoff", "2026-01-15T00:00:00.000Z"))?;
        let p = db.create_detail_plan(
            &m.id,
            plan("2026-01-01T00:00:00.000Z", "2026-01-10T00:00:00.000Z"),
        )?;

        assert!(db.delete_milestone(&m.id)?);
        assert!(!db.delete_detail_plan(&p.id)?);
        assert!(db.list_milestones_with_plans(&project.id)?.is_empty());
        Ok(())
    }
}
