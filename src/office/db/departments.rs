use std::collections::HashMap;

use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::{Assignments, PmoDb};
use crate::errors::PmoError;
use crate::office::models::{
    Department, DepartmentSummary, DepartmentWithRelations, UserSummary,
};
use crate::office::tree::would_create_cycle;
use crate::office::validate::{new_id, now_timestamp};

const DEPARTMENT_COLUMNS: &str = "id, name, parent_id, sort_order, created_at, updated_at";

#[derive(Debug, Clone, Default)]
pub struct NewDepartment {
    pub name: String,
    pub parent_id: Option<String>,
    pub order: i64,
}

/// `parent_id: Some(None)` detaches the department to the top level.
#[derive(Debug, Clone, Default)]
pub struct DepartmentPatch {
    pub name: Option<String>,
    pub parent_id: Option<Option<String>>,
    pub order: Option<i64>,
}

fn department_from_row(row: &Row<'_>) -> rusqlite::Result<Department> {
    Ok(Department {
        id: row.get(0)?,
        name: row.get(1)?,
        parent_id: row.get(2)?,
        order: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

impl PmoDb {
    // ── Department CRUD ───────────────────────────────────────────────

    pub fn create_department(&self, new: NewDepartment) -> Result<Department> {
        if let Some(parent_id) = &new.parent_id
            && !self.exists("departments", parent_id)?
        {
            return Err(PmoError::BadRequest(format!(
                "Parent department {} does not exist",
                parent_id
            ))
            .into());
        }
        let id = new_id();
        let now = now_timestamp();
        self.conn
            .execute(
                "INSERT INTO departments (id, name, parent_id, sort_order, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![id, new.name, new.parent_id, new.order, now],
            )
            .context("Failed to insert department")?;
        self.get_department(&id)?
            .context("Department not found after insert")
    }

    /// Flat list in insertion order.
    pub fn list_departments(&self) -> Result<Vec<Department>> {
        let sql = format!(
            "SELECT {} FROM departments ORDER BY created_at, rowid",
            DEPARTMENT_COLUMNS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_departments")?;
        let rows = stmt
            .query_map([], department_from_row)
            .context("Failed to query departments")?;
        let mut departments = Vec::new();
        for row in rows {
            departments.push(row.context("Failed to read department row")?);
        }
        Ok(departments)
    }

    pub fn get_department(&self, id: &str) -> Result<Option<Department>> {
        let sql = format!("SELECT {} FROM departments WHERE id = ?1", DEPARTMENT_COLUMNS);
        self.conn
            .query_row(&sql, [id], department_from_row)
            .optional()
            .context("Failed to query department")
    }

    /// Every department with its parent, direct children and users.
    pub fn list_departments_with_relations(&self) -> Result<Vec<DepartmentWithRelations>> {
        let departments = self.list_departments()?;
        let by_id: HashMap<&str, &Department> =
            departments.iter().map(|d| (d.id.as_str(), d)).collect();

        let mut users_by_dept: HashMap<String, Vec<UserSummary>> = HashMap::new();
        for user in self.list_users()? {
            if let Some(dept_id) = &user.department_id {
                users_by_dept
                    .entry(dept_id.clone())
                    .or_default()
                    .push(UserSummary::from(&user));
            }
        }

        // Same child order as the detail view.
        let mut siblings: Vec<&Department> = departments.iter().collect();
        siblings.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));
        let mut children_by_parent: HashMap<&str, Vec<DepartmentSummary>> = HashMap::new();
        for dept in siblings {
            if let Some(parent_id) = &dept.parent_id {
                children_by_parent
                    .entry(parent_id.as_str())
                    .or_default()
                    .push(DepartmentSummary::from(dept));
            }
        }

        let views = departments
            .iter()
            .map(|dept| DepartmentWithRelations {
                department: dept.clone(),
                parent: dept
                    .parent_id
                    .as_deref()
                    .and_then(|pid| by_id.get(pid))
                    .map(|p| DepartmentSummary::from(*p)),
                children: children_by_parent.remove(dept.id.as_str()).unwrap_or_default(),
                users: users_by_dept.remove(&dept.id).unwrap_or_default(),
            })
            .collect();
        Ok(views)
    }

    pub fn get_department_with_relations(&self, id: &str) -> Result<Option<DepartmentWithRelations>> {
        let Some(department) = self.get_department(id)? else {
            return Ok(None);
        };
        let parent = match &department.parent_id {
            Some(pid) => self.get_department(pid)?.map(|p| DepartmentSummary::from(&p)),
            None => None,
        };
        let mut stmt = self
            .conn
            .prepare("SELECT id, name FROM departments WHERE parent_id = ?1 ORDER BY sort_order, name")
            .context("Failed to prepare department children")?;
        let rows = stmt
            .query_map([id], |row| {
                Ok(DepartmentSummary {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .context("Failed to query department children")?;
        let mut children = Vec::new();
        for row in rows {
            children.push(row.context("Failed to read department child")?);
        }
        let users = self
            .list_users_in_department(id)?
            .iter()
            .map(UserSummary::from)
            .collect();
        Ok(Some(DepartmentWithRelations {
            department,
            parent,
            children,
            users,
        }))
    }

    pub fn update_department(&self, id: &str, patch: DepartmentPatch) -> Result<Department> {
        if !self.exists("departments", id)? {
            return Err(PmoError::not_found("Department", id).into());
        }
        let mut set = Assignments::new();
        if let Some(name) = patch.name {
            set.set("name", name);
        }
        if let Some(parent_id) = patch.parent_id {
            if let Some(pid) = &parent_id {
                self.check_reparent(id, pid)?;
            }
            set.set_opt("parent_id", parent_id);
        }
        if let Some(order) = patch.order {
            set.set("sort_order", order);
        }
        if !set.is_empty() {
            set.set("updated_at", now_timestamp());
            set.apply(&self.conn, "departments", id)?;
        }
        self.get_department(id)?
            .context("Department not found after update")
    }

    fn check_reparent(&self, id: &str, new_parent: &str) -> Result<()> {
        if !self.exists("departments", new_parent)? {
            return Err(PmoError::BadRequest(format!(
                "Parent department {} does not exist",
                new_parent
            ))
            .into());
        }
        let parent_of: HashMap<String, Option<String>> = self
            .list_departments()?
            .into_iter()
            .map(|d| (d.id, d.parent_id))
            .collect();
        if would_create_cycle(&parent_of, id, new_parent) {
            return Err(PmoError::BadRequest(
                "A department cannot be moved under itself or one of its descendants".into(),
            )
            .into());
        }
        Ok(())
    }

    /// Refuses while child departments exist; users are detached.
    pub fn delete_department(&self, id: &str) -> Result<bool> {
        let children: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM departments WHERE parent_id = ?1",
                [id],
                |row| row.get(0),
            )
            .context("Failed to count child departments")?;
        if children > 0 {
            return Err(PmoError::Conflict(
                "Department has child departments; move or delete them first".into(),
            )
            .into());
        }
        let count = self
            .conn
            .execute("DELETE FROM departments WHERE id = ?1", params![id])
            .context("Failed to delete department")?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::office::db::users::NewUser;
    use crate::office::models::UserRole;

    fn create(db: &PmoDb, name: &str, parent: Option<&str>, order: i64) -> Result<Department> {
        db.create_department(NewDepartment {
            name: name.to_string(),
            parent_id: parent.map(str::to_string),
            order,
        })
    }

    #[test]
    fn test_create_department_with_parent() -> Result<()> {
        let db = PmoDb::new_in_memory()?;
        let it = create(&db, "IT", None, 0)?;
        let dev = create(&db, "Development", Some(&it.id), 2)?;
        assert_eq!(dev.parent_id.as_deref(), Some(it.id.as_str()));
        assert_eq!(dev.order, 2);
        Ok(())
    }

    #[test]
    fn test_create_department_unknown_parent() -> Result<()> {
        let db = PmoDb::new_in_memory()?;
        let err = create(&db, "Orphan", Some("missing"), 0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PmoError>(),
            Some(PmoError::BadRequest(_))
        ));
        Ok(())
    }

    #[test]
    fn test_relations_include_parent_children_users() -> Result<()> {
        let db = PmoDb::new_in_memory()?;
        let it = create(&db, "IT", None, 0)?;
        let dev = create(&db, "Development", Some(&it.id), 0)?;
        db.create_user(NewUser {
            email: "dev@example.com".into(),
            password_hash: "x".into(),
            name: "Dev".into(),
            role: UserRole::Member,
            department_id: Some(dev.id.clone()),
            company_id: None,
        })?;

        let views = db.list_departments_with_relations()?;
        assert_eq!(views.len(), 2);
        let it_view = views.iter().find(|v| v.department.id == it.id).unwrap();
        assert!(it_view.parent.is_none());
        assert_eq!(it_view.children.len(), 1);
        assert_eq!(it_view.children[0].name, "Development");

        let dev_view = db.get_department_with_relations(&dev.id)?.unwrap();
        assert_eq!(dev_view.parent.as_ref().map(|p| p.name.as_str()), Some("IT"));
        assert_eq!(dev_view.users.len(), 1);
        assert_eq!(dev_view.users[0].email, "dev@example.com");
        Ok(())
    }

    #[test]
    fn test_list_and_detail_children_share_order() -> Result<()> {
        let db = PmoDb::new_in_memory()?;
        let root = create(&db, "Root", None, 0)?;
        create(&db, "Zeta", Some(&root.id), 1)?;
        create(&db, "Beta", Some(&root.id), 2)?;
        create(&db, "Alpha", Some(&root.id), 1)?;

        let listed = db.list_departments_with_relations()?;
        let from_list = &listed.iter().find(|d| d.department.id == root.id).unwrap().children;
        let names: Vec<&str> = from_list.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Zeta", "Beta"]);

        let detail = db.get_department_with_relations(&root.id)?.unwrap();
        assert_eq!(&detail.children, from_list);
        Ok(())
    }

    #[test]
    fn test_update_department_detach_and_rename() -> Result<()> {
        let db = PmoDb::new_in_memory()?;
        let it = create(&db, "IT", None, 0)?;
        let dev = create(&db, "Development", Some(&it.id), 0)?;
        let updated = db.update_department(
            &dev.id,
            DepartmentPatch {
                name: Some("Engineering".into()),
                parent_id: Some(None),
                order: Some(5),
            },
        )?;
        assert_eq!(updated.name, "Engineering");
        assert_eq!(updated.parent_id, None);
        assert_eq!(updated.order, 5);
        Ok(())
    }

    #[test]
    fn test_update_department_rejects_cycle() -> Result<()> {
        let db = PmoDb::new_in_memory()?;
        let it = create(&db, "IT", None, 0)?;
        let dev = create(&db, "Development", Some(&it.id), 0)?;
        let fe = create(&db, "Frontend", Some(&dev.id), 0)?;

        for parent in [&fe.id, &it.id] {
            let err = db
                .update_department(
                    &it.id,
                    DepartmentPatch {
                        parent_id: Some(Some(parent.clone())),
                        ..Default::default()
                    },
                )
                .unwrap_err();
            assert!(matches!(
                err.downcast_ref::<PmoError>(),
                Some(PmoError::BadRequest(_))
            ));
        }
        Ok(())
    }

    #[test]
    fn test_delete_department_with_children_is_refused() -> Result<()> {
        let db = PmoDb::new_in_memory()?;
        let it = create(&db, "IT", None, 0)?;
        let dev = create(&db, "Development", Some(&it.id), 0)?;

        let err = db.delete_department(&it.id).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PmoError>(),
            Some(PmoError::Conflict(_))
        ));

        assert!(db.delete_department(&dev.id)?);
        assert!(db.delete_department(&it.id)?);
        assert!(!db.delete_department(&it.id)?);
        Ok(())
    }

    #[test]
    fn test_delete_department_detaches_users() -> Result<()> {
        let db = PmoDb::new_in_memory()?;
        let hr = create(&db, "HR", None, 0)?;
        let user = db.create_user(NewUser {
            email: "hr@example.com".into(),
            password_hash: "x".into(),
            name: "Hana".into(),
            role: UserRole::Member,
            department_id: Some(hr.id.clone()),
            company_id: None,
        })?;
        assert!(db.delete_department(&hr.id)?);
        let user = db.get_user(&user.id)?.unwrap();
        assert_eq!(user.department_id, None);
        Ok(())
    }
}
