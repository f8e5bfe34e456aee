use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Defines a string-backed enum with `as_str`, `FromStr`, `Display` and
/// the SCREAMING_SNAKE_CASE wire names used by the API.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $label:literal {
            $($variant:ident => $wire:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $wire),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", $label, s)),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_enum!(
    UserRole, "role" {
        Admin => "ADMIN",
        Manager => "MANAGER",
        Member => "MEMBER",
    }
);

impl UserRole {
    /// Managers and admins may change projects and plans.
    pub fn can_manage(&self) -> bool {
        matches!(self, Self::Admin | Self::Manager)
    }
}

impl Default for UserRole {
    fn default() -> Self {
        Self::Member
    }
}

wire_enum!(
    ProjectStatus, "project status" {
        Planning => "PLANNING",
        Ongoing => "ONGOING",
        Completed => "COMPLETED",
        Suspended => "SUSPENDED",
        Cancelled => "CANCELLED",
    }
);

wire_enum!(
    IssueType, "issue type" {
        Risk => "RISK",
        Issue => "ISSUE",
        ChangeRequest => "CHANGE_REQUEST",
        Dependency => "DEPENDENCY",
    }
);

wire_enum!(
    IssuePriority, "priority" {
        Low => "LOW",
        Medium => "MEDIUM",
        High => "HIGH",
        Critical => "CRITICAL",
    }
);

wire_enum!(
    IssueStatus, "issue status" {
        Open => "OPEN",
        InProgress => "IN_PROGRESS",
        Resolved => "RESOLVED",
        Closed => "CLOSED",
        Reopened => "REOPENED",
    }
);

wire_enum!(
    /// Shared by milestones and detail plans.
    PlanStatus, "plan status" {
        Pending => "PENDING",
        InProgress => "IN_PROGRESS",
        Completed => "COMPLETED",
        Delayed => "DELAYED",
        Cancelled => "CANCELLED",
    }
);

/// What an issue status change does to `resolved_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedAtChange {
    Stamp,
    Clear,
    Keep,
}

impl IssueStatus {
    /// `resolved_at` is set iff the status is `RESOLVED`.
    pub fn resolved_at_change(from: IssueStatus, to: IssueStatus) -> ResolvedAtChange {
        match (from == IssueStatus::Resolved, to == IssueStatus::Resolved) {
            (false, true) => ResolvedAtChange::Stamp,
            (true, false) => ResolvedAtChange::Clear,
            _ => ResolvedAtChange::Keep,
        }
    }
}

// ── Entities ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub name: String,
    pub role: UserRole,
    pub department_id: Option<String>,
    pub company_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// The user fields exposed in tokens responses and nested includes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: UserRole,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role,
        }
    }
}

/// A row of the user picker list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserListItem {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: UserRole,
    pub department_id: Option<String>,
    pub company_id: Option<String>,
}

impl From<User> for UserListItem {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            role: user.role,
            department_id: user.department_id,
            company_id: user.company_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub id: String,
    pub name: String,
    pub code: String,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanySummary {
    pub id: String,
    pub name: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Department {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub order: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentSummary {
    pub id: String,
    pub name: String,
}

impl From<&Department> for DepartmentSummary {
    fn from(dept: &Department) -> Self {
        Self {
            id: dept.id.clone(),
            name: dept.name.clone(),
        }
    }
}

/// A department with its direct relations, as returned by the list view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentWithRelations {
    #[serde(flatten)]
    pub department: Department,
    pub parent: Option<DepartmentSummary>,
    pub children: Vec<DepartmentSummary>,
    pub users: Vec<UserSummary>,
}

/// One node of the department forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentNode {
    #[serde(flatten)]
    pub department: Department,
    pub children: Vec<DepartmentNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessSystem {
    pub id: String,
    pub name: String,
    pub code: String,
    pub purpose: Option<String>,
    pub is_product: bool,
    pub department: Option<String>,
    pub description: Option<String>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessSystemWithProjects {
    #[serde(flatten)]
    pub system: BusinessSystem,
    pub projects: Vec<ProjectSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub code: String,
    pub status: ProjectStatus,
    pub description: Option<String>,
    pub start_date: Option<String>,
    pub planned_end_date: Option<String>,
    pub actual_end_date: Option<String>,
    pub implementer_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    pub id: String,
    pub name: String,
    pub code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectCounts {
    pub members: i64,
    pub milestones: i64,
    pub issues: i64,
}

/// Row of the project list view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectListItem {
    #[serde(flatten)]
    pub project: Project,
    pub implementer: Option<CompanySummary>,
    #[serde(rename = "_count")]
    pub count: ProjectCounts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMember {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub role: String,
    pub join_date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberWithUser {
    #[serde(flatten)]
    pub member: ProjectMember,
    pub user: UserSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub planned_date: String,
    pub actual_date: Option<String>,
    pub status: PlanStatus,
    pub description: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailPlan {
    pub id: String,
    pub milestone_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub plan_type: String,
    pub start_date: String,
    pub end_date: String,
    pub status: PlanStatus,
    pub description: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneWithPlans {
    #[serde(flatten)]
    pub milestone: Milestone,
    pub detail_plans: Vec<DetailPlan>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub priority: IssuePriority,
    pub status: IssueStatus,
    pub due_date: Option<String>,
    pub resolved_at: Option<String>,
    pub assignee_id: Option<String>,
    pub reporter_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueWithProject {
    #[serde(flatten)]
    pub issue: Issue,
    pub project: ProjectSummary,
}

/// Full project view with every include the detail page renders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub project: Project,
    pub implementer: Option<Company>,
    pub members: Vec<MemberWithUser>,
    pub milestones: Vec<MilestoneWithPlans>,
    pub issues: Vec<Issue>,
    pub business_systems: Vec<BusinessSystem>,
}

// ── Filters ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct IssueFilter {
    pub project_id: Option<String>,
    pub issue_type: Option<IssueType>,
    pub status: Option<IssueStatus>,
    pub priority: Option<IssuePriority>,
}

/// Status equality plus case-insensitive substring over name and code.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub status: Option<String>,
    pub search: Option<String>,
}

// ── Dashboard ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectStats {
    pub total: i64,
    pub planning: i64,
    pub ongoing: i64,
    pub completed: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueStats {
    pub total: i64,
    pub open: i64,
    pub in_progress: i64,
    pub resolved: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardView {
    pub projects: ProjectStats,
    pub issues: IssueStats,
    pub recent_projects: Vec<Project>,
    pub recent_issues: Vec<IssueWithProject>,
}
