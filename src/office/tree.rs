//! Department hierarchy assembly.

use std::collections::HashMap;

use super::models::{Department, DepartmentNode};

/// Build the department forest from a flat list.
///
/// Departments are grouped by parent id and expanded from the roots
/// (departments without a parent). Siblings are ordered by `order`, then by
/// name. Each group is taken out of the index once it is expanded, so every
/// department appears at most once even if the stored links were cyclic.
/// Departments whose parent is not in the list are unreachable and omitted.
pub fn build_tree(departments: Vec<Department>) -> Vec<DepartmentNode> {
    let mut by_parent: HashMap<Option<String>, Vec<Department>> = HashMap::new();
    for dept in departments {
        by_parent.entry(dept.parent_id.clone()).or_default().push(dept);
    }
    for siblings in by_parent.values_mut() {
        siblings.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));
    }
    expand(&mut by_parent, None)
}

fn expand(
    by_parent: &mut HashMap<Option<String>, Vec<Department>>,
    parent_id: Option<String>,
) -> Vec<DepartmentNode> {
    let Some(siblings) = by_parent.remove(&parent_id) else {
        return Vec::new();
    };
    siblings
        .into_iter()
        .map(|department| {
            let children = expand(by_parent, Some(department.id.clone()));
            DepartmentNode {
                department,
                children,
            }
        })
        .collect()
}

/// Whether re-parenting `id` under `new_parent` would create a cycle.
///
/// `parent_of` maps each department id to its current parent.
pub fn would_create_cycle(
    parent_of: &HashMap<String, Option<String>>,
    id: &str,
    new_parent: &str,
) -> bool {
    let mut current = Some(new_parent.to_string());
    let mut steps = 0;
    while let Some(ancestor) = current {
        if ancestor == id {
            return true;
        }
        steps += 1;
        if steps > parent_of.len() {
            // Already-corrupt data; refuse rather than loop.
            return true;
        }
        current = parent_of.get(&ancestor).cloned().flatten();
    }
    false
}
