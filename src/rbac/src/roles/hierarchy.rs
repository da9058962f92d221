//! Role hierarchy graph
//!
//! Every role has at most one parent, so the hierarchy is a forest as long
//! as no parent chain loops back on itself. This module checks that with a
//! three-state DFS and answers ancestor/descendant queries for the store.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::{RbacError, Result};
use crate::types::{Role, RoleId};

/// DFS visit state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unvisited,
    Visiting,
    Done,
}

/// Parent links of a set of roles
#[derive(Debug, Clone, Default)]
pub struct RoleGraph {
    parents: HashMap<RoleId, Option<RoleId>>,
}

impl RoleGraph {
    pub fn from_roles<'a>(roles: impl IntoIterator<Item = &'a Role>) -> Self {
        Self {
            parents: roles
                .into_iter()
                .map(|role| (role.id.clone(), role.parent_role.clone()))
                .collect(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.parents.contains_key(id)
    }

    /// Override one role's parent link
    pub fn set_parent(&mut self, id: &str, parent: Option<&str>) {
        self.parents
            .insert(id.to_string(), parent.map(str::to_string));
    }

    /// Parent chain of a role, nearest first
    ///
    /// Stops at a dangling parent reference. A loop is reported as
    /// `HierarchyCycle`.
    pub fn ancestors(&self, id: &str) -> Result<Vec<RoleId>> {
        let mut chain = Vec::new();
        let mut seen: HashSet<&str> = HashSet::from([id]);
        let mut current = self.parent_of(id);

        while let Some(parent) = current {
            if !seen.insert(parent) {
                chain.push(parent.to_string());
                return Err(RbacError::HierarchyCycle(format!(
                    "{} -> {}",
                    id,
                    chain.join(" -> ")
                )));
            }
            if !self.contains(parent) {
                break;
            }
            chain.push(parent.to_string());
            current = self.parent_of(parent);
        }

        Ok(chain)
    }

    /// The role itself plus every role below it
    pub fn descendants(&self, id: &str) -> HashSet<RoleId> {
        let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
        for (child, parent) in &self.parents {
            if let Some(parent) = parent {
                children.entry(parent.as_str()).or_default().push(child.as_str());
            }
        }

        let mut result = HashSet::from([id.to_string()]);
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            for &child in children.get(current).into_iter().flatten() {
                if result.insert(child.to_string()) {
                    stack.push(child);
                }
            }
        }
        result
    }

    /// Check that re-parenting `id` under `parent` keeps the graph acyclic
    pub fn check_parent(&self, id: &str, parent: &str) -> Result<()> {
        if id == parent {
            return Err(RbacError::HierarchyCycle(format!("{} -> {}", id, parent)));
        }

        let mut path = vec![id.to_string(), parent.to_string()];
        let mut seen: HashSet<&str> = HashSet::from([parent]);
        let mut current = self.parent_of(parent);

        while let Some(next) = current {
            path.push(next.to_string());
            if next == id || !seen.insert(next) {
                return Err(RbacError::HierarchyCycle(path.join(" -> ")));
            }
            current = self.parent_of(next);
        }

        Ok(())
    }

    /// Reject the graph if any parent chain loops
    ///
    /// Three-state DFS: reaching a node that is still on the stack means
    /// the chain closed on itself.
    pub fn detect_cycle(&self) -> Result<()> {
        let mut state: HashMap<&str, Visit> = self
            .parents
            .keys()
            .map(|id| (id.as_str(), Visit::Unvisited))
            .collect();

        let mut ids: Vec<&str> = self.parents.keys().map(String::as_str).collect();
        ids.sort_unstable();

        for start in ids {
            if state[start] != Visit::Unvisited {
                continue;
            }

            let mut path: Vec<&str> = Vec::new();
            let mut current = Some(start);
            while let Some(node) = current {
                match state.get(node).copied() {
                    Some(Visit::Visiting) => {
                        let from = path.iter().position(|n| *n == node).unwrap_or(0);
                        let mut cycle: Vec<&str> = path[from..].to_vec();
                        cycle.push(node);
                        return Err(RbacError::HierarchyCycle(cycle.join(" -> ")));
                    }
                    Some(Visit::Done) | None => break,
                    Some(Visit::Unvisited) => {
                        state.insert(node, Visit::Visiting);
                        path.push(node);
                        current = self.parent_of(node);
                    }
                }
            }

            for node in path {
                state.insert(node, Visit::Done);
            }
        }

        Ok(())
    }

    fn parent_of(&self, id: &str) -> Option<&str> {
        self.parents.get(id).and_then(|p| p.as_deref())
    }
}

/// Recompute every role's `children` from the parent links
pub fn rebuild_children(roles: &mut [Role]) {
    let mut children: HashMap<RoleId, BTreeSet<RoleId>> = HashMap::new();
    for role in roles.iter() {
        if let Some(parent) = &role.parent_role {
            children
                .entry(parent.clone())
                .or_default()
                .insert(role.id.clone());
        }
    }

    for role in roles.iter_mut() {
        role.children = children.remove(&role.id).unwrap_or_default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RoleConfig;
    use chrono::Utc;

    fn role(id: &str, parent: Option<&str>) -> Role {
        let now = Utc::now();
        let config = RoleConfig::new(id);
        Role {
            id: id.to_string(),
            name: config.name,
            description: String::new(),
            permissions: BTreeSet::new(),
            parent_role: parent.map(str::to_string),
            children: BTreeSet::new(),
            level: 0,
            is_active: true,
            is_system: false,
            scope: Default::default(),
            scope_data: Default::default(),
            expires_at: None,
            max_users: None,
            created_at: now,
            updated_at: now,
            created_by: "test".to_string(),
        }
    }

    #[test]
    fn test_ancestors_nearest_first() {
        let roles = vec![
            role("guest", None),
            role("user", Some("guest")),
            role("manager", Some("user")),
        ];
        let graph = RoleGraph::from_roles(&roles);

        assert_eq!(graph.ancestors("manager").unwrap(), vec!["user", "guest"]);
        assert!(graph.ancestors("guest").unwrap().is_empty());
    }

    #[test]
    fn test_dangling_parent_ends_chain() {
        let roles = vec![role("orphan", Some("deleted"))];
        let graph = RoleGraph::from_roles(&roles);
        assert!(graph.ancestors("orphan").unwrap().is_empty());
    }

    #[test]
    fn test_descendants() {
        let roles = vec![
            role("a", None),
            role("b", Some("a")),
            role("c", Some("b")),
            role("d", Some("a")),
            role("e", None),
        ];
        let graph = RoleGraph::from_roles(&roles);

        let below_a = graph.descendants("a");
        assert_eq!(below_a.len(), 4);
        assert!(!below_a.contains("e"));
        assert_eq!(graph.descendants("c"), HashSet::from(["c".to_string()]));
    }

    #[test]
    fn test_check_parent_rejects_self_and_descendant() {
        let roles = vec![role("a", None), role("b", Some("a")), role("c", Some("b"))];
        let graph = RoleGraph::from_roles(&roles);

        assert!(matches!(graph.check_parent("a", "a"), Err(RbacError::HierarchyCycle(_))));
        assert!(matches!(graph.check_parent("a", "c"), Err(RbacError::HierarchyCycle(_))));
        assert!(graph.check_parent("c", "a").is_ok());
    }

    #[test]
    fn test_detect_cycle() {
        let acyclic = vec![role("a", None), role("b", Some("a"))];
        assert!(RoleGraph::from_roles(&acyclic).detect_cycle().is_ok());

        let cyclic = vec![role("a", Some("c")), role("b", Some("a")), role("c", Some("b"))];
        let err = RoleGraph::from_roles(&cyclic).detect_cycle().unwrap_err();
        match err {
            RbacError::HierarchyCycle(path) => assert!(path.starts_with("a -> c")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_rebuild_children() {
        let mut roles = vec![role("a", None), role("b", Some("a")), role("c", Some("a"))];
        roles[0].children.insert("stale".to_string());

        rebuild_children(&mut roles);
        assert_eq!(
            roles[0].children,
            BTreeSet::from(["b".to_string(), "c".to_string()])
        );
        assert!(roles[1].children.is_empty());
    }
}
