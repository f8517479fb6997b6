use std::collections::{BTreeMap, HashMap, HashSet};

/// External role check consulted for steps without a designated approver.
pub trait RoleAuthorizer: Send + Sync {
    fn has_role(&self, user_id: &str, role: &str) -> bool;
}

/// Lets every caller act on role-gated steps.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnyRoleHolder;

impl RoleAuthorizer for AnyRoleHolder {
    fn has_role(&self, _user_id: &str, _role: &str) -> bool {
        true
    }
}

/// Static user-to-roles assignments, usually loaded from configuration.
#[derive(Clone, Debug, Default)]
pub struct RoleDirectory {
    assignments: HashMap<String, HashSet<String>>,
}

impl RoleDirectory {
    pub fn new(assignments: BTreeMap<String, Vec<String>>) -> Self {
        let assignments = assignments
            .into_iter()
            .map(|(user, roles)| {
                (normalize_key(&user), roles.iter().map(|role| normalize_key(role)).collect())
            })
            .collect();

        Self { assignments }
    }

    pub fn assign(&mut self, user_id: &str, role: &str) {
        self.assignments.entry(normalize_key(user_id)).or_default().insert(normalize_key(role));
    }

    /// Roles held by the user, sorted for stable output.
    pub fn roles_for(&self, user_id: &str) -> Vec<String> {
        let mut roles: Vec<String> = self
            .assignments
            .get(&normalize_key(user_id))
            .map(|roles| roles.iter().cloned().collect())
            .unwrap_or_default();
        roles.sort();
        roles
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

impl RoleAuthorizer for RoleDirectory {
    fn has_role(&self, user_id: &str, role: &str) -> bool {
        self.assignments
            .get(&normalize_key(user_id))
            .is_some_and(|roles| roles.contains(&normalize_key(role)))
    }
}

fn normalize_key(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{AnyRoleHolder, RoleAuthorizer, RoleDirectory};

    fn directory() -> RoleDirectory {
        let mut assignments = BTreeMap::new();
        assignments.insert("mgr1".to_string(), vec!["Department_Manager".to_string()]);
        assignments.insert("hr1".to_string(), vec!["hr".to_string(), "payroll".to_string()]);
        RoleDirectory::new(assignments)
    }

    #[test]
    fn role_lookup_is_case_insensitive() {
        let directory = directory();
        assert!(directory.has_role("MGR1", "department_manager"));
        assert!(directory.has_role("hr1", "HR"));
        assert!(!directory.has_role("mgr1", "hr"));
        assert!(!directory.has_role("unknown", "hr"));
    }

    #[test]
    fn roles_for_is_sorted() {
        assert_eq!(directory().roles_for("hr1"), vec!["hr".to_string(), "payroll".to_string()]);
        assert!(directory().roles_for("nobody").is_empty());
    }

    #[test]
    fn assign_adds_roles_incrementally() {
        let mut directory = RoleDirectory::default();
        assert!(directory.is_empty());
        directory.assign("mgr2", "department_manager");
        assert!(directory.has_role("mgr2", "department_manager"));
    }

    #[test]
    fn any_role_holder_permits_everyone() {
        assert!(AnyRoleHolder.has_role("anyone", "hr"));
    }
}
