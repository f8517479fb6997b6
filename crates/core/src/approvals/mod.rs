pub mod authorization;
pub mod context;
pub mod engine;
pub mod store;

pub use authorization::{AnyRoleHolder, RoleAuthorizer, RoleDirectory};
pub use context::RequestContext;
pub use engine::{ApprovalWorkflowEngine, SubmitRequest, DEFAULT_MAX_PAGE_SIZE};
pub use store::{
    ApprovalCommit, ApprovalStore, ApprovalUnitOfWork, ApprovalWrite, CommitError, ContractStore,
    SequentialUnitOfWork, StoreError,
};

use crate::domain::approval::StepTemplate;

pub const DEPARTMENT_MANAGER_ROLE: &str = "department_manager";
pub const HR_ROLE: &str = "hr";

/// Chain applied when a submission does not bring its own steps: the
/// department manager signs off first, then HR.
pub fn default_steps() -> Vec<StepTemplate> {
    vec![
        StepTemplate::for_role(1, "Department Manager Approval", DEPARTMENT_MANAGER_ROLE),
        StepTemplate::for_role(2, "HR Approval", HR_ROLE),
    ]
}

#[cfg(test)]
mod tests {
    use super::default_steps;

    #[test]
    fn default_chain_is_manager_then_hr() {
        let steps = default_steps();

        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].step_order, 1);
        assert_eq!(steps[0].approver_role.as_deref(), Some("department_manager"));
        assert_eq!(steps[1].step_order, 2);
        assert_eq!(steps[1].approver_role.as_deref(), Some("hr"));
        assert!(steps.iter().all(|step| step.approver_user_id.is_none()));
    }
}
