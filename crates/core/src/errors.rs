use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::approvals::store::StoreError;
use crate::domain::approval::{ApprovalId, ApprovalStatus};
use crate::domain::contract::ContractId;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid approval chain: {0}")]
    InvalidStepChain(String),
    #[error("no pending step found at level {level} for approval {approval_id}")]
    NoPendingStep { approval_id: ApprovalId, level: u32 },
    #[error("approval {approval_id} is already {status}")]
    AlreadyTerminal { approval_id: ApprovalId, status: ApprovalStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Forbidden,
    Dependency,
    InvalidInput,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Forbidden => "forbidden",
            Self::Dependency => "dependency",
            Self::InvalidInput => "invalid_input",
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("contract {0} was not found")]
    ContractNotFound(ContractId),
    #[error("approval {0} was not found")]
    ApprovalNotFound(ApprovalId),
    #[error("contract {0} already has pending approval")]
    AlreadyPending(ContractId),
    #[error("approval {approval_id} was modified concurrently; reload and retry")]
    ConcurrentModification { approval_id: ApprovalId },
    #[error(
        "user `{approver_id}` is not authorized to process step {step_order} of approval {approval_id}; expected approver: {expected}"
    )]
    NotAuthorized {
        approval_id: ApprovalId,
        step_order: u32,
        approver_id: String,
        expected: String,
    },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
    #[error(
        "approval {approval_id} was saved but contract {contract_id} status was not synchronized: {source}"
    )]
    ContractOutOfSync {
        approval_id: ApprovalId,
        contract_id: ContractId,
        #[source]
        source: StoreError,
    },
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ContractNotFound(_) | Self::ApprovalNotFound(_) => ErrorKind::NotFound,
            Self::AlreadyPending(_) | Self::ConcurrentModification { .. } => ErrorKind::Conflict,
            Self::NotAuthorized { .. } => ErrorKind::Forbidden,
            Self::InvalidInput(_) | Self::Domain(DomainError::InvalidStepChain(_)) => {
                ErrorKind::InvalidInput
            }
            Self::Domain(DomainError::NoPendingStep { .. })
            | Self::Domain(DomainError::AlreadyTerminal { .. }) => ErrorKind::Conflict,
            Self::Domain(DomainError::InvariantViolation(_)) => ErrorKind::Dependency,
            Self::Store(StoreError::Conflict(_)) => ErrorKind::Conflict,
            Self::Store(StoreError::NotFound(_)) => ErrorKind::NotFound,
            Self::Store(_) | Self::ContractOutOfSync { .. } => ErrorKind::Dependency,
        }
    }

    pub fn into_response(self, correlation_id: impl Into<String>) -> ErrorResponse {
        ErrorResponse {
            kind: self.kind(),
            message: self.to_string(),
            correlation_id: correlation_id.into(),
        }
    }
}

/// Structured error returned to callers of the workflow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    pub message: String,
    pub correlation_id: String,
}

impl ErrorResponse {
    pub fn user_message(&self) -> &'static str {
        match self.kind {
            ErrorKind::NotFound => "The requested contract or approval does not exist.",
            ErrorKind::Conflict => {
                "The approval is not in a state that allows this action. Reload and try again."
            }
            ErrorKind::Forbidden => "You are not the designated approver for this step.",
            ErrorKind::Dependency => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            ErrorKind::InvalidInput => {
                "The request could not be processed. Check inputs and try again."
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::approvals::store::StoreError;
    use crate::domain::approval::{ApprovalId, ApprovalStatus};
    use crate::domain::contract::ContractId;
    use crate::errors::{DomainError, ErrorKind, WorkflowError};

    #[test]
    fn missing_records_map_to_not_found() {
        assert_eq!(WorkflowError::ContractNotFound(ContractId(7)).kind(), ErrorKind::NotFound);
        assert_eq!(
            WorkflowError::ApprovalNotFound(ApprovalId("APR-1".to_owned())).kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn invalid_transitions_map_to_conflict() {
        let terminal = WorkflowError::from(DomainError::AlreadyTerminal {
            approval_id: ApprovalId("APR-1".to_owned()),
            status: ApprovalStatus::Approved,
        });
        assert_eq!(terminal.kind(), ErrorKind::Conflict);
        assert_eq!(WorkflowError::AlreadyPending(ContractId(7)).kind(), ErrorKind::Conflict);
        assert_eq!(
            WorkflowError::Store(StoreError::Conflict("unique".to_owned())).kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn forbidden_message_names_expected_approver() {
        let error = WorkflowError::NotAuthorized {
            approval_id: ApprovalId("APR-1".to_owned()),
            step_order: 1,
            approver_id: "mgr2".to_owned(),
            expected: "Maria Gomez (mgr1)".to_owned(),
        };

        assert_eq!(error.kind(), ErrorKind::Forbidden);
        assert!(error.to_string().contains("expected approver: Maria Gomez (mgr1)"));
    }

    #[test]
    fn out_of_sync_is_a_dependency_failure_with_correlation() {
        let response = WorkflowError::ContractOutOfSync {
            approval_id: ApprovalId("APR-1".to_owned()),
            contract_id: ContractId(7),
            source: StoreError::Backend("disk I/O error".to_owned()),
        }
        .into_response("req-9");

        assert_eq!(response.kind, ErrorKind::Dependency);
        assert_eq!(response.correlation_id, "req-9");
        assert!(response.message.contains("not synchronized"));
        assert_eq!(
            response.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }
}
