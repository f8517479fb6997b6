pub mod approvals;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;

pub use approvals::{
    default_steps, AnyRoleHolder, ApprovalStore, ApprovalUnitOfWork, ApprovalWorkflowEngine,
    ContractStore, RequestContext, RoleAuthorizer, RoleDirectory, SequentialUnitOfWork,
    StoreError, SubmitRequest,
};
pub use audit::{AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use config::{AppConfig, ConfigOverrides, LoadOptions, LogFormat};
pub use domain::approval::{
    ApprovalId, ApprovalRecord, ApprovalStatus, ApprovalStep, ApprovalStepId, StepTemplate,
};
pub use domain::contract::{Contract, ContractId, ContractStatus};
pub use domain::page::{Page, PageRequest};
pub use errors::{DomainError, ErrorKind, ErrorResponse, WorkflowError};
