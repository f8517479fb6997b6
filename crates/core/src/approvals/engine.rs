use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::approvals::authorization::RoleAuthorizer;
use crate::approvals::context::RequestContext;
use crate::approvals::default_steps;
use crate::approvals::store::{
    ApprovalCommit, ApprovalStore, ApprovalUnitOfWork, ApprovalWrite, CommitError, ContractStore,
    StoreError,
};
use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use crate::domain::approval::{
    ApprovalId, ApprovalProgress, ApprovalRecord, ApprovalStep, StepTemplate,
};
use crate::domain::contract::{Contract, ContractId, ContractStatus};
use crate::domain::page::{Page, PageRequest};
use crate::errors::{DomainError, ErrorKind, WorkflowError};

pub const DEFAULT_MAX_PAGE_SIZE: u32 = 100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmitRequest {
    pub contract_id: ContractId,
    pub requested_by: String,
    pub comments: Option<String>,
    /// Replaces the default chain when present and non-empty.
    pub custom_steps: Option<Vec<StepTemplate>>,
}

impl SubmitRequest {
    pub fn new(contract_id: ContractId, requested_by: impl Into<String>) -> Self {
        Self { contract_id, requested_by: requested_by.into(), comments: None, custom_steps: None }
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = Some(comments.into());
        self
    }

    pub fn with_custom_steps(mut self, steps: Vec<StepTemplate>) -> Self {
        self.custom_steps = Some(steps);
        self
    }
}

/// Drives contract approval records through submit, approve and reject, and
/// keeps the contract status in step with the record lifecycle.
pub struct ApprovalWorkflowEngine {
    contracts: Arc<dyn ContractStore>,
    approvals: Arc<dyn ApprovalStore>,
    unit_of_work: Arc<dyn ApprovalUnitOfWork>,
    roles: Arc<dyn RoleAuthorizer>,
    audit: Arc<dyn AuditSink>,
    default_steps: Vec<StepTemplate>,
    max_page_size: u32,
}

impl ApprovalWorkflowEngine {
    /// `roles` decides role-gated steps; pass
    /// [`AnyRoleHolder`](crate::approvals::AnyRoleHolder) only when role
    /// checks happen before the engine is reached.
    pub fn new(
        contracts: Arc<dyn ContractStore>,
        approvals: Arc<dyn ApprovalStore>,
        unit_of_work: Arc<dyn ApprovalUnitOfWork>,
        roles: Arc<dyn RoleAuthorizer>,
    ) -> Self {
        Self {
            contracts,
            approvals,
            unit_of_work,
            roles,
            audit: Arc::new(TracingAuditSink),
            default_steps: default_steps(),
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Chain used when a submission carries no custom steps. An empty list
    /// keeps the built-in two-step chain.
    pub fn with_default_steps(mut self, steps: Vec<StepTemplate>) -> Self {
        if !steps.is_empty() {
            self.default_steps = steps;
        }
        self
    }

    pub fn with_max_page_size(mut self, max_page_size: u32) -> Self {
        self.max_page_size = max_page_size.max(1);
        self
    }

    pub async fn submit(
        &self,
        ctx: &RequestContext,
        request: SubmitRequest,
    ) -> Result<ApprovalRecord, WorkflowError> {
        let actor = request.requested_by.clone();
        let contract_id = request.contract_id;
        let result = self.submit_inner(ctx, request).await;

        match &result {
            Ok(record) => {
                info!(
                    event_name = "approval.submitted",
                    correlation_id = %ctx.correlation_id,
                    approval_id = %record.id,
                    contract_id = %record.contract_id,
                    max_approval_level = record.max_approval_level,
                    "approval submitted"
                );
                self.audit.emit(
                    self.success_event(
                        ctx,
                        "approval.submitted",
                        AuditCategory::Submission,
                        &actor,
                        record,
                    )
                    .with_metadata("max_approval_level", record.max_approval_level.to_string()),
                );
            }
            Err(failure) => self.report_failure(
                ctx,
                "approval.submit_failed",
                &actor,
                None,
                Some(contract_id),
                failure,
            ),
        }

        result
    }

    async fn submit_inner(
        &self,
        ctx: &RequestContext,
        request: SubmitRequest,
    ) -> Result<ApprovalRecord, WorkflowError> {
        let mut contract = self.load_contract(ctx, request.contract_id).await?;

        let existing =
            ctx.bounded(self.approvals.get_pending_by_contract_id(request.contract_id)).await?;
        if existing.is_some() {
            return Err(WorkflowError::AlreadyPending(request.contract_id));
        }

        let templates = match request.custom_steps {
            Some(steps) if !steps.is_empty() => steps,
            _ => self.default_steps.clone(),
        };

        let now = Utc::now();
        let record = ApprovalRecord::open(
            request.contract_id,
            request.requested_by,
            request.comments,
            templates,
            now,
        )?;
        contract.set_status(ContractStatus::Pending, now);

        self.commit(
            ctx,
            ApprovalCommit { approval: ApprovalWrite::Insert(record), contract: Some(contract) },
        )
        .await
    }

    /// Approves the step at the current level. The final approval completes
    /// the record and activates the contract.
    pub async fn approve(
        &self,
        ctx: &RequestContext,
        approval_id: &ApprovalId,
        approver_id: &str,
        comments: Option<String>,
    ) -> Result<ApprovalRecord, WorkflowError> {
        let result = self.approve_inner(ctx, approval_id, approver_id, comments).await;

        match &result {
            Ok((record, progress)) => {
                let (event_name, next_level) = match progress {
                    ApprovalProgress::Advanced { level } => ("approval.step_approved", *level),
                    ApprovalProgress::Completed => ("approval.approved", record.max_approval_level),
                };
                info!(
                    event_name,
                    correlation_id = %ctx.correlation_id,
                    approval_id = %record.id,
                    contract_id = %record.contract_id,
                    approver_id,
                    current_approval_level = next_level,
                    "approval step processed"
                );
                self.audit.emit(
                    self.success_event(
                        ctx,
                        event_name,
                        AuditCategory::Decision,
                        approver_id,
                        record,
                    )
                    .with_metadata("current_approval_level", next_level.to_string())
                    .with_metadata("status", record.status.as_str()),
                );
            }
            Err(failure) => self.report_failure(
                ctx,
                "approval.approve_failed",
                approver_id,
                Some(approval_id),
                None,
                failure,
            ),
        }

        result.map(|(record, _)| record)
    }

    async fn approve_inner(
        &self,
        ctx: &RequestContext,
        approval_id: &ApprovalId,
        approver_id: &str,
        comments: Option<String>,
    ) -> Result<(ApprovalRecord, ApprovalProgress), WorkflowError> {
        let mut record = self.load_approval(ctx, approval_id).await?;

        let Some(step) = record.current_step() else {
            return Err(match record.is_terminal() {
                true => DomainError::AlreadyTerminal {
                    approval_id: record.id.clone(),
                    status: record.status,
                },
                false => DomainError::NoPendingStep {
                    approval_id: record.id.clone(),
                    level: record.current_approval_level,
                },
            }
            .into());
        };
        self.authorize(&record, step, approver_id)?;

        let now = Utc::now();
        let progress = record.approve_current(approver_id, comments, now)?;

        let contract = match progress {
            ApprovalProgress::Advanced { .. } => None,
            ApprovalProgress::Completed => {
                let mut contract = self.load_contract(ctx, record.contract_id).await?;
                contract.set_status(ContractStatus::Active, now);
                Some(contract)
            }
        };

        let record = self
            .commit(ctx, ApprovalCommit { approval: ApprovalWrite::Update(record), contract })
            .await?;
        Ok((record, progress))
    }

    /// Rejects the record regardless of who is acting or which step is
    /// current. The contract goes back to `Pending`.
    pub async fn reject(
        &self,
        ctx: &RequestContext,
        approval_id: &ApprovalId,
        approver_id: &str,
        reason: &str,
    ) -> Result<ApprovalRecord, WorkflowError> {
        let result = self.reject_inner(ctx, approval_id, approver_id, reason).await;

        match &result {
            Ok(record) => {
                info!(
                    event_name = "approval.rejected",
                    correlation_id = %ctx.correlation_id,
                    approval_id = %record.id,
                    contract_id = %record.contract_id,
                    approver_id,
                    current_approval_level = record.current_approval_level,
                    "approval rejected"
                );
                self.audit.emit(
                    self.success_event(
                        ctx,
                        "approval.rejected",
                        AuditCategory::Decision,
                        approver_id,
                        record,
                    )
                    .with_metadata("reason", reason)
                    .with_metadata(
                        "current_approval_level",
                        record.current_approval_level.to_string(),
                    ),
                );
            }
            Err(failure) => self.report_failure(
                ctx,
                "approval.reject_failed",
                approver_id,
                Some(approval_id),
                None,
                failure,
            ),
        }

        result
    }

    async fn reject_inner(
        &self,
        ctx: &RequestContext,
        approval_id: &ApprovalId,
        approver_id: &str,
        reason: &str,
    ) -> Result<ApprovalRecord, WorkflowError> {
        if reason.trim().is_empty() {
            return Err(WorkflowError::InvalidInput("a rejection reason is required".to_string()));
        }

        let mut record = self.load_approval(ctx, approval_id).await?;

        let now = Utc::now();
        record.reject(approver_id, reason.trim(), now)?;

        // Rejection hands the contract back to `Pending`, not a dedicated state.
        let mut contract = self.load_contract(ctx, record.contract_id).await?;
        contract.set_status(ContractStatus::Pending, now);

        self.commit(
            ctx,
            ApprovalCommit { approval: ApprovalWrite::Update(record), contract: Some(contract) },
        )
        .await
    }

    /// Pending records whose current step names `approver_user_id` or one of
    /// `approver_roles`.
    pub async fn get_pending_approvals(
        &self,
        ctx: &RequestContext,
        approver_user_id: &str,
        approver_roles: &[String],
        page: PageRequest,
    ) -> Result<Page<ApprovalRecord>, WorkflowError> {
        let page = page.normalized(self.max_page_size);
        let query =
            self.approvals.get_pending_for_approver(approver_user_id, Some(approver_roles), page);
        Ok(ctx.bounded(query).await?)
    }

    /// Pending records whose current step designates `approver_user_id`
    /// exactly. Role-gated steps never match.
    pub async fn get_pending_approvals_for_user(
        &self,
        ctx: &RequestContext,
        approver_user_id: &str,
        page: PageRequest,
    ) -> Result<Page<ApprovalRecord>, WorkflowError> {
        let page = page.normalized(self.max_page_size);
        let query = self.approvals.get_pending_for_approver(approver_user_id, None, page);
        Ok(ctx.bounded(query).await?)
    }

    pub async fn get_approval_by_id(
        &self,
        ctx: &RequestContext,
        approval_id: &ApprovalId,
    ) -> Result<ApprovalRecord, WorkflowError> {
        self.load_approval(ctx, approval_id).await
    }

    /// Steps of the contract's non-terminal record, ordered by `step_order`.
    ///
    /// Finished records are not found by this lookup and yield an empty list;
    /// use [`ApprovalWorkflowEngine::list_approvals_for_contract`] for the
    /// complete history.
    pub async fn get_approval_history(
        &self,
        ctx: &RequestContext,
        contract_id: ContractId,
    ) -> Result<Vec<ApprovalStep>, WorkflowError> {
        let record = ctx.bounded(self.approvals.get_pending_by_contract_id(contract_id)).await?;

        let mut steps = record.map(|record| record.steps).unwrap_or_default();
        steps.sort_by_key(|step| step.step_order);
        Ok(steps)
    }

    /// Every approval record opened for the contract, newest first.
    pub async fn list_approvals_for_contract(
        &self,
        ctx: &RequestContext,
        contract_id: ContractId,
    ) -> Result<Vec<ApprovalRecord>, WorkflowError> {
        let records = ctx.bounded(self.approvals.list_by_contract_id(contract_id)).await?;
        Ok(records)
    }

    fn authorize(
        &self,
        record: &ApprovalRecord,
        step: &ApprovalStep,
        approver_id: &str,
    ) -> Result<(), WorkflowError> {
        let allowed = match (step.designated_approver(), step.approver_role.as_deref()) {
            (Some(designated), _) => designated == approver_id,
            (None, Some(role)) => self.roles.has_role(approver_id, role),
            (None, None) => true,
        };

        if allowed {
            return Ok(());
        }

        Err(WorkflowError::NotAuthorized {
            approval_id: record.id.clone(),
            step_order: step.step_order,
            approver_id: approver_id.to_string(),
            expected: step.expected_approver(),
        })
    }

    async fn load_contract(
        &self,
        ctx: &RequestContext,
        contract_id: ContractId,
    ) -> Result<Contract, WorkflowError> {
        ctx.bounded(self.contracts.get_by_id(contract_id))
            .await?
            .ok_or(WorkflowError::ContractNotFound(contract_id))
    }

    async fn load_approval(
        &self,
        ctx: &RequestContext,
        approval_id: &ApprovalId,
    ) -> Result<ApprovalRecord, WorkflowError> {
        ctx.bounded(self.approvals.get_by_id_with_steps(approval_id))
            .await?
            .ok_or_else(|| WorkflowError::ApprovalNotFound(approval_id.clone()))
    }

    async fn commit(
        &self,
        ctx: &RequestContext,
        commit: ApprovalCommit,
    ) -> Result<ApprovalRecord, WorkflowError> {
        commit.approval.record().check_invariants()?;
        let inserting = matches!(commit.approval, ApprovalWrite::Insert(_));
        let contract_id = commit.approval.record().contract_id;
        let approval_id = commit.approval.record().id.clone();

        // The unit of work applies the deadline per write; see `ApprovalUnitOfWork`.
        match self.unit_of_work.commit(ctx, commit).await {
            Ok(record) => Ok(record),
            Err(CommitError::Store(StoreError::Conflict(_))) if inserting => {
                Err(WorkflowError::AlreadyPending(contract_id))
            }
            Err(CommitError::Store(StoreError::Conflict(_))) => {
                Err(WorkflowError::ConcurrentModification { approval_id })
            }
            Err(CommitError::Store(source)) => Err(WorkflowError::Store(source)),
            Err(CommitError::ContractWrite { approval, source }) => {
                error!(
                    event_name = "approval.contract_out_of_sync",
                    correlation_id = %ctx.correlation_id,
                    approval_id = %approval.id,
                    contract_id = %approval.contract_id,
                    approval_status = approval.status.as_str(),
                    error = %source,
                    "approval persisted but contract status was not synchronized"
                );
                Err(WorkflowError::ContractOutOfSync {
                    approval_id: approval.id,
                    contract_id: approval.contract_id,
                    source,
                })
            }
        }
    }

    fn success_event(
        &self,
        ctx: &RequestContext,
        event_type: &str,
        category: AuditCategory,
        actor: &str,
        record: &ApprovalRecord,
    ) -> AuditEvent {
        AuditEvent::new(
            Some(record.id.clone()),
            Some(record.contract_id),
            ctx.correlation_id.clone(),
            event_type,
            category,
            actor,
            AuditOutcome::Success,
        )
    }

    fn report_failure(
        &self,
        ctx: &RequestContext,
        event_type: &str,
        actor: &str,
        approval_id: Option<&ApprovalId>,
        contract_id: Option<ContractId>,
        failure: &WorkflowError,
    ) {
        let kind = failure.kind();
        let (category, outcome) = match kind {
            ErrorKind::Forbidden => (AuditCategory::Authorization, AuditOutcome::Rejected),
            ErrorKind::Dependency => (AuditCategory::Persistence, AuditOutcome::Failed),
            ErrorKind::NotFound | ErrorKind::Conflict | ErrorKind::InvalidInput => {
                (AuditCategory::Decision, AuditOutcome::Rejected)
            }
        };

        warn!(
            event_name = event_type,
            correlation_id = %ctx.correlation_id,
            approval_id = approval_id.map(|id| id.0.as_str()).unwrap_or("unknown"),
            contract_id = contract_id.map(|id| id.0),
            actor,
            error_kind = kind.as_str(),
            error = %failure,
            "approval operation failed"
        );

        self.audit.emit(
            AuditEvent::new(
                approval_id.cloned(),
                contract_id,
                ctx.correlation_id.clone(),
                event_type,
                category,
                actor,
                outcome,
            )
            .with_metadata("error_kind", kind.as_str())
            .with_metadata("error", failure.to_string()),
        );
    }
}
