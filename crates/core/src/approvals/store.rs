//! Persistence seams the workflow engine depends on.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::approvals::context::RequestContext;
use crate::domain::approval::{ApprovalId, ApprovalRecord};
use crate::domain::contract::{Contract, ContractId};
use crate::domain::page::{Page, PageRequest};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("write conflict: {0}")]
    Conflict(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("store call exceeded the request deadline")]
    Timeout,
}

#[async_trait]
pub trait ContractStore: Send + Sync {
    async fn get_by_id(&self, id: ContractId) -> Result<Option<Contract>, StoreError>;

    /// Overwrites an existing contract; `StoreError::NotFound` when it is gone.
    async fn update(&self, contract: Contract) -> Result<Contract, StoreError>;
}

#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// The non-terminal record for a contract, if any.
    async fn get_pending_by_contract_id(
        &self,
        contract_id: ContractId,
    ) -> Result<Option<ApprovalRecord>, StoreError>;

    async fn get_by_id_with_steps(
        &self,
        id: &ApprovalId,
    ) -> Result<Option<ApprovalRecord>, StoreError>;

    /// Inserts a new record with `version = 1`.
    ///
    /// Fails with `StoreError::Conflict` when the contract already has a
    /// non-terminal record.
    async fn add(&self, record: ApprovalRecord) -> Result<ApprovalRecord, StoreError>;

    /// Compare-and-swap on `record.version`; the returned record carries the
    /// bumped version. A stale version fails with `StoreError::Conflict`.
    async fn update(&self, record: ApprovalRecord) -> Result<ApprovalRecord, StoreError>;

    /// Pending records whose current step is assigned to `user_id`, or to one
    /// of `roles` when supplied. Ordered by `requested_at` ascending.
    async fn get_pending_for_approver(
        &self,
        user_id: &str,
        roles: Option<&[String]>,
        page: PageRequest,
    ) -> Result<Page<ApprovalRecord>, StoreError>;

    /// Every record ever opened for the contract, newest first.
    async fn list_by_contract_id(
        &self,
        contract_id: ContractId,
    ) -> Result<Vec<ApprovalRecord>, StoreError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApprovalWrite {
    Insert(ApprovalRecord),
    Update(ApprovalRecord),
}

impl ApprovalWrite {
    pub fn record(&self) -> &ApprovalRecord {
        match self {
            Self::Insert(record) | Self::Update(record) => record,
        }
    }
}

/// One approval write plus the contract status change it implies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalCommit {
    pub approval: ApprovalWrite,
    pub contract: Option<Contract>,
}

#[derive(Debug, Error)]
pub enum CommitError {
    /// Nothing was persisted.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The approval write landed but the contract write did not.
    #[error("approval persisted but contract write failed: {source}")]
    ContractWrite { approval: Box<ApprovalRecord>, source: StoreError },
}

#[async_trait]
pub trait ApprovalUnitOfWork: Send + Sync {
    /// Persists the commit. Implementations apply `ctx`'s deadline themselves
    /// so that a lapse never leaves a split write unreported.
    async fn commit(
        &self,
        ctx: &RequestContext,
        commit: ApprovalCommit,
    ) -> Result<ApprovalRecord, CommitError>;
}

/// Unit of work over two independent stores with no shared transaction.
///
/// The approval is written first. A failed or timed out contract write
/// afterwards is reported as `CommitError::ContractWrite` and is not retried.
pub struct SequentialUnitOfWork {
    approvals: Arc<dyn ApprovalStore>,
    contracts: Arc<dyn ContractStore>,
}

impl SequentialUnitOfWork {
    pub fn new(approvals: Arc<dyn ApprovalStore>, contracts: Arc<dyn ContractStore>) -> Self {
        Self { approvals, contracts }
    }
}

#[async_trait]
impl ApprovalUnitOfWork for SequentialUnitOfWork {
    async fn commit(
        &self,
        ctx: &RequestContext,
        commit: ApprovalCommit,
    ) -> Result<ApprovalRecord, CommitError> {
        let approval = match commit.approval {
            ApprovalWrite::Insert(record) => ctx.bounded(self.approvals.add(record)).await?,
            ApprovalWrite::Update(record) => ctx.bounded(self.approvals.update(record)).await?,
        };

        if let Some(contract) = commit.contract {
            if let Err(source) = ctx.bounded(self.contracts.update(contract)).await {
                return Err(CommitError::ContractWrite { approval: Box::new(approval), source });
            }
        }

        Ok(approval)
    }
}
