use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use contractflow_core::approvals::context::RequestContext;
use contractflow_core::approvals::store::{
    ApprovalCommit, ApprovalStore, ApprovalUnitOfWork, ApprovalWrite, CommitError, ContractStore,
    StoreError,
};
use contractflow_core::domain::approval::{ApprovalId, ApprovalRecord};
use contractflow_core::domain::contract::{Contract, ContractId};
use contractflow_core::domain::page::{Page, PageRequest};

#[derive(Default)]
struct State {
    contracts: BTreeMap<ContractId, Contract>,
    approvals: HashMap<String, StoredApproval>,
    next_sequence: u64,
}

struct StoredApproval {
    sequence: u64,
    record: ApprovalRecord,
}

impl State {
    fn pending_for_contract(&self, contract_id: ContractId) -> Option<&StoredApproval> {
        self.approvals
            .values()
            .filter(|stored| {
                stored.record.contract_id == contract_id && !stored.record.is_terminal()
            })
            .max_by_key(|stored| (stored.record.requested_at, stored.sequence))
    }

    fn check_insert(&self, record: &ApprovalRecord) -> Result<(), StoreError> {
        if self.approvals.contains_key(&record.id.0) {
            return Err(StoreError::Conflict(format!("approval {} already exists", record.id)));
        }
        if !record.is_terminal() && self.pending_for_contract(record.contract_id).is_some() {
            return Err(StoreError::Conflict(format!(
                "contract {} already has a pending approval",
                record.contract_id
            )));
        }
        Ok(())
    }

    fn check_update(&self, record: &ApprovalRecord) -> Result<(), StoreError> {
        match self.approvals.get(&record.id.0) {
            None => Err(StoreError::NotFound(format!("approval {}", record.id))),
            Some(stored) if stored.record.version != record.version => {
                Err(StoreError::Conflict(format!(
                    "approval {} changed since version {}",
                    record.id, record.version
                )))
            }
            Some(_) => Ok(()),
        }
    }

    fn check_contract(&self, contract: &Contract) -> Result<(), StoreError> {
        if self.contracts.contains_key(&contract.id) {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("contract {}", contract.id)))
        }
    }

    fn insert(&mut self, mut record: ApprovalRecord) -> ApprovalRecord {
        record.version = 1;
        self.next_sequence += 1;
        self.approvals.insert(
            record.id.0.clone(),
            StoredApproval { sequence: self.next_sequence, record: record.clone() },
        );
        record
    }

    fn replace(&mut self, mut record: ApprovalRecord) -> ApprovalRecord {
        record.version += 1;
        if let Some(stored) = self.approvals.get_mut(&record.id.0) {
            stored.record = record.clone();
        }
        record
    }
}

/// Contracts and approvals behind a single lock, so that
/// [`ApprovalUnitOfWork::commit`] is atomic without a database.
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    state: RwLock<State>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_contract(&self, contract: Contract) {
        let mut state = self.state.write().await;
        state.contracts.insert(contract.id, contract);
    }
}

#[async_trait]
impl ContractStore for InMemoryWorkflowStore {
    async fn get_by_id(&self, id: ContractId) -> Result<Option<Contract>, StoreError> {
        let state = self.state.read().await;
        Ok(state.contracts.get(&id).cloned())
    }

    async fn update(&self, contract: Contract) -> Result<Contract, StoreError> {
        let mut state = self.state.write().await;
        state.check_contract(&contract)?;
        state.contracts.insert(contract.id, contract.clone());
        Ok(contract)
    }
}

#[async_trait]
impl ApprovalStore for InMemoryWorkflowStore {
    async fn get_pending_by_contract_id(
        &self,
        contract_id: ContractId,
    ) -> Result<Option<ApprovalRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state.pending_for_contract(contract_id).map(|stored| stored.record.clone()))
    }

    async fn get_by_id_with_steps(
        &self,
        id: &ApprovalId,
    ) -> Result<Option<ApprovalRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state.approvals.get(&id.0).map(|stored| stored.record.clone()))
    }

    async fn add(&self, record: ApprovalRecord) -> Result<ApprovalRecord, StoreError> {
        let mut state = self.state.write().await;
        state.check_insert(&record)?;
        Ok(state.insert(record))
    }

    async fn update(&self, record: ApprovalRecord) -> Result<ApprovalRecord, StoreError> {
        let mut state = self.state.write().await;
        state.check_update(&record)?;
        Ok(state.replace(record))
    }

    async fn get_pending_for_approver(
        &self,
        user_id: &str,
        roles: Option<&[String]>,
        page: PageRequest,
    ) -> Result<Page<ApprovalRecord>, StoreError> {
        let state = self.state.read().await;

        let mut matching: Vec<&StoredApproval> = state
            .approvals
            .values()
            .filter(|stored| {
                stored.record.current_step().is_some_and(|step| {
                    step.approver_user_id.as_deref() == Some(user_id)
                        || roles.is_some_and(|roles| {
                            step.approver_role
                                .as_ref()
                                .is_some_and(|role| roles.iter().any(|held| held == role))
                        })
                })
            })
            .collect();
        matching.sort_by_key(|stored| (stored.record.requested_at, stored.sequence));

        let total = matching.len() as u64;
        let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        let items = matching
            .into_iter()
            .skip(offset)
            .take(page.limit() as usize)
            .map(|stored| stored.record.clone())
            .collect();

        Ok(Page::new(items, total, page))
    }

    async fn list_by_contract_id(
        &self,
        contract_id: ContractId,
    ) -> Result<Vec<ApprovalRecord>, StoreError> {
        let state = self.state.read().await;

        let mut records: Vec<&StoredApproval> = state
            .approvals
            .values()
            .filter(|stored| stored.record.contract_id == contract_id)
            .collect();
        records.sort_by_key(|stored| {
            std::cmp::Reverse((stored.record.requested_at, stored.sequence))
        });

        Ok(records.into_iter().map(|stored| stored.record.clone()).collect())
    }
}

#[async_trait]
impl ApprovalUnitOfWork for InMemoryWorkflowStore {
    async fn commit(
        &self,
        ctx: &RequestContext,
        commit: ApprovalCommit,
    ) -> Result<ApprovalRecord, CommitError> {
        // Nothing is written until the lock is held, so a lapse here is clean.
        let mut state = ctx.bounded(async { Ok::<_, StoreError>(self.state.write().await) }).await?;

        match &commit.approval {
            ApprovalWrite::Insert(record) => state.check_insert(record)?,
            ApprovalWrite::Update(record) => state.check_update(record)?,
        }
        if let Some(contract) = &commit.contract {
            state.check_contract(contract)?;
        }

        let saved = match commit.approval {
            ApprovalWrite::Insert(record) => state.insert(record),
            ApprovalWrite::Update(record) => state.replace(record),
        };
        if let Some(contract) = commit.contract {
            state.contracts.insert(contract.id, contract);
        }

        Ok(saved)
    }
}
