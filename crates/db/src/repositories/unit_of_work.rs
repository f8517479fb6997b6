use async_trait::async_trait;

use contractflow_core::approvals::context::RequestContext;
use contractflow_core::approvals::store::{
    ApprovalCommit, ApprovalUnitOfWork, ApprovalWrite, CommitError, StoreError,
};
use contractflow_core::domain::approval::ApprovalRecord;

use super::approval::{insert_approval, update_approval};
use super::contract::update_contract_status;
use super::RepositoryError;
use crate::DbPool;

/// Writes the approval and the contract status inside one SQLite
/// transaction, so a failed contract write leaves nothing behind. The
/// deadline bounds the whole transaction; dropping it on a lapse rolls back.
pub struct SqlUnitOfWork {
    pool: DbPool,
}

impl SqlUnitOfWork {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn commit_in_transaction(
        &self,
        commit: ApprovalCommit,
    ) -> Result<ApprovalRecord, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let saved = match commit.approval {
            ApprovalWrite::Insert(record) => insert_approval(&mut tx, record).await?,
            ApprovalWrite::Update(record) => update_approval(&mut tx, record).await?,
        };

        if let Some(contract) = commit.contract {
            update_contract_status(&mut tx, &contract).await?;
        }

        tx.commit().await?;
        Ok(saved)
    }
}

#[async_trait]
impl ApprovalUnitOfWork for SqlUnitOfWork {
    async fn commit(
        &self,
        ctx: &RequestContext,
        commit: ApprovalCommit,
    ) -> Result<ApprovalRecord, CommitError> {
        ctx.bounded(async {
            self.commit_in_transaction(commit).await.map_err(StoreError::from)
        })
        .await
        .map_err(CommitError::Store)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use contractflow_core::approvals::context::RequestContext;
    use contractflow_core::approvals::store::{
        ApprovalCommit, ApprovalStore, ApprovalUnitOfWork, ApprovalWrite, CommitError,
        ContractStore, StoreError,
    };
    use contractflow_core::domain::approval::{ApprovalRecord, StepTemplate};
    use contractflow_core::domain::contract::{Contract, ContractId, ContractStatus};

    use super::SqlUnitOfWork;
    use crate::repositories::{SqlApprovalStore, SqlContractStore};
    use crate::{connect_with_settings, migrations};

    fn record(contract_id: i64) -> ApprovalRecord {
        ApprovalRecord::open(
            ContractId(contract_id),
            "alice",
            None,
            vec![StepTemplate::for_role(1, "HR Approval", "hr")],
            Utc::now(),
        )
        .expect("open")
    }

    #[tokio::test]
    async fn approval_and_contract_commit_together() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let contracts = SqlContractStore::new(pool.clone());
        let mut contract = Contract::new(ContractId(5), "EMP-5", 1, "Engineer", Utc::now());
        contracts.insert(&contract).await.expect("insert contract");

        contract.set_status(ContractStatus::Pending, Utc::now());
        let saved = SqlUnitOfWork::new(pool.clone())
            .commit(
                &RequestContext::new("req-5"),
                ApprovalCommit {
                    approval: ApprovalWrite::Insert(record(5)),
                    contract: Some(contract),
                },
            )
            .await
            .expect("commit");

        let loaded = contracts.get_by_id(ContractId(5)).await.expect("load").expect("present");
        assert_eq!(loaded.status, ContractStatus::Pending);
        assert_eq!(saved.version, 1);
    }

    #[tokio::test]
    async fn failed_contract_write_rolls_back_the_approval() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlContractStore::new(pool.clone())
            .insert(&Contract::new(ContractId(6), "EMP-6", 1, "Engineer", Utc::now()))
            .await
            .expect("insert contract");

        let missing = Contract::new(ContractId(404), "EMP-404", 1, "Nobody", Utc::now());
        let error = SqlUnitOfWork::new(pool.clone())
            .commit(
                &RequestContext::new("req-6"),
                ApprovalCommit {
                    approval: ApprovalWrite::Insert(record(6)),
                    contract: Some(missing),
                },
            )
            .await
            .expect_err("contract write should fail");

        assert!(matches!(error, CommitError::Store(StoreError::NotFound(_))));
        let pending = SqlApprovalStore::new(pool)
            .get_pending_by_contract_id(ContractId(6))
            .await
            .expect("query");
        assert!(pending.is_none(), "approval insert must be rolled back");
    }
}
