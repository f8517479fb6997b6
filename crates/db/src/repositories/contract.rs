use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use contractflow_core::approvals::store::{ContractStore, StoreError};
use contractflow_core::domain::contract::{Contract, ContractId, ContractStatus};

use super::{column, format_timestamp, parse_optional_date, parse_timestamp, RepositoryError};
use crate::DbPool;

const CONTRACT_COLUMNS: &str = "id, contract_number, employee_id, title, status, start_date,
     end_date, created_at, updated_at";

pub struct SqlContractStore {
    pool: DbPool,
}

impl SqlContractStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Registers a contract. Contract maintenance lives outside the workflow,
    /// so this is only used by the CLI and tests.
    pub async fn insert(&self, contract: &Contract) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO contract (id, contract_number, employee_id, title, status, start_date,
                                   end_date, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(contract.id.0)
        .bind(&contract.contract_number)
        .bind(contract.employee_id)
        .bind(&contract.title)
        .bind(contract.status.as_str())
        .bind(contract.start_date.map(|date| date.format("%Y-%m-%d").to_string()))
        .bind(contract.end_date.map(|date| date.format("%Y-%m-%d").to_string()))
        .bind(format_timestamp(contract.created_at))
        .bind(format_timestamp(contract.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_contract(row: &SqliteRow) -> Result<Contract, RepositoryError> {
    let id: i64 = column(row, "id")?;
    let status: String = column(row, "status")?;
    let created_at: String = column(row, "created_at")?;
    let updated_at: String = column(row, "updated_at")?;

    Ok(Contract {
        id: ContractId(id),
        contract_number: column(row, "contract_number")?,
        employee_id: column(row, "employee_id")?,
        title: column(row, "title")?,
        status: status
            .parse::<ContractStatus>()
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        start_date: parse_optional_date("start_date", column(row, "start_date")?)?,
        end_date: parse_optional_date("end_date", column(row, "end_date")?)?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

pub(crate) async fn fetch_contract(
    conn: &mut SqliteConnection,
    id: ContractId,
) -> Result<Option<Contract>, RepositoryError> {
    let row = sqlx::query(&format!("SELECT {CONTRACT_COLUMNS} FROM contract WHERE id = ?"))
        .bind(id.0)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(row_to_contract).transpose()
}

/// Writes the workflow-owned column and the touch timestamp.
pub(crate) async fn update_contract_status(
    conn: &mut SqliteConnection,
    contract: &Contract,
) -> Result<(), RepositoryError> {
    let result = sqlx::query("UPDATE contract SET status = ?, updated_at = ? WHERE id = ?")
        .bind(contract.status.as_str())
        .bind(format_timestamp(contract.updated_at))
        .bind(contract.id.0)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::NotFound(format!("contract {}", contract.id)));
    }

    Ok(())
}

#[async_trait]
impl ContractStore for SqlContractStore {
    async fn get_by_id(&self, id: ContractId) -> Result<Option<Contract>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        Ok(fetch_contract(&mut conn, id).await?)
    }

    async fn update(&self, contract: Contract) -> Result<Contract, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        update_contract_status(&mut conn, &contract).await?;
        Ok(contract)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use contractflow_core::approvals::store::{ContractStore, StoreError};
    use contractflow_core::domain::contract::{Contract, ContractId, ContractStatus};

    use super::SqlContractStore;
    use crate::{connect_with_settings, migrations};

    async fn store() -> SqlContractStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlContractStore::new(pool)
    }

    #[tokio::test]
    async fn insert_then_load_keeps_every_field() {
        let store = store().await;
        let mut contract =
            Contract::new(ContractId(11), "EMP-2024-011", 42, "Backend Engineer", Utc::now());
        contract.start_date = NaiveDate::from_ymd_opt(2024, 4, 1);

        store.insert(&contract).await.expect("insert");
        let loaded = store.get_by_id(ContractId(11)).await.expect("load").expect("present");

        assert_eq!(loaded.contract_number, "EMP-2024-011");
        assert_eq!(loaded.employee_id, 42);
        assert_eq!(loaded.status, ContractStatus::Draft);
        assert_eq!(loaded.start_date, NaiveDate::from_ymd_opt(2024, 4, 1));
        assert_eq!(loaded.end_date, None);
    }

    #[tokio::test]
    async fn update_writes_status_and_reports_missing_rows() {
        let store = store().await;
        let mut contract = Contract::new(ContractId(12), "EMP-2024-012", 7, "Analyst", Utc::now());
        store.insert(&contract).await.expect("insert");

        contract.set_status(ContractStatus::Pending, Utc::now());
        store.update(contract.clone()).await.expect("update");
        let loaded = store.get_by_id(ContractId(12)).await.expect("load").expect("present");
        assert_eq!(loaded.status, ContractStatus::Pending);

        let ghost = Contract::new(ContractId(99), "EMP-0", 1, "Ghost", Utc::now());
        let error = store.update(ghost).await.expect_err("missing contract");
        assert!(matches!(error, StoreError::NotFound(_)));
    }
}
