use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

use contractflow_core::approvals::store::{ApprovalStore, StoreError};
use contractflow_core::domain::approval::{
    ApprovalId, ApprovalRecord, ApprovalStatus, ApprovalStep, ApprovalStepId,
};
use contractflow_core::domain::contract::ContractId;
use contractflow_core::domain::page::{Page, PageRequest};

use super::{
    column, format_timestamp, parse_optional_timestamp, parse_timestamp, to_u32, RepositoryError,
};
use crate::DbPool;

const RECORD_COLUMNS: &str = "r.id, r.contract_id, r.status, r.current_approval_level,
     r.max_approval_level, r.requested_by, r.requested_at, r.approved_by, r.approved_at,
     r.rejected_by, r.rejected_at, r.rejection_reason, r.comments, r.version";

const STEP_COLUMNS: &str = "id, step_order, step_name, approver_role, approver_user_id,
     approver_user_name, status, comments, processed_at, processed_by, due_date";

pub struct SqlApprovalStore {
    pool: DbPool,
}

impl SqlApprovalStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_status(raw: &str) -> Result<ApprovalStatus, RepositoryError> {
    raw.parse::<ApprovalStatus>().map_err(|e| RepositoryError::Decode(e.to_string()))
}

/// Record columns only; steps are attached by [`load_steps`].
fn row_to_record(row: &SqliteRow) -> Result<ApprovalRecord, RepositoryError> {
    let id: String = column(row, "id")?;
    let contract_id: i64 = column(row, "contract_id")?;
    let status: String = column(row, "status")?;
    let current_level: i64 = column(row, "current_approval_level")?;
    let max_level: i64 = column(row, "max_approval_level")?;
    let requested_at: String = column(row, "requested_at")?;

    Ok(ApprovalRecord {
        id: ApprovalId(id),
        contract_id: ContractId(contract_id),
        status: parse_status(&status)?,
        current_approval_level: to_u32("current_approval_level", current_level)?,
        max_approval_level: to_u32("max_approval_level", max_level)?,
        requested_by: column(row, "requested_by")?,
        requested_at: parse_timestamp("requested_at", &requested_at)?,
        approved_by: column(row, "approved_by")?,
        approved_at: parse_optional_timestamp("approved_at", column(row, "approved_at")?)?,
        rejected_by: column(row, "rejected_by")?,
        rejected_at: parse_optional_timestamp("rejected_at", column(row, "rejected_at")?)?,
        rejection_reason: column(row, "rejection_reason")?,
        comments: column(row, "comments")?,
        steps: Vec::new(),
        version: column(row, "version")?,
    })
}

fn row_to_step(row: &SqliteRow) -> Result<ApprovalStep, RepositoryError> {
    let id: String = column(row, "id")?;
    let step_order: i64 = column(row, "step_order")?;
    let status: String = column(row, "status")?;

    Ok(ApprovalStep {
        id: ApprovalStepId(id),
        step_order: to_u32("step_order", step_order)?,
        step_name: column(row, "step_name")?,
        approver_role: column(row, "approver_role")?,
        approver_user_id: column(row, "approver_user_id")?,
        approver_user_name: column(row, "approver_user_name")?,
        status: parse_status(&status)?,
        comments: column(row, "comments")?,
        processed_at: parse_optional_timestamp("processed_at", column(row, "processed_at")?)?,
        processed_by: column(row, "processed_by")?,
        due_date: parse_optional_timestamp("due_date", column(row, "due_date")?)?,
    })
}

async fn load_steps(
    conn: &mut SqliteConnection,
    approval_id: &ApprovalId,
) -> Result<Vec<ApprovalStep>, RepositoryError> {
    let rows = sqlx::query(&format!(
        "SELECT {STEP_COLUMNS} FROM approval_step WHERE approval_id = ? ORDER BY step_order ASC"
    ))
    .bind(&approval_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(row_to_step).collect()
}

async fn with_steps(
    conn: &mut SqliteConnection,
    rows: Vec<SqliteRow>,
) -> Result<Vec<ApprovalRecord>, RepositoryError> {
    let mut records = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut record = row_to_record(row)?;
        record.steps = load_steps(conn, &record.id).await?;
        records.push(record);
    }
    Ok(records)
}

pub(crate) async fn fetch_by_id(
    conn: &mut SqliteConnection,
    id: &ApprovalId,
) -> Result<Option<ApprovalRecord>, RepositoryError> {
    let row = sqlx::query(&format!("SELECT {RECORD_COLUMNS} FROM approval_record r WHERE r.id = ?"))
        .bind(&id.0)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(ref row) => {
            let mut record = row_to_record(row)?;
            record.steps = load_steps(conn, &record.id).await?;
            Ok(Some(record))
        }
        None => Ok(None),
    }
}

/// Inserts the record and its steps; the caller owns the surrounding
/// transaction.
pub(crate) async fn insert_approval(
    conn: &mut SqliteConnection,
    mut record: ApprovalRecord,
) -> Result<ApprovalRecord, RepositoryError> {
    record.version = 1;

    let inserted = sqlx::query(
        "INSERT INTO approval_record (id, contract_id, status, current_approval_level,
                                      max_approval_level, requested_by, requested_at,
                                      approved_by, approved_at, rejected_by, rejected_at,
                                      rejection_reason, comments, version)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&record.id.0)
    .bind(record.contract_id.0)
    .bind(record.status.as_str())
    .bind(i64::from(record.current_approval_level))
    .bind(i64::from(record.max_approval_level))
    .bind(&record.requested_by)
    .bind(format_timestamp(record.requested_at))
    .bind(&record.approved_by)
    .bind(record.approved_at.map(format_timestamp))
    .bind(&record.rejected_by)
    .bind(record.rejected_at.map(format_timestamp))
    .bind(&record.rejection_reason)
    .bind(&record.comments)
    .bind(record.version)
    .execute(&mut *conn)
    .await;

    match inserted {
        Ok(_) => {}
        Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
            return Err(RepositoryError::Conflict(format!(
                "contract {} already has a pending approval",
                record.contract_id
            )));
        }
        Err(error) => return Err(error.into()),
    }

    for step in &record.steps {
        sqlx::query(
            "INSERT INTO approval_step (id, approval_id, step_order, step_name, approver_role,
                                        approver_user_id, approver_user_name, status, comments,
                                        processed_at, processed_by, due_date)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&step.id.0)
        .bind(&record.id.0)
        .bind(i64::from(step.step_order))
        .bind(&step.step_name)
        .bind(&step.approver_role)
        .bind(&step.approver_user_id)
        .bind(&step.approver_user_name)
        .bind(step.status.as_str())
        .bind(&step.comments)
        .bind(step.processed_at.map(format_timestamp))
        .bind(&step.processed_by)
        .bind(step.due_date.map(format_timestamp))
        .execute(&mut *conn)
        .await?;
    }

    Ok(record)
}

/// Compare-and-swap on `version`, then rewrites the mutable step columns.
pub(crate) async fn update_approval(
    conn: &mut SqliteConnection,
    mut record: ApprovalRecord,
) -> Result<ApprovalRecord, RepositoryError> {
    let result = sqlx::query(
        "UPDATE approval_record
         SET status = ?, current_approval_level = ?, approved_by = ?, approved_at = ?,
             rejected_by = ?, rejected_at = ?, rejection_reason = ?, comments = ?,
             version = version + 1
         WHERE id = ? AND version = ?",
    )
    .bind(record.status.as_str())
    .bind(i64::from(record.current_approval_level))
    .bind(&record.approved_by)
    .bind(record.approved_at.map(format_timestamp))
    .bind(&record.rejected_by)
    .bind(record.rejected_at.map(format_timestamp))
    .bind(&record.rejection_reason)
    .bind(&record.comments)
    .bind(&record.id.0)
    .bind(record.version)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        let exists = sqlx::query("SELECT 1 AS present FROM approval_record WHERE id = ?")
            .bind(&record.id.0)
            .fetch_optional(&mut *conn)
            .await?
            .is_some();

        return Err(if exists {
            RepositoryError::Conflict(format!(
                "approval {} changed since version {}",
                record.id, record.version
            ))
        } else {
            RepositoryError::NotFound(format!("approval {}", record.id))
        });
    }

    for step in &record.steps {
        sqlx::query(
            "UPDATE approval_step
             SET status = ?, comments = ?, processed_at = ?, processed_by = ?
             WHERE id = ? AND approval_id = ?",
        )
        .bind(step.status.as_str())
        .bind(&step.comments)
        .bind(step.processed_at.map(format_timestamp))
        .bind(&step.processed_by)
        .bind(&step.id.0)
        .bind(&record.id.0)
        .execute(&mut *conn)
        .await?;
    }

    record.version += 1;
    Ok(record)
}

fn push_pending_filter(
    builder: &mut QueryBuilder<'_, Sqlite>,
    user_id: &str,
    roles: Option<&[String]>,
) {
    builder.push(
        " FROM approval_record r
          JOIN approval_step s
            ON s.approval_id = r.id AND s.step_order = r.current_approval_level
          WHERE r.status = 'pending' AND s.status = 'pending' AND (s.approver_user_id = ",
    );
    builder.push_bind(user_id.to_string());

    if let Some(roles) = roles.filter(|roles| !roles.is_empty()) {
        builder.push(" OR s.approver_role IN (");
        let mut separated = builder.separated(", ");
        for role in roles {
            separated.push_bind(role.clone());
        }
        separated.push_unseparated(")");
    }

    builder.push(")");
}

#[async_trait]
impl ApprovalStore for SqlApprovalStore {
    async fn get_pending_by_contract_id(
        &self,
        contract_id: ContractId,
    ) -> Result<Option<ApprovalRecord>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;

        let id: Option<String> = sqlx::query(
            "SELECT id FROM approval_record
             WHERE contract_id = ? AND status = 'pending'
             ORDER BY requested_at DESC
             LIMIT 1",
        )
        .bind(contract_id.0)
        .fetch_optional(&mut *conn)
        .await
        .map_err(RepositoryError::from)?
        .map(|row| row.try_get::<String, _>("id"))
        .transpose()
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        match id {
            Some(id) => Ok(fetch_by_id(&mut conn, &ApprovalId(id)).await?),
            None => Ok(None),
        }
    }

    async fn get_by_id_with_steps(
        &self,
        id: &ApprovalId,
    ) -> Result<Option<ApprovalRecord>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        Ok(fetch_by_id(&mut conn, id).await?)
    }

    async fn add(&self, record: ApprovalRecord) -> Result<ApprovalRecord, StoreError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;
        let saved = insert_approval(&mut tx, record).await?;
        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(saved)
    }

    async fn update(&self, record: ApprovalRecord) -> Result<ApprovalRecord, StoreError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;
        let saved = update_approval(&mut tx, record).await?;
        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(saved)
    }

    async fn get_pending_for_approver(
        &self,
        user_id: &str,
        roles: Option<&[String]>,
        page: PageRequest,
    ) -> Result<Page<ApprovalRecord>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;

        let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS count");
        push_pending_filter(&mut count_query, user_id, roles);
        let total: i64 = count_query
            .build()
            .fetch_one(&mut *conn)
            .await
            .map_err(RepositoryError::from)?
            .try_get("count")
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        let mut page_query = QueryBuilder::<Sqlite>::new(format!("SELECT {RECORD_COLUMNS}"));
        push_pending_filter(&mut page_query, user_id, roles);
        page_query.push(" ORDER BY r.requested_at ASC, r.rowid ASC LIMIT ");
        page_query.push_bind(i64::from(page.limit()));
        page_query.push(" OFFSET ");
        page_query.push_bind(i64::try_from(page.offset()).unwrap_or(i64::MAX));
        let rows = page_query.build().fetch_all(&mut *conn).await.map_err(RepositoryError::from)?;

        let items = with_steps(&mut conn, rows).await?;
        Ok(Page::new(items, total.max(0) as u64, page))
    }

    async fn list_by_contract_id(
        &self,
        contract_id: ContractId,
    ) -> Result<Vec<ApprovalRecord>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;

        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM approval_record r
             WHERE r.contract_id = ?
             ORDER BY r.requested_at DESC, r.rowid DESC"
        ))
        .bind(contract_id.0)
        .fetch_all(&mut *conn)
        .await
        .map_err(RepositoryError::from)?;

        Ok(with_steps(&mut conn, rows).await?)
    }
}
