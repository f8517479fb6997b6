use contractflow_core::domain::approval::{ApprovalId, ApprovalStatus};

use crate::commands::{run_in_session, CommandOutput, CommandResult, GlobalOptions};

pub fn approve(
    options: &GlobalOptions,
    approval_id: String,
    approver_id: String,
    comments: Option<String>,
) -> CommandResult {
    run_in_session("approve", options, |session| async move {
        let approval_id = ApprovalId(approval_id);
        let record =
            session.engine.approve(&session.ctx, &approval_id, &approver_id, comments).await?;

        let message = match record.status {
            ApprovalStatus::Approved => {
                format!(
                    "approval {} completed; contract {} is active",
                    record.id, record.contract_id
                )
            }
            _ => format!(
                "step approved; approval {} now waits on level {} of {}",
                record.id, record.current_approval_level, record.max_approval_level
            ),
        };
        CommandOutput::new(message, &record)
    })
}

pub fn reject(
    options: &GlobalOptions,
    approval_id: String,
    approver_id: String,
    reason: String,
) -> CommandResult {
    run_in_session("reject", options, |session| async move {
        let approval_id = ApprovalId(approval_id);
        let record =
            session.engine.reject(&session.ctx, &approval_id, &approver_id, &reason).await?;

        CommandOutput::new(
            format!("approval {} rejected by {approver_id}", record.id),
            &record,
        )
    })
}
