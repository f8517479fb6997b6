use contractflow_core::approvals::RoleDirectory;
use contractflow_core::domain::approval::ApprovalId;
use contractflow_core::domain::contract::ContractId;
use contractflow_core::domain::page::PageRequest;

use crate::commands::{run_in_session, CommandOutput, CommandResult, GlobalOptions};

#[derive(Debug, Clone)]
pub struct PendingArgs {
    pub user: String,
    /// Roles to match besides the user id. Empty means "look them up in `[roles]`".
    pub roles: Vec<String>,
    pub designated_only: bool,
    pub page: u32,
    pub page_size: Option<u32>,
}

pub fn pending(options: &GlobalOptions, args: PendingArgs) -> CommandResult {
    run_in_session("pending", options, |session| async move {
        let page_size = args.page_size.unwrap_or(session.config.workflow.default_page_size);
        let request = PageRequest::new(args.page, page_size);

        let page = if args.designated_only {
            session.engine.get_pending_approvals_for_user(&session.ctx, &args.user, request).await?
        } else {
            let roles = if args.roles.is_empty() {
                RoleDirectory::new(session.config.roles.clone()).roles_for(&args.user)
            } else {
                args.roles
            };
            session.engine.get_pending_approvals(&session.ctx, &args.user, &roles, request).await?
        };

        CommandOutput::new(
            format!(
                "{} pending approval(s) for {}; page {} of {}",
                page.total_count,
                args.user,
                page.page_number,
                page.total_pages().max(1)
            ),
            &page,
        )
    })
}

pub fn show(options: &GlobalOptions, approval_id: String) -> CommandResult {
    run_in_session("show", options, |session| async move {
        let record =
            session.engine.get_approval_by_id(&session.ctx, &ApprovalId(approval_id)).await?;

        CommandOutput::new(
            format!(
                "approval {} is {} at level {} of {}",
                record.id,
                record.status,
                record.current_approval_level,
                record.max_approval_level
            ),
            &record,
        )
    })
}

/// Steps of the pending record, or with `all` every record ever opened.
pub fn history(options: &GlobalOptions, contract_id: i64, all: bool) -> CommandResult {
    run_in_session("history", options, |session| async move {
        let contract_id = ContractId(contract_id);
        if all {
            let records =
                session.engine.list_approvals_for_contract(&session.ctx, contract_id).await?;
            return CommandOutput::new(
                format!("{} approval record(s) for contract {contract_id}", records.len()),
                &records,
            );
        }

        let steps = session.engine.get_approval_history(&session.ctx, contract_id).await?;
        CommandOutput::new(
            format!("{} step(s) on the pending approval of contract {contract_id}", steps.len()),
            &steps,
        )
    })
}
