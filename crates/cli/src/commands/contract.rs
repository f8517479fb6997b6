use chrono::{NaiveDate, Utc};
use contractflow_core::approvals::{ContractStore, StoreError};
use contractflow_core::domain::contract::{Contract, ContractId};
use contractflow_core::errors::WorkflowError;

use crate::commands::{run_in_session, CommandFailure, CommandOutput, CommandResult, GlobalOptions};

#[derive(Debug, Clone)]
pub struct CreateContract {
    pub id: i64,
    pub contract_number: String,
    pub employee_id: i64,
    pub title: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// Registers a draft contract so it can be submitted for approval.
pub fn create(options: &GlobalOptions, args: CreateContract) -> CommandResult {
    run_in_session("contract.create", options, |session| async move {
        if let (Some(start), Some(end)) = (args.start_date, args.end_date) {
            if end < start {
                return Err(CommandFailure::invalid_input(format!(
                    "end date {end} is before start date {start}"
                )));
            }
        }

        let mut contract = Contract::new(
            ContractId(args.id),
            args.contract_number,
            args.employee_id,
            args.title,
            Utc::now(),
        );
        contract.start_date = args.start_date;
        contract.end_date = args.end_date;

        session
            .contracts
            .insert(&contract)
            .await
            .map_err(|error| WorkflowError::Store(StoreError::from(error)))?;

        CommandOutput::new(format!("contract {} registered", contract.id), &contract)
    })
}

pub fn show(options: &GlobalOptions, id: i64) -> CommandResult {
    run_in_session("contract.show", options, |session| async move {
        let contract = session
            .contracts
            .get_by_id(ContractId(id))
            .await
            .map_err(WorkflowError::Store)?
            .ok_or(WorkflowError::ContractNotFound(ContractId(id)))?;

        CommandOutput::new(
            format!("contract {} is {}", contract.id, contract.status.as_str()),
            &contract,
        )
    })
}
