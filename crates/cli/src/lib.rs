pub mod commands;
pub mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use commands::contract::CreateContract;
use commands::query::PendingArgs;
use commands::submit::SubmitArgs;
use commands::{CommandResult, GlobalOptions};

#[derive(Debug, Parser)]
#[command(
    name = "contractflow",
    about = "Contractflow operator CLI",
    long_about = "Submit employment contracts for multi-step approval, record decisions, and inspect approval queues.",
    after_help = "Examples:\n  contractflow migrate\n  contractflow contract create 7 EMP-2024-007 --employee-id 42 --title Engineer\n  contractflow submit 7 --requested-by alice\n  contractflow approve <approval-id> --approver mgr1\n  contractflow pending mgr1 --role department_manager"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a contractflow.toml file (must exist)")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Correlation id attached to logs, audit events, and output")]
    correlation_id: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(subcommand, about = "Register or inspect contracts")]
    Contract(ContractCommand),
    #[command(about = "Open an approval for a contract using the default or a custom chain")]
    Submit(SubmitCommand),
    #[command(about = "Approve the current step of an approval")]
    Approve {
        approval_id: String,
        #[arg(long)]
        approver: String,
        #[arg(long)]
        comments: Option<String>,
    },
    #[command(about = "Reject an approval with a reason")]
    Reject {
        approval_id: String,
        #[arg(long)]
        approver: String,
        #[arg(long)]
        reason: String,
    },
    #[command(about = "List approvals waiting on a user or one of their roles")]
    Pending(PendingCommand),
    #[command(about = "Show one approval with its steps")]
    Show { approval_id: String },
    #[command(about = "Show the approval steps of a contract")]
    History {
        contract_id: i64,
        #[arg(long, help = "Include finished approvals, newest first")]
        all: bool,
    },
}

#[derive(Debug, Subcommand)]
enum ContractCommand {
    #[command(about = "Register a draft contract")]
    Create {
        id: i64,
        contract_number: String,
        #[arg(long)]
        employee_id: i64,
        #[arg(long)]
        title: String,
        #[arg(long, help = "Start date as YYYY-MM-DD")]
        start_date: Option<NaiveDate>,
        #[arg(long, help = "End date as YYYY-MM-DD")]
        end_date: Option<NaiveDate>,
    },
    #[command(about = "Show a contract and its status")]
    Show { id: i64 },
}

#[derive(Debug, Args)]
struct SubmitCommand {
    contract_id: i64,
    #[arg(long)]
    requested_by: String,
    #[arg(long)]
    comments: Option<String>,
    #[arg(long, help = "JSON file with the custom step chain")]
    steps_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct PendingCommand {
    user: String,
    #[arg(long = "role", help = "Role held by the user; repeatable. Defaults to the [roles] table")]
    roles: Vec<String>,
    #[arg(long, help = "Only steps that name the user directly", conflicts_with = "roles")]
    designated_only: bool,
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long)]
    page_size: Option<u32>,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = GlobalOptions { config_path: cli.config, correlation_id: cli.correlation_id };
    logging::init(&options);

    let result = execute(&options, cli.command);

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

fn execute(options: &GlobalOptions, command: Command) -> CommandResult {
    match command {
        Command::Migrate => commands::migrate::run(options),
        Command::Config => {
            CommandResult { exit_code: 0, output: commands::config::run(options) }
        }
        Command::Contract(ContractCommand::Create {
            id,
            contract_number,
            employee_id,
            title,
            start_date,
            end_date,
        }) => commands::contract::create(
            options,
            CreateContract { id, contract_number, employee_id, title, start_date, end_date },
        ),
        Command::Contract(ContractCommand::Show { id }) => commands::contract::show(options, id),
        Command::Submit(args) => commands::submit::run(
            options,
            SubmitArgs {
                contract_id: args.contract_id,
                requested_by: args.requested_by,
                comments: args.comments,
                steps_file: args.steps_file,
            },
        ),
        Command::Approve { approval_id, approver, comments } => {
            commands::decision::approve(options, approval_id, approver, comments)
        }
        Command::Reject { approval_id, approver, reason } => {
            commands::decision::reject(options, approval_id, approver, reason)
        }
        Command::Pending(args) => commands::query::pending(
            options,
            PendingArgs {
                user: args.user,
                roles: args.roles,
                designated_only: args.designated_only,
                page: args.page,
                page_size: args.page_size,
            },
        ),
        Command::Show { approval_id } => commands::query::show(options, approval_id),
        Command::History { contract_id, all } => {
            commands::query::history(options, contract_id, all)
        }
    }
}
