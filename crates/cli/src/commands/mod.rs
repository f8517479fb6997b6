pub mod config;
pub mod contract;
pub mod decision;
pub mod migrate;
pub mod query;
pub mod submit;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use contractflow_core::approvals::{
    AnyRoleHolder, ApprovalWorkflowEngine, RequestContext, RoleAuthorizer, RoleDirectory,
};
use contractflow_core::audit::TracingAuditSink;
use contractflow_core::config::{AppConfig, LoadOptions};
use contractflow_core::errors::{ErrorKind, WorkflowError};
use contractflow_db::{
    connect_with_settings, migrations, DbPool, SqlApprovalStore, SqlContractStore, SqlUnitOfWork,
};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// Options shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub config_path: Option<PathBuf>,
    pub correlation_id: Option<String>,
}

impl GlobalOptions {
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            config_path: self.config_path.clone(),
            require_file: self.config_path.is_some(),
            ..LoadOptions::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<&'static str>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            correlation_id: None,
            data: None,
            hint: None,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn success_with_data(
        command: &str,
        message: impl Into<String>,
        correlation_id: &str,
        data: &impl Serialize,
    ) -> Self {
        let data = match serde_json::to_value(data) {
            Ok(data) => data,
            Err(error) => {
                return Self::failure(command, "serialization", error.to_string(), 1);
            }
        };
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            correlation_id: Some(correlation_id.to_string()),
            data: Some(data),
            hint: None,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            correlation_id: None,
            data: None,
            hint: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    pub fn workflow_failure(command: &str, error: WorkflowError, correlation_id: &str) -> Self {
        let response = error.into_response(correlation_id);
        let hint = response.user_message();
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(response.kind.as_str().to_string()),
            message: response.message,
            correlation_id: Some(response.correlation_id),
            data: None,
            hint: Some(hint),
        };
        Self { exit_code: exit_code_for(response.kind), output: serialize_payload(payload) }
    }
}

/// Exit codes 2..=5 are setup failures; workflow failures start at 10.
pub fn exit_code_for(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::NotFound => 10,
        ErrorKind::Conflict => 11,
        ErrorKind::Forbidden => 12,
        ErrorKind::InvalidInput => 13,
        ErrorKind::Dependency => 14,
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Everything a workflow command needs for one invocation.
pub struct Session {
    pub config: AppConfig,
    pub pool: DbPool,
    pub contracts: Arc<SqlContractStore>,
    pub engine: ApprovalWorkflowEngine,
    pub ctx: RequestContext,
}

/// Failure of a workflow command, either while setting up or in the engine.
pub enum CommandFailure {
    Setup { error_class: &'static str, message: String, exit_code: u8 },
    Workflow(WorkflowError),
}

impl From<WorkflowError> for CommandFailure {
    fn from(error: WorkflowError) -> Self {
        Self::Workflow(error)
    }
}

impl CommandFailure {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::Setup {
            error_class: "invalid_input",
            message: message.into(),
            exit_code: exit_code_for(ErrorKind::InvalidInput),
        }
    }
}

/// A successful workflow command: a message plus the JSON data to print.
pub struct CommandOutput {
    pub message: String,
    pub data: Value,
}

impl CommandOutput {
    pub fn new(message: impl Into<String>, data: &impl Serialize) -> Result<Self, CommandFailure> {
        let data = serde_json::to_value(data).map_err(|error| CommandFailure::Setup {
            error_class: "serialization",
            message: error.to_string(),
            exit_code: 1,
        })?;
        Ok(Self { message: message.into(), data })
    }
}

/// Loads config, opens the database, applies pending migrations and hands a
/// ready engine to `operation`.
pub fn run_in_session<F, Fut>(command: &str, options: &GlobalOptions, operation: F) -> CommandResult
where
    F: FnOnce(Session) -> Fut,
    Fut: Future<Output = Result<CommandOutput, CommandFailure>>,
{
    let config = match AppConfig::load(options.load_options()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                command,
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let correlation_id = options
        .correlation_id
        .clone()
        .unwrap_or_else(|| RequestContext::generated().correlation_id);

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| CommandFailure::Setup {
            error_class: "db_connectivity",
            message: error.to_string(),
            exit_code: 4,
        })?;
        migrations::run_pending(&pool).await.map_err(|error| CommandFailure::Setup {
            error_class: "migration",
            message: error.to_string(),
            exit_code: 5,
        })?;

        let session = open_session(config, pool.clone(), &correlation_id);
        let outcome = operation(session).await;
        pool.close().await;
        outcome
    });

    match result {
        Ok(output) => {
            CommandResult::success_with_data(command, output.message, &correlation_id, &output.data)
        }
        Err(CommandFailure::Setup { error_class, message, exit_code }) => {
            CommandResult::failure(command, error_class, message, exit_code)
        }
        Err(CommandFailure::Workflow(error)) => {
            CommandResult::workflow_failure(command, error, &correlation_id)
        }
    }
}

fn open_session(config: AppConfig, pool: DbPool, correlation_id: &str) -> Session {
    // An empty `[roles]` table means role checks are delegated elsewhere.
    let roles: Arc<dyn RoleAuthorizer> = if config.roles.is_empty() {
        warn!(
            event_name = "config.roles_unconfigured",
            correlation_id,
            "no [roles] table configured; role-gated steps accept any approver"
        );
        Arc::new(AnyRoleHolder)
    } else {
        Arc::new(RoleDirectory::new(config.roles.clone()))
    };

    let contracts = Arc::new(SqlContractStore::new(pool.clone()));
    let engine = ApprovalWorkflowEngine::new(
        contracts.clone(),
        Arc::new(SqlApprovalStore::new(pool.clone())),
        Arc::new(SqlUnitOfWork::new(pool.clone())),
        roles,
    )
    .with_audit_sink(Arc::new(TracingAuditSink))
    .with_default_steps(config.workflow.default_steps.clone())
    .with_max_page_size(config.workflow.max_page_size);

    let ctx =
        RequestContext::new(correlation_id).with_timeout(config.workflow.request_timeout());

    Session { config, pool, contracts, engine, ctx }
}
