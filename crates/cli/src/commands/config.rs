use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use contractflow_core::config::AppConfig;
use toml::Value;

use crate::commands::GlobalOptions;

/// Renders the effective configuration with the source of each value.
pub fn run(options: &GlobalOptions) -> String {
    let config = match AppConfig::load(options.load_options()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path(options.config_path.as_deref());
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str]| {
        field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "database.url",
        &config.database.url,
        source("database.url", &["CONTRACTFLOW_DATABASE_URL"]),
    ));
    lines.push(render_line(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        source("database.max_connections", &["CONTRACTFLOW_DATABASE_MAX_CONNECTIONS"]),
    ));
    lines.push(render_line(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        source("database.timeout_secs", &["CONTRACTFLOW_DATABASE_TIMEOUT_SECS"]),
    ));

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", &["CONTRACTFLOW_LOGGING_LEVEL", "CONTRACTFLOW_LOG_LEVEL"]),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        source("logging.format", &["CONTRACTFLOW_LOGGING_FORMAT", "CONTRACTFLOW_LOG_FORMAT"]),
    ));

    lines.push(render_line(
        "workflow.default_page_size",
        &config.workflow.default_page_size.to_string(),
        source("workflow.default_page_size", &["CONTRACTFLOW_WORKFLOW_DEFAULT_PAGE_SIZE"]),
    ));
    lines.push(render_line(
        "workflow.max_page_size",
        &config.workflow.max_page_size.to_string(),
        source("workflow.max_page_size", &["CONTRACTFLOW_WORKFLOW_MAX_PAGE_SIZE"]),
    ));
    lines.push(render_line(
        "workflow.request_timeout_secs",
        &config.workflow.request_timeout_secs.to_string(),
        source("workflow.request_timeout_secs", &["CONTRACTFLOW_WORKFLOW_REQUEST_TIMEOUT_SECS"]),
    ));

    let chain = config
        .workflow
        .default_steps
        .iter()
        .map(|step| {
            let approver = step
                .approver_user_id
                .as_deref()
                .or(step.approver_role.as_deref())
                .unwrap_or("anyone");
            format!("{}:{} [{}]", step.step_order, step.step_name, approver)
        })
        .collect::<Vec<_>>()
        .join(" -> ");
    lines.push(render_line(
        "workflow.default_steps",
        &chain,
        source("workflow.default_steps", &[]),
    ));

    let roles = if config.roles.is_empty() {
        "<unset> (role steps open to every approver)".to_string()
    } else {
        format!("{} user(s)", config.roles.len())
    };
    lines.push(render_line("roles", &roles, source("roles", &[])));

    lines.join("\n")
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    let root = PathBuf::from("contractflow.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/contractflow.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
