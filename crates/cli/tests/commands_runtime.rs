use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use contractflow_cli::commands::contract::{self, CreateContract};
use contractflow_cli::commands::query::{self, PendingArgs};
use contractflow_cli::commands::submit::{self, SubmitArgs};
use contractflow_cli::commands::{config, decision, migrate, GlobalOptions};
use serde_json::Value;
use tempfile::TempDir;

#[test]
fn migrate_returns_success_with_valid_env() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&[("CONTRACTFLOW_DATABASE_URL", database_url(dir.path()).as_str())], || {
        let result = migrate::run(&GlobalOptions::default());
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert!(payload["message"].as_str().unwrap_or_default().contains("schema version"));
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("CONTRACTFLOW_DATABASE_URL", "postgres://localhost/contracts")], || {
        let result = migrate::run(&GlobalOptions::default());
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn config_reports_env_sources() {
    with_env(
        &[
            ("CONTRACTFLOW_DATABASE_URL", "sqlite://from-env.db"),
            ("CONTRACTFLOW_WORKFLOW_MAX_PAGE_SIZE", "40"),
        ],
        || {
            let output = config::run(&GlobalOptions::default());

            assert!(output.contains(
                "- database.url = sqlite://from-env.db (source: env (CONTRACTFLOW_DATABASE_URL))"
            ));
            assert!(output.contains("- workflow.max_page_size = 40"));
            assert!(output.contains("- workflow.default_page_size = 20 (source: default)"));
            assert!(output.contains(
                "1:Department Manager Approval [department_manager] -> 2:HR Approval [hr]"
            ));
        },
    );
}

#[test]
fn full_approval_flow_activates_the_contract() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&[("CONTRACTFLOW_DATABASE_URL", database_url(dir.path()).as_str())], || {
        let options = GlobalOptions {
            correlation_id: Some("req-cli-1".to_string()),
            ..GlobalOptions::default()
        };
        register_contract(&options, 7);

        let submitted = submit::run(&options, submit_args(7, None));
        assert_eq!(submitted.exit_code, 0, "{}", submitted.output);
        let payload = parse_payload(&submitted.output);
        assert_eq!(payload["correlation_id"], "req-cli-1");
        assert_eq!(payload["data"]["max_approval_level"], 2);
        let approval_id = payload["data"]["id"].as_str().expect("approval id").to_string();

        let first = decision::approve(&options, approval_id.clone(), "mgr1".to_string(), None);
        assert_eq!(first.exit_code, 0, "{}", first.output);
        assert_eq!(parse_payload(&first.output)["data"]["current_approval_level"], 2);

        let second = decision::approve(
            &options,
            approval_id.clone(),
            "hr1".to_string(),
            Some("Welcome aboard".to_string()),
        );
        assert_eq!(second.exit_code, 0, "{}", second.output);
        let payload = parse_payload(&second.output);
        assert_eq!(payload["data"]["status"], "approved");
        assert_eq!(payload["data"]["approved_by"], "hr1");

        let shown = contract::show(&options, 7);
        assert_eq!(parse_payload(&shown.output)["data"]["status"], "active");

        let history = query::history(&options, 7, true);
        let payload = parse_payload(&history.output);
        assert_eq!(payload["data"].as_array().map(Vec::len), Some(1));
    });
}

#[test]
fn workflow_errors_map_to_exit_codes() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&[("CONTRACTFLOW_DATABASE_URL", database_url(dir.path()).as_str())], || {
        let options = GlobalOptions::default();
        register_contract(&options, 8);

        let missing = submit::run(&options, submit_args(404, None));
        assert_eq!(missing.exit_code, 10);
        assert_eq!(parse_payload(&missing.output)["error_class"], "not_found");

        let steps = dir.path().join("steps.json");
        fs::write(
            &steps,
            r#"[{"step_order": 1, "step_name": "Lead", "approver_user_id": "mgr1",
                 "approver_user_name": "Maria Gomez"}]"#,
        )
        .expect("write steps");
        let submitted = submit::run(&options, submit_args(8, Some(&steps)));
        assert_eq!(submitted.exit_code, 0, "{}", submitted.output);
        let approval_id =
            parse_payload(&submitted.output)["data"]["id"].as_str().expect("id").to_string();

        let duplicate = submit::run(&options, submit_args(8, None));
        assert_eq!(duplicate.exit_code, 11);
        assert_eq!(parse_payload(&duplicate.output)["error_class"], "conflict");

        let forbidden = decision::approve(&options, approval_id.clone(), "mgr2".to_string(), None);
        assert_eq!(forbidden.exit_code, 12);
        let payload = parse_payload(&forbidden.output);
        assert_eq!(payload["error_class"], "forbidden");
        assert!(payload["message"].as_str().unwrap_or_default().contains("Maria Gomez (mgr1)"));

        let blank =
            decision::reject(&options, approval_id.clone(), "mgr1".to_string(), " ".to_string());
        assert_eq!(blank.exit_code, 13);

        let rejected = decision::reject(
            &options,
            approval_id.clone(),
            "mgr1".to_string(),
            "Budget exceeded".to_string(),
        );
        assert_eq!(rejected.exit_code, 0, "{}", rejected.output);
        assert_eq!(parse_payload(&rejected.output)["data"]["rejection_reason"], "Budget exceeded");

        let again = decision::approve(&options, approval_id, "mgr1".to_string(), None);
        assert_eq!(again.exit_code, 11);

        let unknown = query::show(&options, "no-such-approval".to_string());
        assert_eq!(unknown.exit_code, 10);
    });
}

#[test]
fn pending_uses_the_configured_role_directory() {
    let dir = TempDir::new().expect("tempdir");
    let config_path = dir.path().join("contractflow.toml");
    fs::write(
        &config_path,
        format!(
            "[database]\nurl = \"{}\"\n\n[roles]\nmgr1 = [\"department_manager\"]\nhr1 = [\"hr\"]\n",
            database_url(dir.path())
        ),
    )
    .expect("write config");

    with_env(&[], || {
        let options =
            GlobalOptions { config_path: Some(config_path.clone()), ..GlobalOptions::default() };
        register_contract(&options, 9);
        let submitted = submit::run(&options, submit_args(9, None));
        assert_eq!(submitted.exit_code, 0, "{}", submitted.output);
        let approval_id =
            parse_payload(&submitted.output)["data"]["id"].as_str().expect("id").to_string();

        let for_manager = query::pending(&options, pending_args("mgr1", &[]));
        let payload = parse_payload(&for_manager.output);
        assert_eq!(payload["data"]["total_count"], 1);
        assert_eq!(payload["data"]["items"][0]["id"], approval_id.as_str());

        let for_hr = query::pending(&options, pending_args("hr1", &[]));
        assert_eq!(parse_payload(&for_hr.output)["data"]["total_count"], 0);

        let hr_too_early = decision::approve(&options, approval_id, "hr1".to_string(), None);
        assert_eq!(hr_too_early.exit_code, 12);

        let explicit = query::pending(&options, pending_args("someone", &["department_manager"]));
        assert_eq!(parse_payload(&explicit.output)["data"]["total_count"], 1);
    });
}

#[test]
fn missing_explicit_config_file_is_a_config_failure() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&[], || {
        let options = GlobalOptions {
            config_path: Some(dir.path().join("absent.toml")),
            ..GlobalOptions::default()
        };

        let result = query::show(&options, "APR-1".to_string());
        assert_eq!(result.exit_code, 2);
        assert_eq!(parse_payload(&result.output)["error_class"], "config_validation");
    });
}

fn register_contract(options: &GlobalOptions, id: i64) {
    let result = contract::create(
        options,
        CreateContract {
            id,
            contract_number: format!("EMP-2024-{id:03}"),
            employee_id: id * 10,
            title: "Backend Engineer".to_string(),
            start_date: None,
            end_date: None,
        },
    );
    assert_eq!(result.exit_code, 0, "{}", result.output);
}

fn submit_args(contract_id: i64, steps_file: Option<&Path>) -> SubmitArgs {
    SubmitArgs {
        contract_id,
        requested_by: "alice".to_string(),
        comments: None,
        steps_file: steps_file.map(Path::to_path_buf),
    }
}

fn pending_args(user: &str, roles: &[&str]) -> PendingArgs {
    PendingArgs {
        user: user.to_string(),
        roles: roles.iter().map(|role| role.to_string()).collect(),
        designated_only: false,
        page: 1,
        page_size: None,
    }
}

fn database_url(dir: &Path) -> String {
    format!("sqlite://{}", dir.join("contractflow.db").display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "CONTRACTFLOW_DATABASE_URL",
        "CONTRACTFLOW_DATABASE_MAX_CONNECTIONS",
        "CONTRACTFLOW_DATABASE_TIMEOUT_SECS",
        "CONTRACTFLOW_LOGGING_LEVEL",
        "CONTRACTFLOW_LOGGING_FORMAT",
        "CONTRACTFLOW_LOG_LEVEL",
        "CONTRACTFLOW_LOG_FORMAT",
        "CONTRACTFLOW_WORKFLOW_DEFAULT_PAGE_SIZE",
        "CONTRACTFLOW_WORKFLOW_MAX_PAGE_SIZE",
        "CONTRACTFLOW_WORKFLOW_REQUEST_TIMEOUT_SECS",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
