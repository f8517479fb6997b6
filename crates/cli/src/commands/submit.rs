use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use contractflow_core::approvals::SubmitRequest;
use contractflow_core::domain::approval::StepTemplate;
use contractflow_core::domain::contract::ContractId;

use crate::commands::{run_in_session, CommandFailure, CommandOutput, CommandResult, GlobalOptions};

#[derive(Debug, Clone)]
pub struct SubmitArgs {
    pub contract_id: i64,
    pub requested_by: String,
    pub comments: Option<String>,
    /// JSON array of step templates replacing the default chain.
    pub steps_file: Option<PathBuf>,
}

pub fn run(options: &GlobalOptions, args: SubmitArgs) -> CommandResult {
    run_in_session("submit", options, |session| async move {
        let mut request = SubmitRequest::new(ContractId(args.contract_id), args.requested_by);
        if let Some(comments) = args.comments {
            request = request.with_comments(comments);
        }
        if let Some(path) = args.steps_file.as_deref() {
            let steps = read_steps(path)
                .map_err(|error| CommandFailure::invalid_input(format!("{error:#}")))?;
            request = request.with_custom_steps(steps);
        }

        let record = session.engine.submit(&session.ctx, request).await?;
        CommandOutput::new(
            format!(
                "approval {} opened for contract {} with {} step(s)",
                record.id, record.contract_id, record.max_approval_level
            ),
            &record,
        )
    })
}

fn read_steps(path: &Path) -> anyhow::Result<Vec<StepTemplate>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read steps file `{}`", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("steps file `{}` is not a JSON array of steps", path.display()))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::read_steps;

    #[test]
    fn steps_file_accepts_partial_step_objects() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("steps.json");
        fs::write(
            &path,
            r#"[
                {"step_order": 2, "step_name": "HR", "approver_role": "hr"},
                {"step_order": 1, "step_name": "Lead", "approver_user_id": "mgr1",
                 "approver_user_name": "Maria Gomez"}
            ]"#,
        )
        .expect("write steps");

        let steps = read_steps(&path).expect("parse");
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].approver_user_id.as_deref(), Some("mgr1"));
        assert_eq!(steps[0].due_date, None);
    }

    #[test]
    fn malformed_steps_file_names_the_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.json");
        fs::write(&path, "{not json").expect("write");

        let error = read_steps(&path).expect_err("malformed");
        assert!(format!("{error:#}").contains("broken.json"));
    }
}
