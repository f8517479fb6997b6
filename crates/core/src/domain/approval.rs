use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::contract::ContractId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

impl ApprovalId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalStepId(pub String);

impl ApprovalStepId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(DomainError::InvariantViolation(format!(
                "unknown approval status `{other}`"
            ))),
        }
    }
}

/// Caller-supplied shape of one step in a custom approval chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTemplate {
    pub step_order: u32,
    pub step_name: String,
    #[serde(default)]
    pub approver_role: Option<String>,
    #[serde(default)]
    pub approver_user_id: Option<String>,
    #[serde(default)]
    pub approver_user_name: Option<String>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
}

impl StepTemplate {
    pub fn for_role(
        step_order: u32,
        step_name: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            step_order,
            step_name: step_name.into(),
            approver_role: Some(role.into()),
            approver_user_id: None,
            approver_user_name: None,
            due_date: None,
        }
    }

    pub fn for_user(
        step_order: u32,
        step_name: impl Into<String>,
        user_id: impl Into<String>,
        user_name: impl Into<String>,
    ) -> Self {
        Self {
            step_order,
            step_name: step_name.into(),
            approver_role: None,
            approver_user_id: Some(user_id.into()),
            approver_user_name: Some(user_name.into()),
            due_date: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub id: ApprovalStepId,
    pub step_order: u32,
    pub step_name: String,
    pub approver_role: Option<String>,
    pub approver_user_id: Option<String>,
    pub approver_user_name: Option<String>,
    pub status: ApprovalStatus,
    pub comments: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processed_by: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
}

impl ApprovalStep {
    fn from_template(template: StepTemplate) -> Self {
        Self {
            id: ApprovalStepId::generate(),
            step_order: template.step_order,
            step_name: template.step_name,
            approver_role: non_blank(template.approver_role),
            approver_user_id: non_blank(template.approver_user_id),
            approver_user_name: non_blank(template.approver_user_name),
            status: ApprovalStatus::Pending,
            comments: None,
            processed_at: None,
            processed_by: None,
            due_date: template.due_date,
        }
    }

    /// The single identity allowed to act on this step, if one was designated.
    /// When present the role is not consulted.
    pub fn designated_approver(&self) -> Option<&str> {
        self.approver_user_id.as_deref().filter(|id| !id.trim().is_empty())
    }

    /// Human readable form of who is expected to act, for error messages.
    pub fn expected_approver(&self) -> String {
        match (self.approver_user_name.as_deref(), self.designated_approver()) {
            (Some(name), Some(id)) => format!("{name} ({id})"),
            (None, Some(id)) => id.to_string(),
            _ => match self.approver_role.as_deref() {
                Some(role) => format!("role `{role}`"),
                None => "any approver".to_string(),
            },
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    fn process(
        &mut self,
        status: ApprovalStatus,
        actor: &str,
        comments: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.status = status;
        self.processed_by = Some(actor.to_string());
        self.processed_at = Some(now);
        self.comments = comments;
    }
}

/// Result of approving the current step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalProgress {
    /// The chain moved on; `level` is the new current approval level.
    Advanced { level: u32 },
    /// The final step was approved and the record is now terminal.
    Completed,
}

/// One approval process for one contract.
///
/// All state changes go through [`ApprovalRecord::open`],
/// [`ApprovalRecord::approve_current`] and [`ApprovalRecord::reject`], which
/// keep `current_approval_level` and the step statuses in agreement.
/// `version` is owned by the store and bumped on every successful update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub id: ApprovalId,
    pub contract_id: ContractId,
    pub status: ApprovalStatus,
    pub current_approval_level: u32,
    pub max_approval_level: u32,
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub comments: Option<String>,
    pub steps: Vec<ApprovalStep>,
    pub version: i64,
}

impl ApprovalRecord {
    /// Builds a fresh pending record from a step chain.
    ///
    /// Templates are ordered by their own `step_order` and never renumbered,
    /// so the orders must already form `1..=n`.
    pub fn open(
        contract_id: ContractId,
        requested_by: impl Into<String>,
        comments: Option<String>,
        mut templates: Vec<StepTemplate>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        check_step_chain(&templates)?;
        templates.sort_by_key(|template| template.step_order);

        let steps: Vec<ApprovalStep> =
            templates.into_iter().map(ApprovalStep::from_template).collect();

        Ok(Self {
            id: ApprovalId::generate(),
            contract_id,
            status: ApprovalStatus::Pending,
            current_approval_level: 1,
            max_approval_level: steps.len() as u32,
            requested_by: requested_by.into(),
            requested_at: now,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            comments: non_blank(comments),
            steps,
            version: 0,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn step(&self, step_order: u32) -> Option<&ApprovalStep> {
        self.steps.iter().find(|step| step.step_order == step_order)
    }

    /// The step awaiting action, derived from the level pointer and statuses.
    pub fn current_step(&self) -> Option<&ApprovalStep> {
        if self.is_terminal() {
            return None;
        }
        self.step(self.current_approval_level).filter(|step| step.is_pending())
    }

    fn current_step_index(&self) -> Option<usize> {
        let level = self.current_approval_level;
        self.steps.iter().position(|step| step.step_order == level && step.is_pending())
    }

    pub fn approve_current(
        &mut self,
        actor: &str,
        comments: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalProgress, DomainError> {
        if self.is_terminal() {
            return Err(DomainError::AlreadyTerminal {
                approval_id: self.id.clone(),
                status: self.status,
            });
        }

        let Some(index) = self.current_step_index() else {
            return Err(DomainError::NoPendingStep {
                approval_id: self.id.clone(),
                level: self.current_approval_level,
            });
        };

        self.steps[index].process(ApprovalStatus::Approved, actor, non_blank(comments), now);

        if self.current_approval_level < self.max_approval_level {
            self.current_approval_level += 1;
            return Ok(ApprovalProgress::Advanced { level: self.current_approval_level });
        }

        self.status = ApprovalStatus::Approved;
        self.approved_by = Some(actor.to_string());
        self.approved_at = Some(now);
        Ok(ApprovalProgress::Completed)
    }

    /// Rejects the whole record. The current step is stamped too when it is
    /// still pending; the actor is not checked against the step's approver.
    pub fn reject(
        &mut self,
        actor: &str,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if self.is_terminal() {
            return Err(DomainError::AlreadyTerminal {
                approval_id: self.id.clone(),
                status: self.status,
            });
        }

        let reason = reason.into();
        if let Some(index) = self.current_step_index() {
            self.steps[index].process(ApprovalStatus::Rejected, actor, Some(reason.clone()), now);
        }

        self.status = ApprovalStatus::Rejected;
        self.rejected_by = Some(actor.to_string());
        self.rejected_at = Some(now);
        self.rejection_reason = Some(reason);
        Ok(())
    }

    /// Verifies the structural rules every persisted record must satisfy.
    pub fn check_invariants(&self) -> Result<(), DomainError> {
        let violation = |message: String| Err(DomainError::InvariantViolation(message));

        if self.steps.len() as u32 != self.max_approval_level {
            return violation(format!(
                "record {} has {} steps but max_approval_level {}",
                self.id,
                self.steps.len(),
                self.max_approval_level
            ));
        }

        for (index, step) in self.steps.iter().enumerate() {
            if step.step_order != index as u32 + 1 {
                return violation(format!(
                    "record {} step orders are not contiguous at position {}",
                    self.id,
                    index + 1
                ));
            }
            if step.is_pending() != step.processed_at.is_none() {
                return violation(format!(
                    "record {} step {} has status {} but processed_at {:?}",
                    self.id,
                    step.step_order,
                    step.status.as_str(),
                    step.processed_at
                ));
            }
        }

        let level = self.current_approval_level;
        match self.status {
            ApprovalStatus::Pending => {
                if level < 1 || level > self.max_approval_level {
                    return violation(format!(
                        "record {} level {} outside 1..={}",
                        self.id, level, self.max_approval_level
                    ));
                }
                for step in &self.steps {
                    let expected = if step.step_order < level {
                        ApprovalStatus::Approved
                    } else {
                        ApprovalStatus::Pending
                    };
                    if step.status != expected {
                        return violation(format!(
                            "record {} step {} is {} while level is {}",
                            self.id,
                            step.step_order,
                            step.status.as_str(),
                            level
                        ));
                    }
                }
            }
            ApprovalStatus::Approved => {
                if self.steps.iter().any(|step| step.status != ApprovalStatus::Approved) {
                    return violation(format!("approved record {} has unapproved steps", self.id));
                }
            }
            ApprovalStatus::Rejected => {
                if self.steps.iter().any(|step| step.step_order > level && !step.is_pending()) {
                    return violation(format!(
                        "rejected record {} has processed steps beyond level {}",
                        self.id, level
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Checks that a chain is non-empty, that its orders form `1..=n` in any
/// arrangement and that every step has a name.
pub fn check_step_chain(templates: &[StepTemplate]) -> Result<(), DomainError> {
    if templates.is_empty() {
        return Err(DomainError::InvalidStepChain(
            "an approval chain needs at least one step".to_string(),
        ));
    }

    let mut orders: Vec<u32> = templates.iter().map(|template| template.step_order).collect();
    orders.sort_unstable();
    for (index, order) in orders.iter().enumerate() {
        let expected = index as u32 + 1;
        if *order != expected {
            return Err(DomainError::InvalidStepChain(format!(
                "step orders must form 1..={} without gaps or duplicates; found {} at position {}",
                templates.len(),
                order,
                expected
            )));
        }
    }

    if let Some(unnamed) = templates.iter().find(|template| template.step_name.trim().is_empty()) {
        return Err(DomainError::InvalidStepChain(format!(
            "step {} has an empty name",
            unnamed.step_order
        )));
    }

    Ok(())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{ApprovalProgress, ApprovalRecord, ApprovalStatus, StepTemplate};
    use crate::domain::contract::ContractId;
    use crate::errors::DomainError;

    fn two_step_record() -> ApprovalRecord {
        ApprovalRecord::open(
            ContractId(7),
            "alice",
            Some("New hire".to_string()),
            vec![
                StepTemplate::for_role(1, "Department Manager Approval", "department_manager"),
                StepTemplate::for_role(2, "HR Approval", "hr"),
            ],
            Utc::now(),
        )
        .expect("open record")
    }

    #[test]
    fn open_starts_at_level_one_with_all_steps_pending() {
        let record = two_step_record();

        assert_eq!(record.status, ApprovalStatus::Pending);
        assert_eq!(record.current_approval_level, 1);
        assert_eq!(record.max_approval_level, 2);
        assert!(record.steps.iter().all(|step| step.is_pending()));
        record.check_invariants().expect("fresh record is consistent");
    }

    #[test]
    fn open_sorts_templates_by_step_order() {
        let record = ApprovalRecord::open(
            ContractId(1),
            "alice",
            None,
            vec![
                StepTemplate::for_role(3, "Finance", "finance"),
                StepTemplate::for_user(1, "Line Manager", "mgr1", "Maria Gomez"),
                StepTemplate::for_role(2, "HR", "hr"),
            ],
            Utc::now(),
        )
        .expect("open");

        let orders: Vec<u32> = record.steps.iter().map(|step| step.step_order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
        assert_eq!(record.steps[0].step_name, "Line Manager");
    }

    #[test]
    fn open_rejects_gaps_duplicates_and_empty_chains() {
        let gap = ApprovalRecord::open(
            ContractId(1),
            "alice",
            None,
            vec![StepTemplate::for_role(1, "A", "a"), StepTemplate::for_role(3, "C", "c")],
            Utc::now(),
        );
        assert!(matches!(gap, Err(DomainError::InvalidStepChain(_))));

        let duplicate = ApprovalRecord::open(
            ContractId(1),
            "alice",
            None,
            vec![StepTemplate::for_role(1, "A", "a"), StepTemplate::for_role(1, "B", "b")],
            Utc::now(),
        );
        assert!(matches!(duplicate, Err(DomainError::InvalidStepChain(_))));

        let empty = ApprovalRecord::open(ContractId(1), "alice", None, Vec::new(), Utc::now());
        assert!(matches!(empty, Err(DomainError::InvalidStepChain(_))));
    }

    #[test]
    fn approving_every_step_completes_the_record() {
        let mut record = two_step_record();

        let first =
            record.approve_current("mgr1", Some("ok".to_string()), Utc::now()).expect("first");
        assert_eq!(first, ApprovalProgress::Advanced { level: 2 });
        assert_eq!(record.status, ApprovalStatus::Pending);
        record.check_invariants().expect("consistent after advance");

        let second = record.approve_current("hr1", None, Utc::now()).expect("second");
        assert_eq!(second, ApprovalProgress::Completed);
        assert_eq!(record.status, ApprovalStatus::Approved);
        assert_eq!(record.approved_by.as_deref(), Some("hr1"));
        assert!(record.approved_at.is_some());
        assert_eq!(record.current_approval_level, 2);
        record.check_invariants().expect("consistent after completion");
    }

    #[test]
    fn approved_step_keeps_actor_and_comments() {
        let mut record = two_step_record();
        record
            .approve_current("mgr1", Some("Looks good".to_string()), Utc::now())
            .expect("approve");

        let step = record.step(1).expect("step 1");
        assert_eq!(step.status, ApprovalStatus::Approved);
        assert_eq!(step.processed_by.as_deref(), Some("mgr1"));
        assert_eq!(step.comments.as_deref(), Some("Looks good"));
        assert!(step.processed_at.is_some());
    }

    #[test]
    fn reject_marks_record_and_current_step() {
        let mut record = two_step_record();
        record.reject("mgr1", "Budget exceeded", Utc::now()).expect("reject");

        assert_eq!(record.status, ApprovalStatus::Rejected);
        assert_eq!(record.rejection_reason.as_deref(), Some("Budget exceeded"));
        assert_eq!(record.rejected_by.as_deref(), Some("mgr1"));
        let step = record.step(1).expect("step 1");
        assert_eq!(step.status, ApprovalStatus::Rejected);
        assert_eq!(step.comments.as_deref(), Some("Budget exceeded"));
        assert!(record.step(2).expect("step 2").is_pending());
        record.check_invariants().expect("consistent after reject");
    }

    #[test]
    fn terminal_records_refuse_further_transitions() {
        let mut record = two_step_record();
        record.reject("mgr1", "No headcount", Utc::now()).expect("reject");
        let snapshot = record.clone();

        let approve = record.approve_current("mgr1", None, Utc::now());
        assert!(matches!(approve, Err(DomainError::AlreadyTerminal { .. })));

        let reject = record.reject("hr1", "again", Utc::now());
        assert!(matches!(reject, Err(DomainError::AlreadyTerminal { .. })));

        assert_eq!(record, snapshot);
    }

    #[test]
    fn approve_without_pending_step_reports_the_level() {
        let mut record = two_step_record();
        record.steps[0].status = ApprovalStatus::Approved;
        record.steps[0].processed_at = Some(Utc::now());

        let error = record.approve_current("mgr1", None, Utc::now()).expect_err("no pending step");
        assert!(matches!(error, DomainError::NoPendingStep { level: 1, .. }));
    }

    #[test]
    fn current_step_is_none_once_terminal() {
        let mut record = two_step_record();
        assert_eq!(record.current_step().map(|step| step.step_order), Some(1));

        record.reject("mgr1", "stop", Utc::now()).expect("reject");
        assert!(record.current_step().is_none());
    }

    #[test]
    fn designated_approver_ignores_blank_ids() {
        let record = ApprovalRecord::open(
            ContractId(1),
            "alice",
            None,
            vec![StepTemplate {
                approver_user_id: Some("   ".to_string()),
                ..StepTemplate::for_role(1, "HR", "hr")
            }],
            Utc::now(),
        )
        .expect("open");

        assert_eq!(record.steps[0].designated_approver(), None);
        assert_eq!(record.steps[0].expected_approver(), "role `hr`");
    }

    #[test]
    fn check_invariants_detects_drifted_level() {
        let mut record = two_step_record();
        record.current_approval_level = 2;

        assert!(matches!(record.check_invariants(), Err(DomainError::InvariantViolation(_))));
    }
}
