// Workflow domain model — the entity graph the engine and repositories
// operate on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    Sequential,
    Parallel,
    Conditional,
    AiDriven,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Archived,
    UnderReview,
    Optimizing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Manual,
    Automated,
    Approval,
    Notification,
    Integration,
    Decision,
    AiTask,
}

impl StepType {
    /// Manual and approval steps wait for an external `advance` call;
    /// everything else runs its body immediately.
    pub fn is_gated(self) -> bool {
        matches!(self, StepType::Manual | StepType::Approval)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Active,
    Completed,
    Skipped,
    Failed,
}

/// Canonical transition event labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionEvent {
    OnApprove,
    OnReject,
    OnComplete,
    OnTimeout,
    OnFail,
}

impl TransitionEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            TransitionEvent::OnApprove => "on_approve",
            TransitionEvent::OnReject => "on_reject",
            TransitionEvent::OnComplete => "on_complete",
            TransitionEvent::OnTimeout => "on_timeout",
            TransitionEvent::OnFail => "on_fail",
        }
    }
}

/// The external `advance` action a caller or the engine supplies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceAction {
    Approve,
    Reject,
    Complete,
    Fail,
}

impl AdvanceAction {
    pub fn event(self) -> TransitionEvent {
        match self {
            AdvanceAction::Approve => TransitionEvent::OnApprove,
            AdvanceAction::Reject => TransitionEvent::OnReject,
            AdvanceAction::Complete => TransitionEvent::OnComplete,
            AdvanceAction::Fail => TransitionEvent::OnFail,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowMetrics {
    pub average_completion_time_seconds: Option<f64>,
    pub success_rate: Option<f64>,
    pub total_executions: u64,
    pub successful_executions: u64,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub next_scheduled_at: Option<DateTime<Utc>>,
    pub actual_duration_seconds: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub created_by: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub workflow_type: WorkflowType,
    pub status: WorkflowStatus,
    pub config: Value,
    pub tags: Vec<String>,
    pub metrics: WorkflowMetrics,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignee {
    pub user_id: Option<Uuid>,
    pub role_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub step_order: i32,
    pub name: String,
    pub step_type: StepType,
    pub status: StepStatus,
    pub config: Value,
    pub conditions: Option<Value>,
    pub is_required: bool,
    pub auto_advance: bool,
    pub can_revert: bool,
    pub assigned_to: Option<Uuid>,
    pub assigned_to_role_id: Option<Uuid>,
    pub version: String,
    pub predecessor_version: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowStep {
    /// Tagged retry policy read out of the step's opaque `config`. Absent or
    /// malformed config simply means no retries — never a hard error: the
    /// engine fails closed on transition *conditions*, but a missing retry
    /// policy is not a condition, it's an optional feature.
    pub fn retry_policy(&self) -> Option<RetryPolicy> {
        self.config
            .get("retry_policy")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn timeout_secs(&self) -> Option<u64> {
        self.config.get("timeout_secs").and_then(|v| v.as_u64())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Backoff before attempt number `attempt` (1-indexed retry count, i.e.
    /// the delay before the *second* try is `initial_backoff_ms`).
    pub fn backoff_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.initial_backoff_ms as f64 * factor) as u64;
        std::time::Duration::from_millis(millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTransition {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub from_step: Uuid,
    pub to_step: Uuid,
    pub on_event: TransitionEvent,
    pub condition: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for ExecutionPriority {
    fn default() -> Self {
        ExecutionPriority::Normal
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub priority: ExecutionPriority,
    pub result: Option<Value>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StepExecutionMetadata {
    pub previous_step_id: Option<Uuid>,
    pub transition_id: Option<Uuid>,
    #[serde(default)]
    pub attempt: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStepExecution {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub step_id: Uuid,
    pub status: StepStatus,
    pub error: Option<String>,
    pub result: Option<Value>,
    pub priority: ExecutionPriority,
    pub metadata: StepExecutionMetadata,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowAgentLink {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub agent_id: Uuid,
    pub agent_metadata: Value,
}

/// Partial update accepted by `WorkflowEngine::update_workflow`. Absent
/// fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct WorkflowUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<WorkflowStatus>,
    pub config: Option<Value>,
    pub tags: Option<Vec<String>>,
}

/// Descriptor accepted by `WorkflowEngine::add_step`.
#[derive(Debug, Clone, Default)]
pub struct NewStep {
    pub name: String,
    pub step_type: Option<StepType>,
    pub step_order: Option<i32>,
    pub config: Value,
    pub conditions: Option<Value>,
    pub is_required: bool,
    pub auto_advance: bool,
    pub can_revert: bool,
    pub assigned_to: Option<Uuid>,
    pub assigned_to_role_id: Option<Uuid>,
    pub version: Option<String>,
    pub predecessor_version: Option<String>,
}

pub type NotificationType = &'static str;
pub const NOTIFICATION_ACTION_REQUIRED: NotificationType = "workflow_action_required";
pub const NOTIFICATION_WORKFLOW_COMPLETED: NotificationType = "workflow_completed";

/// A notification the engine emits; delivery is an external collaborator
/// (out of scope), but the engine defines what gets produced and to whom.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNotification {
    pub notification_type: NotificationType,
    pub user_id: Uuid,
    pub workflow_id: Uuid,
    pub execution_id: Uuid,
    pub step_id: Option<Uuid>,
    pub details: HashMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_and_approval_steps_are_gated() {
        assert!(StepType::Manual.is_gated());
        assert!(StepType::Approval.is_gated());
    }

    #[test]
    fn other_step_types_are_not_gated() {
        for step_type in [
            StepType::Automated,
            StepType::Notification,
            StepType::Integration,
            StepType::Decision,
            StepType::AiTask,
        ] {
            assert!(!step_type.is_gated());
        }
    }

    #[test]
    fn advance_action_maps_to_canonical_event() {
        assert_eq!(AdvanceAction::Approve.event(), TransitionEvent::OnApprove);
        assert_eq!(AdvanceAction::Reject.event(), TransitionEvent::OnReject);
        assert_eq!(AdvanceAction::Complete.event(), TransitionEvent::OnComplete);
        assert_eq!(AdvanceAction::Fail.event(), TransitionEvent::OnFail);
    }

    #[test]
    fn transition_event_as_str_is_the_canonical_label() {
        assert_eq!(TransitionEvent::OnApprove.as_str(), "on_approve");
        assert_eq!(TransitionEvent::OnTimeout.as_str(), "on_timeout");
    }

    #[test]
    fn execution_status_terminal_set_excludes_pending_and_active() {
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Active.is_terminal());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn retry_policy_backoff_grows_by_multiplier_per_attempt() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 100,
            backoff_multiplier: 2.0,
        };
        assert_eq!(
            policy.backoff_for_attempt(1),
            std::time::Duration::from_millis(100)
        );
        assert_eq!(
            policy.backoff_for_attempt(2),
            std::time::Duration::from_millis(200)
        );
        assert_eq!(
            policy.backoff_for_attempt(3),
            std::time::Duration::from_millis(400)
        );
    }

    #[test]
    fn retry_policy_parses_from_step_config() {
        let step = WorkflowStep {
            id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            step_order: 0,
            name: "retry-me".to_string(),
            step_type: StepType::Automated,
            status: StepStatus::Pending,
            config: serde_json::json!({
                "retry_policy": {
                    "max_attempts": 3,
                    "initial_backoff_ms": 50,
                    "backoff_multiplier": 1.5
                },
                "timeout_secs": 30
            }),
            conditions: None,
            is_required: true,
            auto_advance: true,
            can_revert: false,
            assigned_to: None,
            assigned_to_role_id: None,
            version: "1".to_string(),
            predecessor_version: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let policy = step.retry_policy().expect("retry policy should parse");
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(step.timeout_secs(), Some(30));
    }

    #[test]
    fn retry_policy_absent_from_config_returns_none() {
        let step = WorkflowStep {
            id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            step_order: 0,
            name: "no-retry".to_string(),
            step_type: StepType::Automated,
            status: StepStatus::Pending,
            config: serde_json::json!({}),
            conditions: None,
            is_required: true,
            auto_advance: true,
            can_revert: false,
            assigned_to: None,
            assigned_to_role_id: None,
            version: "1".to_string(),
            predecessor_version: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(step.retry_policy().is_none());
        assert!(step.timeout_secs().is_none());
    }
}
