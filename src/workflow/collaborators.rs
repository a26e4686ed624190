// External collaborator seams the engine delegates to.
//
//! Most of the surrounding system is treated as external collaborators the
//! engine only touches through narrow interfaces: step-body execution for
//! {automated, notification, integration, decision, ai_task} steps (modelled
//! identically by the core — their logic is delegated), transition condition
//! evaluation (the predicate language itself is out of scope here), and role
//! membership for notification fan-out.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::workflow::models::WorkflowStepExecution;

/// Runs the body of a non-gated step ({automated, notification, integration,
/// decision, ai_task}). Returns `Ok(result)` on success or `Err` with a
/// message describing the failure — the engine never inspects *why* a body
/// failed, only whether it did.
#[async_trait]
pub trait StepBodyExecutor: Send + Sync {
    async fn execute(
        &self,
        step_execution: &WorkflowStepExecution,
        step_config: &Value,
    ) -> std::result::Result<Value, String>;
}

/// Default body executor for environments with no real integration wired up
/// yet: every step body succeeds immediately. Production deployments
/// substitute a dispatcher that routes to the AI/LLM orchestration,
/// notification delivery, or integration subsystems (out of scope here).
pub struct NoopStepBodyExecutor;

#[async_trait]
impl StepBodyExecutor for NoopStepBodyExecutor {
    async fn execute(
        &self,
        _step_execution: &WorkflowStepExecution,
        _step_config: &Value,
    ) -> std::result::Result<Value, String> {
        Ok(Value::Object(Default::default()))
    }
}

/// Evaluates a transition's opaque JSON `condition` against a step
/// execution. Fail-closed: any evaluator error, or the absence of a wired
/// evaluator, must never be treated as "condition passed" — only an
/// explicit `true` from the evaluator, or no condition at all, allows the
/// transition. An unparseable condition must never enable the transition.
#[async_trait]
pub trait ConditionEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        condition: &Value,
        step_execution: &WorkflowStepExecution,
    ) -> Result<bool>;
}

/// Default evaluator used until a predicate language is wired up: always
/// refuses. Combined with "absent/empty condition ≡ true" handled by the
/// engine before calling this trait at all, this keeps the system
/// fail-closed rather than fail-open by default.
pub struct FailClosedConditionEvaluator;

#[async_trait]
impl ConditionEvaluator for FailClosedConditionEvaluator {
    async fn evaluate(
        &self,
        _condition: &Value,
        _step_execution: &WorkflowStepExecution,
    ) -> Result<bool> {
        Ok(false)
    }
}

/// Resolves role membership for notification fan-out — expands a role id to
/// every user in that role. The role/permission domain itself is out of
/// scope; this is the one seam the engine needs into it.
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    async fn members_of(&self, role_id: Uuid) -> Result<Vec<Uuid>>;
}

pub struct EmptyRoleDirectory;

#[async_trait]
impl RoleDirectory for EmptyRoleDirectory {
    async fn members_of(&self, _role_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::models::{
        ExecutionPriority, StepExecutionMetadata, StepStatus, WorkflowStepExecution,
    };
    use chrono::Utc;

    fn sample_step_execution() -> WorkflowStepExecution {
        WorkflowStepExecution {
            id: Uuid::new_v4(),
            execution_id: Uuid::new_v4(),
            step_id: Uuid::new_v4(),
            status: StepStatus::Active,
            error: None,
            result: None,
            priority: ExecutionPriority::Normal,
            metadata: StepExecutionMetadata::default(),
            started_at: Some(Utc::now()),
            updated_at: Utc::now(),
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn noop_step_body_always_succeeds() {
        let executor = NoopStepBodyExecutor;
        let result = executor
            .execute(&sample_step_execution(), &Value::Object(Default::default()))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn fail_closed_evaluator_never_permits() {
        let evaluator = FailClosedConditionEvaluator;
        let allowed = evaluator
            .evaluate(&serde_json::json!({"any": "shape"}), &sample_step_execution())
            .await
            .unwrap();
        assert!(!allowed);
    }

    #[tokio::test]
    async fn empty_role_directory_resolves_to_no_members() {
        let directory = EmptyRoleDirectory;
        let members = directory.members_of(Uuid::new_v4()).await.unwrap();
        assert!(members.is_empty());
    }
}
