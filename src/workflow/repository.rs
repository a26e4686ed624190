// Workflow persistence — repository pattern over the typed workflow
// entities, storage backend swappable behind one trait.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::substrate::repository::DeletedPolicy;

use super::models::*;

/// Storage interface for every workflow entity. One implementation per
/// backend: `InMemoryWorkflowRepository` for tests, `SqlxWorkflowRepository`
/// for production (src/workflow/sqlx_repository.rs).
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn create_workflow(&self, workflow: Workflow) -> Result<Workflow>;
    async fn get_workflow(&self, id: Uuid, policy: DeletedPolicy) -> Result<Option<Workflow>>;
    async fn list_workflows(
        &self,
        organization_id: Uuid,
        policy: DeletedPolicy,
    ) -> Result<Vec<Workflow>>;
    async fn update_workflow(&self, workflow: Workflow) -> Result<Workflow>;
    async fn soft_delete_workflow(&self, id: Uuid) -> Result<()>;

    async fn add_step(&self, step: WorkflowStep) -> Result<WorkflowStep>;
    async fn get_step(&self, id: Uuid) -> Result<Option<WorkflowStep>>;
    async fn list_steps(&self, workflow_id: Uuid) -> Result<Vec<WorkflowStep>>;
    async fn update_step(&self, step: WorkflowStep) -> Result<WorkflowStep>;

    async fn add_transition(&self, transition: WorkflowTransition) -> Result<WorkflowTransition>;
    async fn list_transitions_from(
        &self,
        from_step: Uuid,
        on_event: TransitionEvent,
    ) -> Result<Vec<WorkflowTransition>>;

    async fn create_execution(&self, execution: WorkflowExecution) -> Result<WorkflowExecution>;
    async fn get_execution(&self, id: Uuid) -> Result<Option<WorkflowExecution>>;
    async fn update_execution(&self, execution: WorkflowExecution) -> Result<WorkflowExecution>;
    async fn list_active_executions(&self, workflow_id: Uuid) -> Result<Vec<WorkflowExecution>>;

    async fn create_step_execution(
        &self,
        step_execution: WorkflowStepExecution,
    ) -> Result<WorkflowStepExecution>;
    async fn get_step_execution(&self, id: Uuid) -> Result<Option<WorkflowStepExecution>>;
    async fn update_step_execution(
        &self,
        step_execution: WorkflowStepExecution,
    ) -> Result<WorkflowStepExecution>;
    async fn list_step_executions(&self, execution_id: Uuid) -> Result<Vec<WorkflowStepExecution>>;
}

/// In-memory fake used by unit/integration tests and as the default backend
/// in dev mode before Postgres is wired up. Uses `DashMap` per entity table
/// for finer-grained locking than a single `RwLock<HashMap<..>>` would give.
#[derive(Default, Clone)]
pub struct InMemoryWorkflowRepository {
    workflows: Arc<DashMap<Uuid, Workflow>>,
    steps: Arc<DashMap<Uuid, WorkflowStep>>,
    transitions: Arc<DashMap<Uuid, WorkflowTransition>>,
    executions: Arc<DashMap<Uuid, WorkflowExecution>>,
    step_executions: Arc<DashMap<Uuid, WorkflowStepExecution>>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn create_workflow(&self, workflow: Workflow) -> Result<Workflow> {
        self.workflows.insert(workflow.id, workflow.clone());
        Ok(workflow)
    }

    async fn get_workflow(&self, id: Uuid, policy: DeletedPolicy) -> Result<Option<Workflow>> {
        Ok(self.workflows.get(&id).and_then(|w| {
            if w.deleted_at.is_some() && !policy.includes_deleted() {
                None
            } else {
                Some(w.clone())
            }
        }))
    }

    async fn list_workflows(
        &self,
        organization_id: Uuid,
        policy: DeletedPolicy,
    ) -> Result<Vec<Workflow>> {
        Ok(self
            .workflows
            .iter()
            .filter(|w| w.organization_id == organization_id)
            .filter(|w| policy.includes_deleted() || w.deleted_at.is_none())
            .map(|w| w.clone())
            .collect())
    }

    async fn update_workflow(&self, mut workflow: Workflow) -> Result<Workflow> {
        workflow.updated_at = Utc::now();
        self.workflows.insert(workflow.id, workflow.clone());
        Ok(workflow)
    }

    async fn soft_delete_workflow(&self, id: Uuid) -> Result<()> {
        let mut entry = self
            .workflows
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("workflow {id}")))?;
        entry.deleted_at = Some(Utc::now());
        Ok(())
    }

    async fn add_step(&self, step: WorkflowStep) -> Result<WorkflowStep> {
        self.steps.insert(step.id, step.clone());
        Ok(step)
    }

    async fn get_step(&self, id: Uuid) -> Result<Option<WorkflowStep>> {
        Ok(self.steps.get(&id).map(|s| s.clone()))
    }

    async fn list_steps(&self, workflow_id: Uuid) -> Result<Vec<WorkflowStep>> {
        let mut steps: Vec<_> = self
            .steps
            .iter()
            .filter(|s| s.workflow_id == workflow_id)
            .map(|s| s.clone())
            .collect();
        steps.sort_by_key(|s| s.step_order);
        Ok(steps)
    }

    async fn update_step(&self, mut step: WorkflowStep) -> Result<WorkflowStep> {
        step.updated_at = Utc::now();
        self.steps.insert(step.id, step.clone());
        Ok(step)
    }

    async fn add_transition(&self, transition: WorkflowTransition) -> Result<WorkflowTransition> {
        self.transitions.insert(transition.id, transition.clone());
        Ok(transition)
    }

    async fn list_transitions_from(
        &self,
        from_step: Uuid,
        on_event: TransitionEvent,
    ) -> Result<Vec<WorkflowTransition>> {
        Ok(self
            .transitions
            .iter()
            .filter(|t| t.from_step == from_step && t.on_event == on_event)
            .map(|t| t.clone())
            .collect())
    }

    async fn create_execution(&self, execution: WorkflowExecution) -> Result<WorkflowExecution> {
        self.executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<WorkflowExecution>> {
        Ok(self.executions.get(&id).map(|e| e.clone()))
    }

    async fn update_execution(&self, mut execution: WorkflowExecution) -> Result<WorkflowExecution> {
        execution.updated_at = Utc::now();
        self.executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn list_active_executions(&self, workflow_id: Uuid) -> Result<Vec<WorkflowExecution>> {
        Ok(self
            .executions
            .iter()
            .filter(|e| {
                e.workflow_id == workflow_id
                    && matches!(e.status, ExecutionStatus::Pending | ExecutionStatus::Active)
            })
            .map(|e| e.clone())
            .collect())
    }

    async fn create_step_execution(
        &self,
        step_execution: WorkflowStepExecution,
    ) -> Result<WorkflowStepExecution> {
        self.step_executions
            .insert(step_execution.id, step_execution.clone());
        Ok(step_execution)
    }

    async fn get_step_execution(&self, id: Uuid) -> Result<Option<WorkflowStepExecution>> {
        Ok(self.step_executions.get(&id).map(|s| s.clone()))
    }

    async fn update_step_execution(
        &self,
        mut step_execution: WorkflowStepExecution,
    ) -> Result<WorkflowStepExecution> {
        step_execution.updated_at = Utc::now();
        self.step_executions
            .insert(step_execution.id, step_execution.clone());
        Ok(step_execution)
    }

    async fn list_step_executions(&self, execution_id: Uuid) -> Result<Vec<WorkflowStepExecution>> {
        Ok(self
            .step_executions
            .iter()
            .filter(|s| s.execution_id == execution_id)
            .map(|s| s.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_workflow(organization_id: Uuid) -> Workflow {
        let now = Utc::now();
        Workflow {
            id: Uuid::new_v4(),
            organization_id,
            created_by: Uuid::new_v4(),
            name: "sample".to_string(),
            description: None,
            workflow_type: WorkflowType::Sequential,
            status: WorkflowStatus::Pending,
            config: serde_json::json!({}),
            tags: Vec::new(),
            metrics: WorkflowMetrics::default(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn sample_step(workflow_id: Uuid, step_order: i32) -> WorkflowStep {
        let now = Utc::now();
        WorkflowStep {
            id: Uuid::new_v4(),
            workflow_id,
            step_order,
            name: format!("step-{step_order}"),
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
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn soft_deleted_workflow_is_excluded_by_default_policy() {
        let repo = InMemoryWorkflowRepository::new();
        let org = Uuid::new_v4();
        let workflow = repo.create_workflow(sample_workflow(org)).await.unwrap();

        repo.soft_delete_workflow(workflow.id).await.unwrap();

        assert!(repo
            .get_workflow(workflow.id, DeletedPolicy::ExcludeDeleted)
            .await
            .unwrap()
            .is_none());
        assert!(repo
            .get_workflow(workflow.id, DeletedPolicy::IncludeDeleted)
            .await
            .unwrap()
            .is_some());
        assert!(repo
            .list_workflows(org, DeletedPolicy::ExcludeDeleted)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn list_steps_is_ordered_by_step_order() {
        let repo = InMemoryWorkflowRepository::new();
        let workflow_id = Uuid::new_v4();
        repo.add_step(sample_step(workflow_id, 2)).await.unwrap();
        repo.add_step(sample_step(workflow_id, 0)).await.unwrap();
        repo.add_step(sample_step(workflow_id, 1)).await.unwrap();

        let steps = repo.list_steps(workflow_id).await.unwrap();
        let orders: Vec<i32> = steps.iter().map(|s| s.step_order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn list_transitions_from_filters_by_step_and_event() {
        let repo = InMemoryWorkflowRepository::new();
        let workflow_id = Uuid::new_v4();
        let from = Uuid::new_v4();
        let to = Uuid::new_v4();
        repo.add_transition(WorkflowTransition {
            id: Uuid::new_v4(),
            workflow_id,
            from_step: from,
            to_step: to,
            on_event: TransitionEvent::OnApprove,
            condition: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
        repo.add_transition(WorkflowTransition {
            id: Uuid::new_v4(),
            workflow_id,
            from_step: from,
            to_step: to,
            on_event: TransitionEvent::OnReject,
            condition: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

        let approved = repo
            .list_transitions_from(from, TransitionEvent::OnApprove)
            .await
            .unwrap();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].on_event, TransitionEvent::OnApprove);
    }

    #[tokio::test]
    async fn list_active_executions_excludes_terminal_statuses() {
        let repo = InMemoryWorkflowRepository::new();
        let workflow_id = Uuid::new_v4();
        let now = Utc::now();
        let active = WorkflowExecution {
            id: Uuid::new_v4(),
            workflow_id,
            status: ExecutionStatus::Active,
            priority: ExecutionPriority::Normal,
            result: None,
            started_at: now,
            updated_at: now,
            completed_at: None,
        };
        let mut completed = active.clone();
        completed.id = Uuid::new_v4();
        completed.status = ExecutionStatus::Completed;

        repo.create_execution(active.clone()).await.unwrap();
        repo.create_execution(completed).await.unwrap();

        let found = repo.list_active_executions(workflow_id).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, active.id);
    }
}
