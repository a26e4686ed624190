// Workflow execution engine — the heart of the core.
//
//! Implements the public contract (create workflow, add step, add
//! transition, execute, advance, cancel) and the execution algorithm:
//! the step state machine, transition processing, and the completion check.
//!
//! Design choice (recorded in DESIGN.md): rather than bare background
//! goroutine-style tasks launched from handlers, step *bodies* run on the
//! bounded `TaskPool` with a per-step timeout. The *orchestration loop* that
//! walks an auto-advancing chain of steps runs to quiescence within the call
//! that triggered it (`execute_workflow` / `advance`) rather than being
//! detached onto a background supervisor — this keeps "the scheduler has
//! quiesced" directly observable by the caller instead of racy.

use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::dashboard::events::{DashboardEvent, DashboardPublisher};
use crate::error::{CoreError, Result};
use crate::substrate::task_pool::TaskPool;

use super::collaborators::{ConditionEvaluator, RoleDirectory, StepBodyExecutor};
use super::models::*;
use super::notifications::{self, NotificationSink};
use super::repository::WorkflowRepository;

pub struct CreateWorkflowInput {
    pub organization_id: Uuid,
    pub created_by: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub workflow_type: WorkflowType,
    pub config: Value,
    pub tags: Vec<String>,
}

struct Inner {
    repo: Arc<dyn WorkflowRepository>,
    step_body: Arc<dyn StepBodyExecutor>,
    condition_evaluator: Arc<dyn ConditionEvaluator>,
    role_directory: Arc<dyn RoleDirectory>,
    notification_sink: Arc<dyn NotificationSink>,
    dashboard: Arc<dyn DashboardPublisher>,
    task_pool: TaskPool,
    default_step_timeout: Duration,
}

#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<Inner>,
}

impl WorkflowEngine {
    pub fn new(
        repo: Arc<dyn WorkflowRepository>,
        step_body: Arc<dyn StepBodyExecutor>,
        condition_evaluator: Arc<dyn ConditionEvaluator>,
        role_directory: Arc<dyn RoleDirectory>,
        notification_sink: Arc<dyn NotificationSink>,
        dashboard: Arc<dyn DashboardPublisher>,
        task_pool: TaskPool,
        default_step_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                repo,
                step_body,
                condition_evaluator,
                role_directory,
                notification_sink,
                dashboard,
                task_pool,
                default_step_timeout,
            }),
        }
    }

    // ---- Public contract ---------------------------------------------------

    pub async fn create_workflow(&self, input: CreateWorkflowInput) -> Result<Workflow> {
        if input.name.trim().is_empty() {
            return Err(CoreError::validation_field("workflow name is required", "name"));
        }
        let now = Utc::now();
        let workflow = Workflow {
            id: Uuid::new_v4(),
            organization_id: input.organization_id,
            created_by: input.created_by,
            name: input.name,
            description: input.description,
            workflow_type: input.workflow_type,
            status: WorkflowStatus::Pending,
            config: input.config,
            tags: input.tags,
            metrics: WorkflowMetrics::default(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.inner.repo.create_workflow(workflow).await
    }

    #[instrument(skip(self, new_step))]
    pub async fn add_step(&self, workflow_id: Uuid, new_step: NewStep) -> Result<WorkflowStep> {
        self.require_workflow(workflow_id).await?;
        let existing = self.inner.repo.list_steps(workflow_id).await?;
        let step_order = new_step
            .step_order
            .unwrap_or_else(|| existing.iter().map(|s| s.step_order).max().unwrap_or(-1) + 1);
        let now = Utc::now();
        let step = WorkflowStep {
            id: Uuid::new_v4(),
            workflow_id,
            step_order,
            name: new_step.name,
            step_type: new_step.step_type.unwrap_or(StepType::Automated),
            status: StepStatus::Pending,
            config: new_step.config,
            conditions: new_step.conditions,
            is_required: new_step.is_required,
            auto_advance: new_step.auto_advance,
            can_revert: new_step.can_revert,
            assigned_to: new_step.assigned_to,
            assigned_to_role_id: new_step.assigned_to_role_id,
            version: new_step.version.unwrap_or_else(|| "1".to_string()),
            predecessor_version: new_step.predecessor_version,
            created_at: now,
            updated_at: now,
        };
        self.inner.repo.add_step(step).await
    }

    pub async fn add_transition(
        &self,
        workflow_id: Uuid,
        from_step: Uuid,
        to_step: Uuid,
        on_event: TransitionEvent,
        condition: Option<Value>,
    ) -> Result<WorkflowTransition> {
        let from = self
            .inner
            .repo
            .get_step(from_step)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("step {from_step}")))?;
        let to = self
            .inner
            .repo
            .get_step(to_step)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("step {to_step}")))?;
        if from.workflow_id != workflow_id || to.workflow_id != workflow_id {
            return Err(CoreError::validation(
                "transition endpoints must belong to the same workflow",
            ));
        }
        let transition = WorkflowTransition {
            id: Uuid::new_v4(),
            workflow_id,
            from_step,
            to_step,
            on_event,
            condition,
            created_at: Utc::now(),
        };
        self.inner.repo.add_transition(transition).await
    }

    #[instrument(skip(self))]
    pub async fn execute_workflow(
        &self,
        ctx: &RequestContext,
        workflow_id: Uuid,
    ) -> Result<WorkflowExecution> {
        self.require_workflow(workflow_id).await?;
        let steps = self.inner.repo.list_steps(workflow_id).await?;
        let min_order = steps
            .iter()
            .map(|s| s.step_order)
            .min()
            .ok_or_else(|| CoreError::validation("workflow has no steps to execute"))?;
        let entry_steps: Vec<_> = steps.iter().filter(|s| s.step_order == min_order).collect();

        let now = Utc::now();
        let execution = self
            .inner
            .repo
            .create_execution(WorkflowExecution {
                id: Uuid::new_v4(),
                workflow_id,
                status: ExecutionStatus::Pending,
                priority: ExecutionPriority::Normal,
                result: None,
                started_at: now,
                updated_at: now,
                completed_at: None,
            })
            .await?;

        let mut queue = VecDeque::new();
        for step in &entry_steps {
            let step_execution = self
                .inner
                .repo
                .create_step_execution(WorkflowStepExecution {
                    id: Uuid::new_v4(),
                    execution_id: execution.id,
                    step_id: step.id,
                    status: StepStatus::Pending,
                    error: None,
                    result: None,
                    priority: execution.priority,
                    metadata: StepExecutionMetadata::default(),
                    started_at: None,
                    updated_at: now,
                    completed_at: None,
                })
                .await?;
            queue.push_back(step_execution.id);
        }

        let mut execution = execution;
        execution.status = ExecutionStatus::Active;
        let execution = self.inner.repo.update_execution(execution).await?;

        self.drive(ctx, execution.id, queue).await?;
        self.inner
            .repo
            .get_execution(execution.id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("execution {}", execution.id)))
    }

    #[instrument(skip(self))]
    pub async fn advance(
        &self,
        ctx: &RequestContext,
        step_execution_id: Uuid,
        action: AdvanceAction,
    ) -> Result<()> {
        let step_execution = self
            .inner
            .repo
            .get_step_execution(step_execution_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("step execution {step_execution_id}")))?;
        let execution = self
            .inner
            .repo
            .get_execution(step_execution.execution_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("execution {}", step_execution.execution_id)))?;
        if execution.status == ExecutionStatus::Cancelled {
            return Err(CoreError::Conflict("execution is cancelled".into()));
        }
        let step = self
            .inner
            .repo
            .get_step(step_execution.step_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("step {}", step_execution.step_id)))?;
        if !step.step_type.is_gated() {
            return Err(CoreError::Conflict(
                "only manual/approval steps accept an explicit advance".into(),
            ));
        }
        if step_execution.status != StepStatus::Pending {
            return Err(CoreError::Conflict(format!(
                "step execution {step_execution_id} is not awaiting advance"
            )));
        }

        let mut step_execution = step_execution;
        let now = Utc::now();
        step_execution.status = match action {
            AdvanceAction::Approve | AdvanceAction::Complete => StepStatus::Completed,
            AdvanceAction::Reject | AdvanceAction::Fail => StepStatus::Failed,
        };
        if step_execution.status == StepStatus::Failed {
            step_execution.error = Some(format!("gated step {}", action_label(action)));
        }
        if step_execution.status == StepStatus::Completed {
            step_execution.completed_at = Some(now);
            step_execution.result = Some(json!({
                "completed_at": now,
                "duration_seconds": duration_seconds(step_execution.started_at, now),
            }));
        }
        let step_execution = self.inner.repo.update_step_execution(step_execution).await?;

        let mut queue = VecDeque::new();
        if step_execution.status == StepStatus::Completed {
            queue.extend(
                self.process_transitions(
                    ctx,
                    execution.id,
                    &step,
                    &step_execution,
                    TransitionEvent::OnApprove,
                )
                .await?,
            );
        } else {
            self.process_transitions(
                ctx,
                execution.id,
                &step,
                &step_execution,
                TransitionEvent::OnFail,
            )
            .await?;
        }

        self.drive(ctx, execution.id, queue).await
    }

    pub async fn cancel_execution(&self, execution_id: Uuid) -> Result<()> {
        let mut execution = self
            .inner
            .repo
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("execution {execution_id}")))?;
        execution.status = ExecutionStatus::Cancelled;
        execution.completed_at = Some(Utc::now());
        self.inner.repo.update_execution(execution).await?;
        Ok(())
    }

    pub async fn cancel_active_executions(&self, workflow_id: Uuid) -> Result<usize> {
        let active = self.inner.repo.list_active_executions(workflow_id).await?;
        let count = active.len();
        for mut execution in active {
            execution.status = ExecutionStatus::Cancelled;
            execution.completed_at = Some(Utc::now());
            self.inner.repo.update_execution(execution).await?;
        }
        Ok(count)
    }

    // ---- Execution algorithm -----------------------------------------------

    /// Drains a queue of step-execution ids, running each to completion and
    /// queuing whatever auto-advancing transitions it produces, until the
    /// queue is dry. Then runs the completion check.
    async fn drive(
        &self,
        ctx: &RequestContext,
        execution_id: Uuid,
        mut queue: VecDeque<Uuid>,
    ) -> Result<()> {
        while let Some(step_execution_id) = queue.pop_front() {
            if self.is_cancelled(execution_id).await? {
                break;
            }
            let produced = self.run_step_execution(ctx, execution_id, step_execution_id).await?;
            queue.extend(produced);
        }
        self.check_completion(execution_id).await
    }

    async fn is_cancelled(&self, execution_id: Uuid) -> Result<bool> {
        Ok(self
            .inner
            .repo
            .get_execution(execution_id)
            .await?
            .map(|e| e.status == ExecutionStatus::Cancelled)
            .unwrap_or(false))
    }

    /// Runs one step execution through the state machine (§4.1 "Step state
    /// machine" / "Execution algorithm"). Returns the ids of any newly
    /// created step executions that should run immediately because their
    /// target step has `auto_advance = true`.
    async fn run_step_execution(
        &self,
        ctx: &RequestContext,
        execution_id: Uuid,
        step_execution_id: Uuid,
    ) -> Result<Vec<Uuid>> {
        let mut step_execution = self
            .inner
            .repo
            .get_step_execution(step_execution_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("step execution {step_execution_id}")))?;
        let step = self
            .inner
            .repo
            .get_step(step_execution.step_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("step {}", step_execution.step_id)))?;

        if step.step_type.is_gated() {
            step_execution.started_at.get_or_insert(Utc::now());
            step_execution.status = StepStatus::Pending;
            let step_execution = self.inner.repo.update_step_execution(step_execution).await?;
            self.notify_step_pending(execution_id, &step, &step_execution).await;
            return Ok(Vec::new());
        }

        step_execution.status = StepStatus::Active;
        step_execution.started_at.get_or_insert(Utc::now());
        let step_execution = self.inner.repo.update_step_execution(step_execution).await?;

        let body_result = self.run_body_with_retry(ctx, &step, &step_execution).await;

        let mut step_execution = step_execution;
        let now = Utc::now();
        let event = match body_result {
            Ok(result) => {
                step_execution.status = StepStatus::Completed;
                step_execution.completed_at = Some(now);
                step_execution.result = Some(merge_result(result, now, step_execution.started_at));
                TransitionEvent::OnApprove
            }
            Err(message) => {
                step_execution.status = StepStatus::Failed;
                step_execution.error = Some(message);
                TransitionEvent::OnFail
            }
        };
        let step_execution = self.inner.repo.update_step_execution(step_execution).await?;

        let new_ids = self
            .process_transitions(ctx, execution_id, &step, &step_execution, event)
            .await?;
        Ok(new_ids)
    }

    /// Bounds step-body execution on the shared `TaskPool` and applies the
    /// step's retry policy, if any.
    async fn run_body_with_retry(
        &self,
        ctx: &RequestContext,
        step: &WorkflowStep,
        step_execution: &WorkflowStepExecution,
    ) -> std::result::Result<Value, String> {
        let retry_policy = step.retry_policy();
        let max_attempts = retry_policy.map(|p| p.max_attempts).unwrap_or(1).max(1);
        let timeout = step
            .timeout_secs()
            .map(Duration::from_secs)
            .unwrap_or(self.inner.default_step_timeout);

        let mut last_error = "step body failed".to_string();
        for attempt in 1..=max_attempts {
            if ctx.is_cancelled() {
                return Err("request cancelled".into());
            }
            let step_body = self.inner.step_body.clone();
            let step_execution = step_execution.clone();
            let config = step.config.clone();
            let outcome = self
                .inner
                .task_pool
                .spawn(Some(timeout), async move {
                    step_body.execute(&step_execution, &config).await
                })
                .await;

            match outcome {
                Some(Ok(value)) => return Ok(value),
                Some(Err(message)) => last_error = message,
                None => last_error = "step timed out".to_string(),
            }

            if attempt < max_attempts {
                if let Some(policy) = retry_policy {
                    tokio::time::sleep(policy.backoff_for_attempt(attempt)).await;
                }
            }
        }
        Err(last_error)
    }

    /// Transition processing for `(step_execution, step, event)`. Returns
    /// the ids of newly created step executions whose target step is
    /// `auto_advance`.
    async fn process_transitions(
        &self,
        ctx: &RequestContext,
        execution_id: Uuid,
        from_step: &WorkflowStep,
        from_step_execution: &WorkflowStepExecution,
        event: TransitionEvent,
    ) -> Result<Vec<Uuid>> {
        let transitions = self
            .inner
            .repo
            .list_transitions_from(from_step.id, event)
            .await?;

        if transitions.is_empty() {
            if event == TransitionEvent::OnApprove {
                self.check_completion(execution_id).await?;
            }
            return Ok(Vec::new());
        }

        let mut ready = Vec::new();
        for transition in transitions {
            let allowed = match &transition.condition {
                None => true,
                Some(value) if is_empty_condition(value) => true,
                Some(condition) => self
                    .inner
                    .condition_evaluator
                    .evaluate(condition, from_step_execution)
                    .await
                    .unwrap_or(false),
            };
            if !allowed {
                continue;
            }

            let to_step = match self.inner.repo.get_step(transition.to_step).await? {
                Some(step) => step,
                None => {
                    warn!(transition_id = %transition.id, "transition target step missing");
                    continue;
                }
            };

            let step_execution = self
                .inner
                .repo
                .create_step_execution(WorkflowStepExecution {
                    id: Uuid::new_v4(),
                    execution_id,
                    step_id: to_step.id,
                    status: StepStatus::Pending,
                    error: None,
                    result: None,
                    priority: from_step_execution.priority,
                    metadata: StepExecutionMetadata {
                        previous_step_id: Some(from_step.id),
                        transition_id: Some(transition.id),
                        attempt: 0,
                    },
                    started_at: None,
                    updated_at: Utc::now(),
                    completed_at: None,
                })
                .await?;

            if to_step.auto_advance {
                ready.push(step_execution.id);
            }
        }
        Ok(ready)
    }

    /// Completion check for execution `X`.
    async fn check_completion(&self, execution_id: Uuid) -> Result<()> {
        let mut execution = self
            .inner
            .repo
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("execution {execution_id}")))?;
        if execution.status.is_terminal() {
            return Ok(());
        }

        let step_executions = self.inner.repo.list_step_executions(execution_id).await?;
        if step_executions
            .iter()
            .any(|se| matches!(se.status, StepStatus::Pending | StepStatus::Active))
        {
            return Ok(());
        }

        let mut all_required_completed = true;
        for step_execution in &step_executions {
            let step = self
                .inner
                .repo
                .get_step(step_execution.step_id)
                .await?
                .ok_or_else(|| CoreError::NotFound(format!("step {}", step_execution.step_id)))?;
            if step.is_required && step_execution.status != StepStatus::Completed {
                all_required_completed = false;
            }
        }

        let now = Utc::now();
        execution.status = if all_required_completed {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        };
        execution.completed_at = Some(now);
        let duration = duration_seconds(Some(execution.started_at), now);
        execution.result = Some(json!({
            "completed_at": now,
            "duration_seconds": duration,
            "status": if all_required_completed { "success" } else { "failed" },
        }));
        let execution = self.inner.repo.update_execution(execution).await?;

        self.update_workflow_metrics(&execution, duration, all_required_completed)
            .await?;
        self.notify_completion(&execution, all_required_completed).await?;
        Ok(())
    }

    async fn update_workflow_metrics(
        &self,
        execution: &WorkflowExecution,
        duration_seconds: f64,
        success: bool,
    ) -> Result<()> {
        let mut workflow = self
            .inner
            .repo
            .get_workflow(execution.workflow_id, Default::default())
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("workflow {}", execution.workflow_id)))?;
        workflow.metrics.total_executions += 1;
        if success {
            workflow.metrics.successful_executions += 1;
        }
        workflow.metrics.last_executed_at = Some(execution.completed_at.unwrap_or_else(Utc::now));
        workflow.metrics.actual_duration_seconds = Some(duration_seconds);
        workflow.metrics.success_rate = Some(
            workflow.metrics.successful_executions as f64 / workflow.metrics.total_executions as f64,
        );
        workflow.status = if success {
            WorkflowStatus::Completed
        } else {
            WorkflowStatus::Failed
        };
        self.inner.repo.update_workflow(workflow).await?;
        Ok(())
    }

    // ---- Notification fan-out ----------------------------------------------

    async fn notify_step_pending(
        &self,
        execution_id: Uuid,
        step: &WorkflowStep,
        step_execution: &WorkflowStepExecution,
    ) {
        let mut recipients = Vec::new();
        if let Some(user_id) = step.assigned_to {
            recipients.push(user_id);
        } else if let Some(role_id) = step.assigned_to_role_id {
            match self.inner.role_directory.members_of(role_id).await {
                Ok(members) => recipients.extend(members),
                Err(err) => warn!(%err, %role_id, "failed to resolve role membership"),
            }
        } else {
            return;
        }

        for user_id in recipients {
            let mut details = HashMap::new();
            details.insert("step_id".to_string(), json!(step.id));
            details.insert("step_name".to_string(), json!(step.name));
            let notification = WorkflowNotification {
                notification_type: NOTIFICATION_ACTION_REQUIRED,
                user_id,
                workflow_id: step.workflow_id,
                execution_id,
                step_id: Some(step.id),
                details,
            };
            notifications::dispatch(self.inner.notification_sink.as_ref(), notification).await;

            let event = DashboardEvent::new("workflow_action_required", user_id)
                .with_entity(step_execution.id)
                .with_detail("action", "workflow_action_required")
                .with_detail("workflow_id", step.workflow_id.to_string())
                .with_detail("step_id", step.id.to_string());
            self.inner.dashboard.publish(event).await;
        }
    }

    async fn notify_completion(&self, execution: &WorkflowExecution, success: bool) -> Result<()> {
        if !success {
            return Ok(());
        }
        let workflow = self
            .inner
            .repo
            .get_workflow(execution.workflow_id, Default::default())
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("workflow {}", execution.workflow_id)))?;

        let mut details = HashMap::new();
        details.insert("execution_id".to_string(), json!(execution.id));
        let notification = WorkflowNotification {
            notification_type: NOTIFICATION_WORKFLOW_COMPLETED,
            user_id: workflow.created_by,
            workflow_id: workflow.id,
            execution_id: execution.id,
            step_id: None,
            details,
        };
        notifications::dispatch(self.inner.notification_sink.as_ref(), notification).await;

        let event = DashboardEvent::new("workflow_completed", workflow.created_by)
            .with_entity(execution.id)
            .with_detail("action", "workflow_completed");
        self.inner.dashboard.publish(event).await;
        Ok(())
    }

    async fn require_workflow(&self, workflow_id: Uuid) -> Result<Workflow> {
        self.inner
            .repo
            .get_workflow(workflow_id, Default::default())
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("workflow {workflow_id}")))
    }

    // ---- Straightforward CRUD the HTTP surface needs -----------------------
    //
    // These aren't part of the execution algorithm's public contract, but
    // the HTTP surface needs list/get/update/delete routes, so the engine —
    // the only thing holding a repository handle — exposes them as thin
    // passthroughs rather than handing handlers a second, parallel path to
    // the repository.

    pub async fn get_workflow(&self, workflow_id: Uuid) -> Result<Workflow> {
        self.require_workflow(workflow_id).await
    }

    pub async fn list_workflows(&self, organization_id: Uuid) -> Result<Vec<Workflow>> {
        self.inner
            .repo
            .list_workflows(organization_id, Default::default())
            .await
    }

    pub async fn update_workflow(&self, workflow_id: Uuid, update: WorkflowUpdate) -> Result<Workflow> {
        let mut workflow = self.require_workflow(workflow_id).await?;
        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err(CoreError::validation_field("workflow name is required", "name"));
            }
            workflow.name = name;
        }
        if let Some(description) = update.description {
            workflow.description = Some(description);
        }
        if let Some(status) = update.status {
            workflow.status = status;
        }
        if let Some(config) = update.config {
            workflow.config = config;
        }
        if let Some(tags) = update.tags {
            workflow.tags = tags;
        }
        workflow.updated_at = Utc::now();
        self.inner.repo.update_workflow(workflow).await
    }

    pub async fn delete_workflow(&self, workflow_id: Uuid) -> Result<()> {
        self.require_workflow(workflow_id).await?;
        self.inner.repo.soft_delete_workflow(workflow_id).await
    }

    pub async fn list_steps(&self, workflow_id: Uuid) -> Result<Vec<WorkflowStep>> {
        self.require_workflow(workflow_id).await?;
        self.inner.repo.list_steps(workflow_id).await
    }

    pub async fn get_execution(&self, execution_id: Uuid) -> Result<WorkflowExecution> {
        self.inner
            .repo
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("execution {execution_id}")))
    }

    pub async fn list_step_executions(&self, execution_id: Uuid) -> Result<Vec<WorkflowStepExecution>> {
        self.inner.repo.list_step_executions(execution_id).await
    }

    pub async fn get_step_execution(&self, step_execution_id: Uuid) -> Result<WorkflowStepExecution> {
        self.inner
            .repo
            .get_step_execution(step_execution_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("step execution {step_execution_id}")))
    }
}

fn is_empty_condition(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn duration_seconds(started_at: Option<chrono::DateTime<Utc>>, now: chrono::DateTime<Utc>) -> f64 {
    started_at
        .map(|start| (now - start).num_milliseconds() as f64 / 1000.0)
        .unwrap_or(0.0)
}

fn merge_result(
    mut value: Value,
    completed_at: chrono::DateTime<Utc>,
    started_at: Option<chrono::DateTime<Utc>>,
) -> Value {
    if !value.is_object() {
        value = json!({});
    }
    let obj = value.as_object_mut().expect("forced to object above");
    obj.insert("completed_at".to_string(), json!(completed_at));
    obj.insert(
        "duration_seconds".to_string(),
        json!(duration_seconds(started_at, completed_at)),
    );
    value
}

fn action_label(action: AdvanceAction) -> &'static str {
    match action {
        AdvanceAction::Approve => "approved",
        AdvanceAction::Reject => "rejected",
        AdvanceAction::Complete => "completed",
        AdvanceAction::Fail => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::events::CollectingDashboardPublisher;
    use crate::workflow::collaborators::{EmptyRoleDirectory, FailClosedConditionEvaluator, NoopStepBodyExecutor};
    use crate::workflow::notifications::CollectingNotificationSink;

    fn test_engine() -> WorkflowEngine {
        let repo = Arc::new(InMemoryWorkflowRepository::new());
        WorkflowEngine::new(
            repo,
            Arc::new(NoopStepBodyExecutor),
            Arc::new(FailClosedConditionEvaluator),
            Arc::new(EmptyRoleDirectory),
            Arc::new(CollectingNotificationSink::new()),
            Arc::new(CollectingDashboardPublisher::new()),
            TaskPool::new(4, Duration::from_secs(5)),
            Duration::from_secs(5),
        )
    }

    async fn create_test_workflow(engine: &WorkflowEngine) -> Workflow {
        engine
            .create_workflow(CreateWorkflowInput {
                organization_id: Uuid::new_v4(),
                created_by: Uuid::new_v4(),
                name: "onboarding".to_string(),
                description: None,
                workflow_type: WorkflowType::Sequential,
                config: json!({}),
                tags: Vec::new(),
            })
            .await
            .unwrap()
    }

    async fn step_execution_for(
        engine: &WorkflowEngine,
        execution_id: Uuid,
        step_id: Uuid,
    ) -> WorkflowStepExecution {
        engine
            .list_step_executions(execution_id)
            .await
            .unwrap()
            .into_iter()
            .find(|se| se.step_id == step_id)
            .expect("step execution must exist")
    }

    /// Approval gate, then happy path to completion.
    #[tokio::test]
    async fn s1_approval_gate_then_completion() {
        let engine = test_engine();
        let workflow = create_test_workflow(&engine).await;

        let s1 = engine
            .add_step(
                workflow.id,
                NewStep {
                    name: "s1".to_string(),
                    step_type: Some(StepType::Automated),
                    is_required: true,
                    auto_advance: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let s2 = engine
            .add_step(
                workflow.id,
                NewStep {
                    name: "s2".to_string(),
                    step_type: Some(StepType::Approval),
                    is_required: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let s3 = engine
            .add_step(
                workflow.id,
                NewStep {
                    name: "s3".to_string(),
                    step_type: Some(StepType::Automated),
                    is_required: true,
                    auto_advance: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        engine
            .add_transition(workflow.id, s1.id, s2.id, TransitionEvent::OnApprove, None)
            .await
            .unwrap();
        engine
            .add_transition(workflow.id, s2.id, s3.id, TransitionEvent::OnApprove, None)
            .await
            .unwrap();

        let ctx = RequestContext::new();
        let execution = engine.execute_workflow(&ctx, workflow.id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Active);

        let s1_exec = step_execution_for(&engine, execution.id, s1.id).await;
        assert_eq!(s1_exec.status, StepStatus::Completed);
        let s2_exec = step_execution_for(&engine, execution.id, s2.id).await;
        assert_eq!(s2_exec.status, StepStatus::Pending);

        engine
            .advance(&ctx, s2_exec.id, AdvanceAction::Approve)
            .await
            .unwrap();

        let s2_exec = step_execution_for(&engine, execution.id, s2.id).await;
        assert_eq!(s2_exec.status, StepStatus::Completed);
        let s3_exec = step_execution_for(&engine, execution.id, s3.id).await;
        assert_eq!(s3_exec.status, StepStatus::Completed);

        let execution = engine.get_execution(execution.id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(
            execution.result.unwrap()["status"],
            json!("success")
        );
    }

    /// Rejecting the gate fails the execution and never creates the
    /// downstream step.
    #[tokio::test]
    async fn s2_rejection_fails_execution_without_downstream_step() {
        let engine = test_engine();
        let workflow = create_test_workflow(&engine).await;

        let s1 = engine
            .add_step(
                workflow.id,
                NewStep {
                    name: "s1".to_string(),
                    step_type: Some(StepType::Automated),
                    is_required: true,
                    auto_advance: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let s2 = engine
            .add_step(
                workflow.id,
                NewStep {
                    name: "s2".to_string(),
                    step_type: Some(StepType::Approval),
                    is_required: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let s3 = engine
            .add_step(
                workflow.id,
                NewStep {
                    name: "s3".to_string(),
                    step_type: Some(StepType::Automated),
                    is_required: true,
                    auto_advance: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        engine
            .add_transition(workflow.id, s1.id, s2.id, TransitionEvent::OnApprove, None)
            .await
            .unwrap();
        engine
            .add_transition(workflow.id, s2.id, s3.id, TransitionEvent::OnApprove, None)
            .await
            .unwrap();

        let ctx = RequestContext::new();
        let execution = engine.execute_workflow(&ctx, workflow.id).await.unwrap();
        let s2_exec = step_execution_for(&engine, execution.id, s2.id).await;

        engine
            .advance(&ctx, s2_exec.id, AdvanceAction::Reject)
            .await
            .unwrap();

        let s2_exec = step_execution_for(&engine, execution.id, s2.id).await;
        assert_eq!(s2_exec.status, StepStatus::Failed);
        assert!(engine
            .list_step_executions(execution.id)
            .await
            .unwrap()
            .iter()
            .all(|se| se.step_id != s3.id));

        let execution = engine.get_execution(execution.id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.result.unwrap()["status"], json!("failed"));
    }

    /// A terminal execution has no pending/active step executions left over.
    #[tokio::test]
    async fn invariant_terminal_execution_has_no_pending_steps() {
        let engine = test_engine();
        let workflow = create_test_workflow(&engine).await;
        let step = engine
            .add_step(
                workflow.id,
                NewStep {
                    name: "only".to_string(),
                    step_type: Some(StepType::Automated),
                    is_required: true,
                    auto_advance: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let _ = step;

        let ctx = RequestContext::new();
        let execution = engine.execute_workflow(&ctx, workflow.id).await.unwrap();
        assert!(execution.status.is_terminal());
        let step_executions = engine.list_step_executions(execution.id).await.unwrap();
        assert!(step_executions
            .iter()
            .all(|se| !matches!(se.status, StepStatus::Pending | StepStatus::Active)));
    }

    /// Completed step executions carry `completed_at >= started_at` plus a
    /// non-null result with duration.
    #[tokio::test]
    async fn invariant_completed_step_execution_has_duration_result() {
        let engine = test_engine();
        let workflow = create_test_workflow(&engine).await;
        let step = engine
            .add_step(
                workflow.id,
                NewStep {
                    name: "only".to_string(),
                    step_type: Some(StepType::Automated),
                    is_required: true,
                    auto_advance: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let ctx = RequestContext::new();
        let execution = engine.execute_workflow(&ctx, workflow.id).await.unwrap();
        let step_exec = step_execution_for(&engine, execution.id, step.id).await;
        assert_eq!(step_exec.status, StepStatus::Completed);
        assert!(step_exec.completed_at.unwrap() >= step_exec.started_at.unwrap());
        let result = step_exec.result.unwrap();
        assert!(result.get("completed_at").is_some());
        assert!(result.get("duration_seconds").is_some());
    }

    #[tokio::test]
    async fn cancelled_execution_rejects_further_advance() {
        let engine = test_engine();
        let workflow = create_test_workflow(&engine).await;
        let s1 = engine
            .add_step(
                workflow.id,
                NewStep {
                    name: "gate".to_string(),
                    step_type: Some(StepType::Approval),
                    is_required: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let ctx = RequestContext::new();
        let execution = engine.execute_workflow(&ctx, workflow.id).await.unwrap();
        let step_exec = step_execution_for(&engine, execution.id, s1.id).await;

        engine.cancel_execution(execution.id).await.unwrap();

        let result = engine.advance(&ctx, step_exec.id, AdvanceAction::Approve).await;
        assert!(result.is_err());
    }
}
