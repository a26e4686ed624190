// Postgres-backed workflow repository — production counterpart to
// `InMemoryWorkflowRepository`, following the same trait so the engine is
// backend-agnostic and storage stays an implementation detail behind a
// repository interface.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::substrate::repository::DeletedPolicy;

use super::models::*;
use super::repository::WorkflowRepository;

#[derive(Clone)]
pub struct SqlxWorkflowRepository {
    pool: PgPool,
}

impl SqlxWorkflowRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn workflow_from_row(row: &PgRow) -> std::result::Result<Workflow, sqlx::Error> {
    Ok(Workflow {
        id: row.try_get("id")?,
        organization_id: row.try_get("organization_id")?,
        created_by: row.try_get("created_by")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        workflow_type: serde_json::from_value(row.try_get::<Value, _>("workflow_type")?)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        status: serde_json::from_value(row.try_get::<Value, _>("status")?)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        config: row.try_get("config")?,
        tags: row.try_get("tags")?,
        metrics: serde_json::from_value(row.try_get::<Value, _>("metrics")?)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn step_from_row(row: &PgRow) -> std::result::Result<WorkflowStep, sqlx::Error> {
    Ok(WorkflowStep {
        id: row.try_get("id")?,
        workflow_id: row.try_get("workflow_id")?,
        step_order: row.try_get("step_order")?,
        name: row.try_get("name")?,
        step_type: serde_json::from_value(row.try_get::<Value, _>("step_type")?)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        status: serde_json::from_value(row.try_get::<Value, _>("status")?)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        config: row.try_get("config")?,
        conditions: row.try_get("conditions")?,
        is_required: row.try_get("is_required")?,
        auto_advance: row.try_get("auto_advance")?,
        can_revert: row.try_get("can_revert")?,
        assigned_to: row.try_get("assigned_to")?,
        assigned_to_role_id: row.try_get("assigned_to_role_id")?,
        version: row.try_get("version")?,
        predecessor_version: row.try_get("predecessor_version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn transition_from_row(row: &PgRow) -> std::result::Result<WorkflowTransition, sqlx::Error> {
    Ok(WorkflowTransition {
        id: row.try_get("id")?,
        workflow_id: row.try_get("workflow_id")?,
        from_step: row.try_get("from_step")?,
        to_step: row.try_get("to_step")?,
        on_event: serde_json::from_value(row.try_get::<Value, _>("on_event")?)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        condition: row.try_get("condition")?,
        created_at: row.try_get("created_at")?,
    })
}

fn execution_from_row(row: &PgRow) -> std::result::Result<WorkflowExecution, sqlx::Error> {
    Ok(WorkflowExecution {
        id: row.try_get("id")?,
        workflow_id: row.try_get("workflow_id")?,
        status: serde_json::from_value(row.try_get::<Value, _>("status")?)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        priority: serde_json::from_value(row.try_get::<Value, _>("priority")?)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        result: row.try_get("result")?,
        started_at: row.try_get("started_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn step_execution_from_row(row: &PgRow) -> std::result::Result<WorkflowStepExecution, sqlx::Error> {
    let metadata: Value = row.try_get("metadata")?;
    Ok(WorkflowStepExecution {
        id: row.try_get("id")?,
        execution_id: row.try_get("execution_id")?,
        step_id: row.try_get("step_id")?,
        status: serde_json::from_value(row.try_get::<Value, _>("status")?)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        error: row.try_get("error")?,
        result: row.try_get("result")?,
        priority: serde_json::from_value(row.try_get::<Value, _>("priority")?)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        metadata: serde_json::from_value(metadata).unwrap_or_default(),
        started_at: row.try_get("started_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

#[async_trait]
impl WorkflowRepository for SqlxWorkflowRepository {
    async fn create_workflow(&self, workflow: Workflow) -> Result<Workflow> {
        let row = sqlx::query(
            r#"
            INSERT INTO workflows
                (id, organization_id, created_by, name, description, workflow_type,
                 status, config, tags, metrics, created_at, updated_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(workflow.id)
        .bind(workflow.organization_id)
        .bind(workflow.created_by)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(serde_json::to_value(workflow.workflow_type).unwrap())
        .bind(serde_json::to_value(workflow.status).unwrap())
        .bind(&workflow.config)
        .bind(&workflow.tags)
        .bind(serde_json::to_value(&workflow.metrics).unwrap())
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .bind(workflow.deleted_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(workflow_from_row(&row)?)
    }

    async fn get_workflow(&self, id: Uuid, policy: DeletedPolicy) -> Result<Option<Workflow>> {
        let row = sqlx::query(
            "SELECT * FROM workflows WHERE id = $1 AND ($2 OR deleted_at IS NULL)",
        )
        .bind(id)
        .bind(policy.includes_deleted())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(workflow_from_row).transpose()?)
    }

    async fn list_workflows(
        &self,
        organization_id: Uuid,
        policy: DeletedPolicy,
    ) -> Result<Vec<Workflow>> {
        let rows = sqlx::query(
            "SELECT * FROM workflows WHERE organization_id = $1 AND ($2 OR deleted_at IS NULL) ORDER BY created_at",
        )
        .bind(organization_id)
        .bind(policy.includes_deleted())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(workflow_from_row)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(CoreError::from)
    }

    async fn update_workflow(&self, workflow: Workflow) -> Result<Workflow> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            UPDATE workflows SET
                name = $2, description = $3, workflow_type = $4, status = $5,
                config = $6, tags = $7, metrics = $8, updated_at = $9
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(serde_json::to_value(workflow.workflow_type).unwrap())
        .bind(serde_json::to_value(workflow.status).unwrap())
        .bind(&workflow.config)
        .bind(&workflow.tags)
        .bind(serde_json::to_value(&workflow.metrics).unwrap())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(workflow_from_row(&row)?)
    }

    async fn soft_delete_workflow(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("UPDATE workflows SET deleted_at = $2 WHERE id = $1")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("workflow {id}")));
        }
        Ok(())
    }

    async fn add_step(&self, step: WorkflowStep) -> Result<WorkflowStep> {
        let row = sqlx::query(
            r#"
            INSERT INTO workflow_steps
                (id, workflow_id, step_order, name, step_type, status, config, conditions,
                 is_required, auto_advance, can_revert, assigned_to, assigned_to_role_id,
                 version, predecessor_version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING *
            "#,
        )
        .bind(step.id)
        .bind(step.workflow_id)
        .bind(step.step_order)
        .bind(&step.name)
        .bind(serde_json::to_value(step.step_type).unwrap())
        .bind(serde_json::to_value(step.status).unwrap())
        .bind(&step.config)
        .bind(&step.conditions)
        .bind(step.is_required)
        .bind(step.auto_advance)
        .bind(step.can_revert)
        .bind(step.assigned_to)
        .bind(step.assigned_to_role_id)
        .bind(&step.version)
        .bind(&step.predecessor_version)
        .bind(step.created_at)
        .bind(step.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(step_from_row(&row)?)
    }

    async fn get_step(&self, id: Uuid) -> Result<Option<WorkflowStep>> {
        let row = sqlx::query("SELECT * FROM workflow_steps WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(step_from_row).transpose()?)
    }

    async fn list_steps(&self, workflow_id: Uuid) -> Result<Vec<WorkflowStep>> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_steps WHERE workflow_id = $1 ORDER BY step_order",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(step_from_row)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(CoreError::from)
    }

    async fn update_step(&self, step: WorkflowStep) -> Result<WorkflowStep> {
        let row = sqlx::query(
            r#"
            UPDATE workflow_steps SET
                name = $2, step_type = $3, status = $4, config = $5, conditions = $6,
                is_required = $7, auto_advance = $8, can_revert = $9, assigned_to = $10,
                assigned_to_role_id = $11, version = $12, predecessor_version = $13,
                updated_at = $14
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(step.id)
        .bind(&step.name)
        .bind(serde_json::to_value(step.step_type).unwrap())
        .bind(serde_json::to_value(step.status).unwrap())
        .bind(&step.config)
        .bind(&step.conditions)
        .bind(step.is_required)
        .bind(step.auto_advance)
        .bind(step.can_revert)
        .bind(step.assigned_to)
        .bind(step.assigned_to_role_id)
        .bind(&step.version)
        .bind(&step.predecessor_version)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(step_from_row(&row)?)
    }

    async fn add_transition(&self, transition: WorkflowTransition) -> Result<WorkflowTransition> {
        let row = sqlx::query(
            r#"
            INSERT INTO workflow_transitions
                (id, workflow_id, from_step, to_step, on_event, condition, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(transition.id)
        .bind(transition.workflow_id)
        .bind(transition.from_step)
        .bind(transition.to_step)
        .bind(serde_json::to_value(transition.on_event).unwrap())
        .bind(&transition.condition)
        .bind(transition.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(transition_from_row(&row)?)
    }

    async fn list_transitions_from(
        &self,
        from_step: Uuid,
        on_event: TransitionEvent,
    ) -> Result<Vec<WorkflowTransition>> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_transitions WHERE from_step = $1 AND on_event = $2",
        )
        .bind(from_step)
        .bind(serde_json::to_value(on_event).unwrap())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(transition_from_row)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(CoreError::from)
    }

    async fn create_execution(&self, execution: WorkflowExecution) -> Result<WorkflowExecution> {
        let row = sqlx::query(
            r#"
            INSERT INTO workflow_executions
                (id, workflow_id, status, priority, result, started_at, updated_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(execution.id)
        .bind(execution.workflow_id)
        .bind(serde_json::to_value(execution.status).unwrap())
        .bind(serde_json::to_value(execution.priority).unwrap())
        .bind(&execution.result)
        .bind(execution.started_at)
        .bind(execution.updated_at)
        .bind(execution.completed_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(execution_from_row(&row)?)
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<WorkflowExecution>> {
        let row = sqlx::query("SELECT * FROM workflow_executions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(execution_from_row).transpose()?)
    }

    async fn update_execution(&self, execution: WorkflowExecution) -> Result<WorkflowExecution> {
        let row = sqlx::query(
            r#"
            UPDATE workflow_executions SET
                status = $2, priority = $3, result = $4, updated_at = $5, completed_at = $6
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(execution.id)
        .bind(serde_json::to_value(execution.status).unwrap())
        .bind(serde_json::to_value(execution.priority).unwrap())
        .bind(&execution.result)
        .bind(Utc::now())
        .bind(execution.completed_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(execution_from_row(&row)?)
    }

    async fn list_active_executions(&self, workflow_id: Uuid) -> Result<Vec<WorkflowExecution>> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_executions WHERE workflow_id = $1 AND status IN ($2, $3)",
        )
        .bind(workflow_id)
        .bind(serde_json::to_value(ExecutionStatus::Pending).unwrap())
        .bind(serde_json::to_value(ExecutionStatus::Active).unwrap())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(execution_from_row)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(CoreError::from)
    }

    async fn create_step_execution(
        &self,
        step_execution: WorkflowStepExecution,
    ) -> Result<WorkflowStepExecution> {
        let row = sqlx::query(
            r#"
            INSERT INTO workflow_step_executions
                (id, execution_id, step_id, status, error, result, priority, metadata,
                 started_at, updated_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(step_execution.id)
        .bind(step_execution.execution_id)
        .bind(step_execution.step_id)
        .bind(serde_json::to_value(step_execution.status).unwrap())
        .bind(&step_execution.error)
        .bind(&step_execution.result)
        .bind(serde_json::to_value(step_execution.priority).unwrap())
        .bind(serde_json::to_value(&step_execution.metadata).unwrap())
        .bind(step_execution.started_at)
        .bind(step_execution.updated_at)
        .bind(step_execution.completed_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(step_execution_from_row(&row)?)
    }

    async fn get_step_execution(&self, id: Uuid) -> Result<Option<WorkflowStepExecution>> {
        let row = sqlx::query("SELECT * FROM workflow_step_executions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(step_execution_from_row).transpose()?)
    }

    async fn update_step_execution(
        &self,
        step_execution: WorkflowStepExecution,
    ) -> Result<WorkflowStepExecution> {
        let row = sqlx::query(
            r#"
            UPDATE workflow_step_executions SET
                status = $2, error = $3, result = $4, priority = $5, metadata = $6,
                started_at = $7, updated_at = $8, completed_at = $9
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(step_execution.id)
        .bind(serde_json::to_value(step_execution.status).unwrap())
        .bind(&step_execution.error)
        .bind(&step_execution.result)
        .bind(serde_json::to_value(step_execution.priority).unwrap())
        .bind(serde_json::to_value(&step_execution.metadata).unwrap())
        .bind(step_execution.started_at)
        .bind(Utc::now())
        .bind(step_execution.completed_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(step_execution_from_row(&row)?)
    }

    async fn list_step_executions(&self, execution_id: Uuid) -> Result<Vec<WorkflowStepExecution>> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_step_executions WHERE execution_id = $1 ORDER BY updated_at",
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(step_execution_from_row)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(CoreError::from)
    }
}
