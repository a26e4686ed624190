// Workflow HTTP surface — the `/api/workflows*` routes.
//
//! Handlers are thin: they pull `Claims`/`OrganizationId` out of request
//! extensions (populated by the auth/org-scope middleware before the
//! request reaches here), translate JSON bodies into the engine's input
//! types, and hand off to `WorkflowEngine`. No business logic lives here.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use axum::routing::post;
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::Result;
use crate::pipeline::auth::{require_permissions, Claims};
use crate::pipeline::cache::CacheInvalidate;
use crate::pipeline::OrganizationId;
use crate::workflow::{
    AdvanceAction, CreateWorkflowInput, NewStep, StepType, TransitionEvent, Workflow,
    WorkflowExecution, WorkflowStatus, WorkflowStep, WorkflowStepExecution, WorkflowTransition,
    WorkflowType, WorkflowUpdate,
};

use super::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_workflow).get(list_workflows))
        .route(
            "/:id",
            axum::routing::get(get_workflow)
                .put(update_workflow)
                .delete(delete_workflow),
        )
        .route("/:id/steps", post(add_step))
        .route("/:id/transitions", post(add_transition))
        .route("/:id/execute", post(execute_workflow))
        .route("/executions/:execution_id/cancel", post(cancel_execution))
        .route("/step-executions/:step_execution_id/approve", post(approve_step))
        .route("/step-executions/:step_execution_id/reject", post(reject_step))
}

/// Tags every non-`GET` response in this router with the `workflows:*`
/// invalidation pattern (`CacheInvalidate`). Must be layered outside
/// `cache_middleware` so the extension is already present when the cache
/// layer inspects the request.
pub async fn tag_cache_invalidation(mut request: Request<Body>, next: Next<Body>) -> Response {
    if request.method() != Method::GET {
        request
            .extensions_mut()
            .insert(CacheInvalidate(vec!["workflows:*".to_string()]));
    }
    next.run(request).await
}

fn request_context(claims: &Claims) -> RequestContext {
    RequestContext::new().with_user(claims.user_id)
}

#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub name: String,
    pub description: Option<String>,
    pub workflow_type: WorkflowType,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub tags: Vec<String>,
}

async fn create_workflow(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Extension(OrganizationId(org_id)): Extension<OrganizationId>,
    Json(body): Json<CreateWorkflowRequest>,
) -> Result<(StatusCode, Json<Workflow>)> {
    require_permissions(&claims, &["workflows:create"])?;
    let workflow = state
        .engine
        .create_workflow(CreateWorkflowInput {
            organization_id: org_id,
            created_by: claims.user_id,
            name: body.name,
            description: body.description,
            workflow_type: body.workflow_type,
            config: body.config,
            tags: body.tags,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

async fn list_workflows(
    State(state): State<AppState>,
    Extension(OrganizationId(org_id)): Extension<OrganizationId>,
) -> Result<Json<Vec<Workflow>>> {
    Ok(Json(state.engine.list_workflows(org_id).await?))
}

async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Workflow>> {
    Ok(Json(state.engine.get_workflow(id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateWorkflowRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<WorkflowStatus>,
    pub config: Option<Value>,
    pub tags: Option<Vec<String>>,
}

impl From<UpdateWorkflowRequest> for WorkflowUpdate {
    fn from(body: UpdateWorkflowRequest) -> Self {
        WorkflowUpdate {
            name: body.name,
            description: body.description,
            status: body.status,
            config: body.config,
            tags: body.tags,
        }
    }
}

async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateWorkflowRequest>,
) -> Result<Json<Workflow>> {
    Ok(Json(state.engine.update_workflow(id, body.into()).await?))
}

async fn delete_workflow(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode> {
    state.engine.delete_workflow(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
pub struct AddStepRequest {
    pub name: String,
    pub step_type: Option<StepType>,
    pub step_order: Option<i32>,
    #[serde(default)]
    pub config: Value,
    pub conditions: Option<Value>,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub auto_advance: bool,
    #[serde(default)]
    pub can_revert: bool,
    pub assigned_to: Option<Uuid>,
    pub assigned_to_role_id: Option<Uuid>,
    pub version: Option<String>,
    pub predecessor_version: Option<String>,
}

impl From<AddStepRequest> for NewStep {
    fn from(body: AddStepRequest) -> Self {
        NewStep {
            name: body.name,
            step_type: body.step_type,
            step_order: body.step_order,
            config: body.config,
            conditions: body.conditions,
            is_required: body.is_required,
            auto_advance: body.auto_advance,
            can_revert: body.can_revert,
            assigned_to: body.assigned_to,
            assigned_to_role_id: body.assigned_to_role_id,
            version: body.version,
            predecessor_version: body.predecessor_version,
        }
    }
}

async fn add_step(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    Json(body): Json<AddStepRequest>,
) -> Result<(StatusCode, Json<WorkflowStep>)> {
    let step = state.engine.add_step(workflow_id, body.into()).await?;
    Ok((StatusCode::CREATED, Json(step)))
}

#[derive(Debug, Deserialize)]
pub struct AddTransitionRequest {
    pub from_step: Uuid,
    pub to_step: Uuid,
    pub on_event: TransitionEvent,
    pub condition: Option<Value>,
}

async fn add_transition(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    Json(body): Json<AddTransitionRequest>,
) -> Result<(StatusCode, Json<WorkflowTransition>)> {
    let transition = state
        .engine
        .add_transition(workflow_id, body.from_step, body.to_step, body.on_event, body.condition)
        .await?;
    Ok((StatusCode::CREATED, Json(transition)))
}

async fn execute_workflow(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(workflow_id): Path<Uuid>,
) -> Result<(StatusCode, Json<WorkflowExecution>)> {
    let ctx = request_context(&claims);
    let execution = state.engine.execute_workflow(&ctx, workflow_id).await?;
    Ok((StatusCode::CREATED, Json(execution)))
}

async fn cancel_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
) -> Result<Json<WorkflowExecution>> {
    state.engine.cancel_execution(execution_id).await?;
    Ok(Json(state.engine.get_execution(execution_id).await?))
}

async fn approve_step(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(step_execution_id): Path<Uuid>,
) -> Result<Json<WorkflowStepExecution>> {
    let ctx = request_context(&claims);
    state
        .engine
        .advance(&ctx, step_execution_id, AdvanceAction::Approve)
        .await?;
    Ok(Json(state.engine.get_step_execution(step_execution_id).await?))
}

async fn reject_step(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(step_execution_id): Path<Uuid>,
) -> Result<Json<WorkflowStepExecution>> {
    let ctx = request_context(&claims);
    state
        .engine
        .advance(&ctx, step_execution_id, AdvanceAction::Reject)
        .await?;
    Ok(Json(state.engine.get_step_execution(step_execution_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_request_maps_every_field_through() {
        let body = UpdateWorkflowRequest {
            name: Some("renamed".to_string()),
            description: Some("desc".to_string()),
            status: Some(WorkflowStatus::Active),
            config: Some(serde_json::json!({"k": "v"})),
            tags: Some(vec!["a".to_string()]),
        };
        let update: WorkflowUpdate = body.into();
        assert_eq!(update.name.as_deref(), Some("renamed"));
        assert_eq!(update.description.as_deref(), Some("desc"));
        assert_eq!(update.status, Some(WorkflowStatus::Active));
        assert_eq!(update.config, Some(serde_json::json!({"k": "v"})));
        assert_eq!(update.tags, Some(vec!["a".to_string()]));
    }

    #[test]
    fn update_request_defaults_to_no_op() {
        let update: WorkflowUpdate = UpdateWorkflowRequest::default().into();
        assert!(update.name.is_none());
        assert!(update.status.is_none());
        assert!(update.tags.is_none());
    }

    #[test]
    fn add_step_request_maps_every_field_through() {
        let assigned_to = Uuid::new_v4();
        let role_id = Uuid::new_v4();
        let body = AddStepRequest {
            name: "review".to_string(),
            step_type: Some(StepType::Approval),
            step_order: Some(2),
            config: serde_json::json!({"timeout_secs": 30}),
            conditions: Some(serde_json::json!({"always": true})),
            is_required: true,
            auto_advance: false,
            can_revert: true,
            assigned_to: Some(assigned_to),
            assigned_to_role_id: Some(role_id),
            version: Some("v2".to_string()),
            predecessor_version: Some("v1".to_string()),
        };
        let step: NewStep = body.into();
        assert_eq!(step.name, "review");
        assert_eq!(step.step_type, Some(StepType::Approval));
        assert_eq!(step.step_order, Some(2));
        assert!(step.is_required);
        assert!(!step.auto_advance);
        assert!(step.can_revert);
        assert_eq!(step.assigned_to, Some(assigned_to));
        assert_eq!(step.assigned_to_role_id, Some(role_id));
        assert_eq!(step.version.as_deref(), Some("v2"));
        assert_eq!(step.predecessor_version.as_deref(), Some("v1"));
    }

    #[test]
    fn create_workflow_request_parses_with_defaulted_config_and_tags() {
        let json = r#"{"name": "onboarding", "workflow_type": "sequential"}"#;
        let body: CreateWorkflowRequest = serde_json::from_str(json).unwrap();
        assert_eq!(body.name, "onboarding");
        assert_eq!(body.config, serde_json::Value::Null);
        assert!(body.tags.is_empty());
    }
}
