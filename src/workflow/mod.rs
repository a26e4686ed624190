// Workflow domain. State machine, transitions, executor, and the
// repository/collaborator seams it delegates to.

pub mod collaborators;
pub mod engine;
pub mod models;
pub mod notifications;
pub mod repository;
pub mod sqlx_repository;

pub use collaborators::{
    ConditionEvaluator, EmptyRoleDirectory, FailClosedConditionEvaluator, NoopStepBodyExecutor,
    RoleDirectory, StepBodyExecutor,
};
pub use engine::{CreateWorkflowInput, WorkflowEngine};
pub use models::*;
pub use notifications::{CollectingNotificationSink, NotificationSink, NullNotificationSink};
pub use repository::{InMemoryWorkflowRepository, WorkflowRepository};
pub use sqlx_repository::SqlxWorkflowRepository;
