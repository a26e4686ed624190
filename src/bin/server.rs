//! Production entry point: loads configuration, connects to Postgres and
//! Redis, wires the workflow engine and request pipeline, and serves the
//! HTTP/WebSocket surface until a shutdown signal arrives.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

use taskflow_core::api::{build_router, AppState};
use taskflow_core::config::AppConfig;
use taskflow_core::pipeline::auth::{RedisSessionStore, SessionStore};
use taskflow_core::pipeline::PipelineState;
use taskflow_core::substrate::redis_client::RedisClient;
use taskflow_core::substrate::task_pool::TaskPool;
use taskflow_core::workflow::{
    EmptyRoleDirectory, FailClosedConditionEvaluator, NoopStepBodyExecutor, NullNotificationSink,
    SqlxWorkflowRepository, WorkflowEngine,
};

#[derive(Parser)]
#[command(name = "taskflow-server")]
#[command(about = "Workflow engine, request pipeline, and dashboard bus HTTP server")]
struct Cli {
    /// Overrides `server_port` from configuration.
    #[arg(long, env = "TASKFLOW_SERVER_PORT")]
    port: Option<u16>,

    /// Overrides `server_host` from configuration.
    #[arg(long, env = "TASKFLOW_SERVER_HOST")]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = AppConfig::load()?;
    if let Some(port) = cli.port {
        config.server_port = port;
    }
    if let Some(host) = cli.host {
        config.server_host = host;
    }

    info!(environment = %config.environment, "starting taskflow-core server");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|err| anyhow::anyhow!("failed to install prometheus exporter: {err}"))?;

    let db_pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.database_url)
        .await?;

    let redis = RedisClient::connect(&config.redis_url).await?;

    let sessions: Arc<dyn SessionStore> = Arc::new(RedisSessionStore::new(redis.clone()));
    let pipeline = PipelineState::new(&config, redis.clone(), sessions);

    let repo = Arc::new(SqlxWorkflowRepository::new(db_pool));
    let task_pool = TaskPool::new(config.worker_pool_size, config.step_default_timeout());
    let dashboard_publisher = Arc::new(taskflow_core::dashboard::events::RedisDashboardPublisher::new(
        redis.clone(),
    ));

    let engine = WorkflowEngine::new(
        repo,
        Arc::new(NoopStepBodyExecutor),
        Arc::new(FailClosedConditionEvaluator),
        Arc::new(EmptyRoleDirectory),
        Arc::new(NullNotificationSink),
        dashboard_publisher,
        task_pool,
        config.step_default_timeout(),
    );

    let state = AppState {
        engine,
        pipeline,
        redis: redis.clone(),
        metrics_source: Arc::new(taskflow_core::dashboard::metrics_frame::NullMetricsSource),
        dashboard_session_config: taskflow_core::dashboard::DashboardSessionConfig {
            heartbeat_interval: config.dashboard_heartbeat(),
            idle_timeout: config.dashboard_idle_timeout(),
            debounce_interval: config.dashboard_debounce(),
            outbound_capacity: config.dashboard_outbound_queue_capacity,
        },
        jwt_secret: Arc::from(config.jwt_secret.as_str()),
        prometheus_handle,
    };

    let router = build_router(state);
    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;
    info!(%addr, "listening");

    let result = axum::Server::bind(&addr)
        .serve(router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install ctrl-c handler");
            info!("shutdown signal received");
        })
        .await;

    if let Err(err) = result {
        error!(%err, "server exited with error");
        return Err(err.into());
    }

    Ok(())
}
