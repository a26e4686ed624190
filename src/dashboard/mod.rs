// Dashboard Bus — Redis-backed pub/sub fan-out into per-user WebSocket
// sessions with debounced, coalesced, partial/full metric frames.

pub mod bus;
pub mod coalesce;
pub mod events;
pub mod messages;
pub mod metrics_frame;
pub mod outbound_queue;
pub mod session;

pub use events::{DashboardEvent, DashboardPublisher};
pub use metrics_frame::{MetricsFrame, MetricsSource};
pub use session::{run_session, DashboardSessionConfig};
