//! Aggregated health reporting.
//!
//! Combines the listener state and queue counters into a unified
//! [`DaemonHealth`] report. The overall status is the worst status
//! among the observed components.
//!
//! # Aggregation Rule
//!
//! - Listener listening, no failed jobs -> Healthy
//! - Listener reconnecting or failed jobs present -> Degraded(reason)
//! - Listener shut down or permanently disconnected -> Unhealthy(reason)

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use logward_core::job::QueueCounts;
use logward_stream::{ListenerState, ListenerStatus};

/// Health status for one component or the whole daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ComponentHealth {
    /// Operating normally.
    Healthy,
    /// Operating with reduced capability.
    Degraded(String),
    /// Not operating.
    Unhealthy(String),
}

impl ComponentHealth {
    /// Whether this status is healthy.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl fmt::Display for ComponentHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded(reason) => write!(f, "degraded: {reason}"),
            Self::Unhealthy(reason) => write!(f, "unhealthy: {reason}"),
        }
    }
}

/// Aggregated health report for the entire daemon.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    /// Overall daemon health (worst of all components).
    pub status: ComponentHealth,
    /// Daemon uptime in seconds since start.
    pub uptime_secs: u64,
    /// Listener state snapshot.
    pub listener: ListenerStatus,
    /// Per-queue counters.
    pub queues: HashMap<String, QueueCounts>,
}

/// Aggregate listener and queue state into a single status.
pub fn aggregate_status(
    listener: &ListenerStatus,
    queues: &HashMap<String, QueueCounts>,
) -> ComponentHealth {
    match listener.state {
        ListenerState::ShutDown => {
            return ComponentHealth::Unhealthy("listener shut down".to_owned());
        }
        ListenerState::Disconnected | ListenerState::Connecting => {
            return ComponentHealth::Degraded(format!(
                "listener reconnecting (attempt {})",
                listener.reconnect_attempts
            ));
        }
        ListenerState::Listening => {}
    }

    let failed: u64 = queues.values().map(|c| c.failed).sum();
    if failed > 0 {
        return ComponentHealth::Degraded(format!("{failed} permanently failed jobs"));
    }

    ComponentHealth::Healthy
}
