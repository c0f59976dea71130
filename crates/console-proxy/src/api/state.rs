//! Application state.

use std::sync::Arc;
use std::time::Duration;

use crate::exec::ExecManager;
use crate::session::{SessionRegistry, ping_period};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Exec lifecycle against the engine
    pub exec: Arc<ExecManager>,
    /// Containers with an attached session
    pub sessions: SessionRegistry,
    /// Interval between keepalive pings
    pub ping_period: Duration,
    /// Bound on a single frame send
    pub write_wait: Duration,
}

impl AppState {
    /// Build state for peers that drop connections idle for `pong_wait`.
    pub fn new(
        exec: ExecManager,
        sessions: SessionRegistry,
        pong_wait: Duration,
        write_wait: Duration,
    ) -> Self {
        Self {
            exec: Arc::new(exec),
            sessions,
            ping_period: ping_period(pong_wait),
            write_wait,
        }
    }
}
