//! Interactive sessions: single-session policy, keepalive and the session
//! driver that ties a transport to a running exec.

pub mod keepalive;
pub mod registry;

pub use keepalive::{Keepalive, ping_period};
pub use registry::{SessionGuard, SessionRegistry};

use std::fmt::Display;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Sink, Stream};
use log::{debug, info, warn};
use thiserror::Error;

use crate::exec::{ExecError, ExecManager, ExecState};
use crate::transport::{TransportError, TransportReader, TransportWriter};

/// Notice written to a client that tries to attach to a busy container.
pub const BUSY_BANNER: [&str; 4] = [
    "#######################################################################\r\n",
    "#                    Welcome To BKDevOps Console                      #\r\n",
    "#                该环境已经处于调试状态,禁止同时连接多个会话          #\r\n",
    "#######################################################################\r\n",
];

/// Errors ending an interactive session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("container {0} has established connection")]
    AlreadyAttached(String),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// What a client asked to attach to.
#[derive(Debug, Clone)]
pub struct AttachRequest {
    pub exec_id: String,
    pub container_id: String,
    pub tty: bool,
}

/// Run one interactive session to completion.
///
/// Claims the container, keeps the transport alive and streams the exec
/// until either side ends it. On return the keepalive has stopped and the
/// claim is released; closing the transport is left to the caller.
pub async fn run_session<S, E, W>(
    registry: &SessionRegistry,
    exec: &ExecManager,
    ping_period: Duration,
    request: &AttachRequest,
    reader: TransportReader<S>,
    writer: TransportWriter<W>,
) -> Result<(), SessionError>
where
    S: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Display,
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Display,
{
    let mut state = ExecState::Created;

    let guard = match registry.try_acquire(&request.container_id) {
        Ok(guard) => guard,
        Err(err) => {
            for line in BUSY_BANNER {
                if let Err(write_err) = writer.write_frame(line.as_bytes()).await {
                    debug!("failed to write busy banner: {}", write_err);
                    break;
                }
            }
            return Err(err);
        }
    };
    state.advance(ExecState::Attached);

    let keepalive = Keepalive::spawn(writer.clone(), ping_period);
    state.advance(ExecState::Running);
    info!(
        "exec {} {} in container {}",
        request.exec_id, state, request.container_id
    );

    let result = exec
        .start(&request.exec_id, request.tty, reader, writer)
        .await;

    keepalive.stop().await;
    drop(guard);
    state.advance(ExecState::Closed);

    match &result {
        Ok(()) => info!("exec {} {}", request.exec_id, state),
        Err(err) => warn!(
            "start exec failed for container {}: {}",
            request.container_id, err
        ),
    }
    result.map_err(SessionError::from)
}
