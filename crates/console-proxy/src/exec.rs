//! Exec lifecycle: create, start and resize exec instances against the engine.

use std::fmt;
use std::sync::Arc;

use log::{debug, info};
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::engine::{
    CreateExecOptions, EngineError, ExecDescriptor, ExecEngine, ExecStreams, StartExecOptions,
    validate_container_id, validate_exec_id,
};

/// Errors from exec lifecycle operations.
///
/// Engine failures display the engine's message verbatim.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Create(#[source] EngineError),

    #[error("{0}")]
    Stream(#[source] EngineError),

    #[error("{0}")]
    Resize(#[source] EngineError),
}

/// Lifecycle of one interactive exec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    /// The engine returned a descriptor; no I/O is bound yet.
    Created,
    /// A transport is bound and the container is claimed.
    Attached,
    /// The engine is streaming.
    Running,
    /// Terminal.
    Closed,
}

impl ExecState {
    /// Whether `next` may follow this state.
    pub fn can_transition_to(self, next: ExecState) -> bool {
        use ExecState::*;
        matches!(
            (self, next),
            (Created, Attached)
                | (Created, Closed)
                | (Attached, Running)
                | (Attached, Closed)
                | (Running, Closed)
        )
    }

    /// Move to `next`, or stay put when the transition is not allowed.
    pub fn advance(&mut self, next: ExecState) -> bool {
        if self.can_transition_to(next) {
            *self = next;
            true
        } else {
            false
        }
    }
}

impl fmt::Display for ExecState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecState::Created => "created",
            ExecState::Attached => "attached",
            ExecState::Running => "running",
            ExecState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Body of a create request.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateExecRequest {
    #[serde(alias = "containerID")]
    pub container_id: String,
    pub cmd: Vec<String>,
    #[serde(default)]
    pub user: Option<String>,
    /// Falls back to the gateway's configured default.
    #[serde(default)]
    pub tty: Option<bool>,
}

/// Query string of a start request.
#[derive(Debug, Clone, Deserialize)]
pub struct StartExecQuery {
    #[serde(alias = "containerID")]
    pub container_id: String,
    #[serde(default)]
    pub tty: Option<bool>,
}

/// Body of a resize request.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ResizeExecRequest {
    pub height: u16,
    pub width: u16,
}

/// Drives exec instances through the engine.
#[derive(Clone)]
pub struct ExecManager {
    engine: Arc<dyn ExecEngine>,
    tty: bool,
    privileged: bool,
}

impl ExecManager {
    pub fn new(engine: Arc<dyn ExecEngine>, tty: bool, privileged: bool) -> Self {
        Self {
            engine,
            tty,
            privileged,
        }
    }

    /// TTY mode used when a request does not choose one.
    pub fn default_tty(&self) -> bool {
        self.tty
    }

    /// Create an exec instance with stdin, stdout and stderr attached.
    pub async fn create(&self, request: &CreateExecRequest) -> Result<ExecDescriptor, ExecError> {
        validate_container_id(&request.container_id)
            .map_err(|e| ExecError::InvalidInput(e.to_string()))?;
        if request.cmd.first().is_none_or(|program| program.is_empty()) {
            return Err(ExecError::InvalidInput("cmd cannot be empty".to_string()));
        }

        let options = CreateExecOptions {
            container_id: request.container_id.clone(),
            cmd: request.cmd.clone(),
            user: request.user.clone().filter(|user| !user.is_empty()),
            tty: request.tty.unwrap_or(self.tty),
            privileged: self.privileged,
            attach_stdin: true,
            attach_stdout: true,
            attach_stderr: true,
        };

        debug!("start create exec for container {}", options.container_id);
        let id = self
            .engine
            .create_exec(&options)
            .await
            .map_err(ExecError::Create)?;
        info!(
            "created exec {} in container {} ({:?})",
            id, options.container_id, options.cmd
        );

        Ok(ExecDescriptor::new(id, options))
    }

    /// Bind `reader` as the exec's input and `writer` as both output and
    /// error, then wait for the session to end.
    ///
    /// The client closing the transport is a normal end of session.
    pub async fn start<R, W>(
        &self,
        exec_id: &str,
        tty: bool,
        reader: R,
        writer: W,
    ) -> Result<(), ExecError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Clone + Send + Unpin + 'static,
    {
        validate_exec_id(exec_id).map_err(|e| ExecError::InvalidInput(e.to_string()))?;

        let streams = ExecStreams::new(reader, writer.clone(), writer);
        let options = StartExecOptions {
            detach: false,
            tty,
            raw_terminal: true,
        };

        match self.engine.start_exec(exec_id, streams, &options).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_transport_closed() => {
                debug!("client closed exec {}", exec_id);
                Ok(())
            }
            Err(err) => Err(ExecError::Stream(err)),
        }
    }

    /// Resize the pseudo-terminal of a running exec.
    pub async fn resize(&self, exec_id: &str, height: u16, width: u16) -> Result<(), ExecError> {
        if height == 0 || width == 0 {
            return Err(ExecError::InvalidInput(format!(
                "invalid terminal size {}x{}",
                width, height
            )));
        }
        validate_exec_id(exec_id).map_err(|e| ExecError::InvalidInput(e.to_string()))?;

        self.engine
            .resize_exec_tty(exec_id, height, width)
            .await
            .map_err(ExecError::Resize)?;
        debug!("resized exec {} to {}x{}", exec_id, width, height);
        Ok(())
    }
}
