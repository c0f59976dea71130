//! Exec engine boundary.
//!
//! The engine creates exec instances inside running containers, streams a
//! running exec's stdio, and resizes its pseudo-terminal. [`ExecEngine`] is
//! the seam the gateway talks to; [`DockerEngine`] implements it against the
//! Docker Engine API.

mod docker;
mod error;

pub use docker::{DEFAULT_DOCKER_SOCKET, DockerEngine, StreamKind};
pub use error::{EngineError, EngineResult};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

/// Parameters for creating an exec instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateExecOptions {
    pub container_id: String,
    pub cmd: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub tty: bool,
    pub privileged: bool,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
}

/// An exec instance created by the engine, with the options that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecDescriptor {
    pub id: String,
    #[serde(flatten)]
    pub options: CreateExecOptions,
}

impl ExecDescriptor {
    pub fn new(id: impl Into<String>, options: CreateExecOptions) -> Self {
        Self {
            id: id.into(),
            options,
        }
    }
}

/// Parameters for starting an exec instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartExecOptions {
    pub detach: bool,
    pub tty: bool,
    /// Pass engine output through untouched instead of splitting stdout and
    /// stderr.
    pub raw_terminal: bool,
}

/// The byte streams bound to a running exec.
pub struct ExecStreams {
    pub input: Box<dyn AsyncRead + Send + Unpin>,
    pub output: Box<dyn AsyncWrite + Send + Unpin>,
    pub error: Box<dyn AsyncWrite + Send + Unpin>,
}

impl ExecStreams {
    pub fn new<R, W, E>(input: R, output: W, error: E) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
        E: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            input: Box::new(input),
            output: Box::new(output),
            error: Box::new(error),
        }
    }
}

/// Exec engine abstraction for testability.
#[async_trait]
pub trait ExecEngine: Send + Sync {
    /// Create an exec instance and return its ID.
    async fn create_exec(&self, options: &CreateExecOptions) -> EngineResult<String>;

    /// Start an exec instance bound to `streams`.
    ///
    /// Resolves only when the session ends: the process exits, either stream
    /// fails, or the client goes away.
    async fn start_exec(
        &self,
        exec_id: &str,
        streams: ExecStreams,
        options: &StartExecOptions,
    ) -> EngineResult<()>;

    /// Resize the pseudo-terminal of a running exec instance.
    async fn resize_exec_tty(&self, exec_id: &str, height: u16, width: u16) -> EngineResult<()>;
}

/// Validate a container ID or name.
///
/// Container IDs are hex strings (12 or 64 chars for docker/podman).
/// Container names are alphanumeric with '-', '_' and '.'.
pub fn validate_container_id(id: &str) -> EngineResult<()> {
    if id.is_empty() {
        return Err(EngineError::InvalidInput(
            "container ID or name cannot be empty".to_string(),
        ));
    }

    if id.len() > 128 {
        return Err(EngineError::InvalidInput(
            "container ID or name exceeds maximum length".to_string(),
        ));
    }

    let valid_chars = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.';
    if !id.chars().all(valid_chars) {
        return Err(EngineError::InvalidInput(format!(
            "container ID or name '{}' contains invalid characters",
            id
        )));
    }

    Ok(())
}

/// Validate an exec ID before it is placed in an engine URL.
pub fn validate_exec_id(id: &str) -> EngineResult<()> {
    if id.is_empty() || id.len() > 128 || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err(EngineError::InvalidInput(format!("invalid exec ID '{}'", id)));
    }
    Ok(())
}
