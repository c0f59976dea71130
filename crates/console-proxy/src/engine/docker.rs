//! Docker Engine API client for exec instances.
//!
//! Talks HTTP over the daemon's Unix socket. Starting an exec hijacks the
//! HTTP connection (`Upgrade: tcp`) and the upgraded stream carries the
//! process's stdio until it exits.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use axum::http::request::Builder;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, StatusCode, header};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyperlocal::{UnixConnector, Uri as UnixUri};
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{
    CreateExecOptions, EngineError, EngineResult, ExecEngine, ExecStreams, StartExecOptions,
    validate_container_id, validate_exec_id,
};

/// Default Docker daemon socket.
pub const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Length of the stdout/stderr multiplexing header.
const FRAME_HEADER_LEN: usize = 8;

/// Docker exec engine over a Unix socket.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    client: Client<UnixConnector, Full<Bytes>>,
    socket: PathBuf,
    /// API version prefix, e.g. "1.43". Unversioned paths when unset.
    api_version: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ExecConfigBody<'a> {
    attach_stdin: bool,
    attach_stdout: bool,
    attach_stderr: bool,
    tty: bool,
    cmd: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
    privileged: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ExecStartBody {
    detach: bool,
    tty: bool,
}

#[derive(Deserialize)]
struct IdResponse {
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Deserialize)]
struct MessageResponse {
    message: String,
}

impl DockerEngine {
    pub fn new(socket: impl Into<PathBuf>, api_version: Option<String>) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build(UnixConnector),
            socket: socket.into(),
            api_version,
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Check that the daemon answers on its socket.
    pub async fn ping(&self) -> EngineResult<()> {
        let (status, body) = self.request(Method::GET, "/_ping", None).await?;
        if !status.is_success() {
            return Err(error_from_response(status, &body));
        }
        Ok(())
    }

    fn uri(&self, path: &str) -> hyper::Uri {
        let path = match &self.api_version {
            Some(version) => format!("/v{}{}", version, path),
            None => path.to_string(),
        };
        UnixUri::new(&self.socket, &path).into()
    }

    fn build_request(&self, method: Method, path: &str, json: bool) -> Builder {
        let builder = Request::builder().method(method).uri(self.uri(path));
        if json {
            builder.header(header::CONTENT_TYPE, "application/json")
        } else {
            builder
        }
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> EngineResult<(StatusCode, Bytes)> {
        let request = self
            .build_request(method, path, body.is_some())
            .body(Full::new(body.map(Bytes::from).unwrap_or_default()))
            .map_err(|e| EngineError::InvalidInput(e.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?
            .to_bytes();
        Ok((status, body))
    }
}

#[async_trait]
impl ExecEngine for DockerEngine {
    async fn create_exec(&self, options: &CreateExecOptions) -> EngineResult<String> {
        validate_container_id(&options.container_id)?;

        let body = serde_json::to_vec(&ExecConfigBody {
            attach_stdin: options.attach_stdin,
            attach_stdout: options.attach_stdout,
            attach_stderr: options.attach_stderr,
            tty: options.tty,
            cmd: &options.cmd,
            user: options.user.as_deref(),
            privileged: options.privileged,
        })
        .map_err(|e| EngineError::InvalidInput(e.to_string()))?;

        let path = format!("/containers/{}/exec", options.container_id);
        let (status, body) = self.request(Method::POST, &path, Some(body)).await?;
        if !status.is_success() {
            return Err(error_from_response(status, &body));
        }

        let created: IdResponse =
            serde_json::from_slice(&body).map_err(|e| EngineError::Decode(e.to_string()))?;
        debug!(
            "created exec {} in container {}",
            created.id, options.container_id
        );
        Ok(created.id)
    }

    async fn start_exec(
        &self,
        exec_id: &str,
        streams: ExecStreams,
        options: &StartExecOptions,
    ) -> EngineResult<()> {
        validate_exec_id(exec_id)?;

        let path = format!("/exec/{}/start", exec_id);
        let body = serde_json::to_vec(&ExecStartBody {
            detach: options.detach,
            tty: options.tty,
        })
        .map_err(|e| EngineError::InvalidInput(e.to_string()))?;

        if options.detach {
            let (status, body) = self.request(Method::POST, &path, Some(body)).await?;
            if !status.is_success() {
                return Err(error_from_response(status, &body));
            }
            return Ok(());
        }

        let request = self
            .build_request(Method::POST, &path, true)
            .header(header::CONNECTION, "Upgrade")
            .header(header::UPGRADE, "tcp")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| EngineError::InvalidInput(e.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::SWITCHING_PROTOCOLS {
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|e| EngineError::Transport(e.to_string()))?
                .to_bytes();
            return Err(error_from_response(status, &body));
        }

        let upgraded = hyper::upgrade::on(response)
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        debug!("exec {} attached", exec_id);

        let (engine_read, engine_write) = tokio::io::split(TokioIo::new(upgraded));
        pump(streams, engine_read, engine_write, options.raw_terminal).await
    }

    async fn resize_exec_tty(&self, exec_id: &str, height: u16, width: u16) -> EngineResult<()> {
        validate_exec_id(exec_id)?;

        let path = format!("/exec/{}/resize?h={}&w={}", exec_id, height, width);
        let (status, body) = self.request(Method::POST, &path, None).await?;
        if !status.is_success() {
            return Err(error_from_response(status, &body));
        }
        Ok(())
    }
}

/// Map a failed engine response to an error carrying the daemon's message.
fn error_from_response(status: StatusCode, body: &[u8]) -> EngineError {
    let message = serde_json::from_slice::<MessageResponse>(body)
        .map(|parsed| parsed.message)
        .unwrap_or_else(|_| {
            let text = String::from_utf8_lossy(body).trim().to_string();
            if text.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("engine request failed")
                    .to_string()
            } else {
                text
            }
        });

    if status == StatusCode::NOT_FOUND {
        EngineError::NotFound(message)
    } else {
        EngineError::Api {
            status: status.as_u16(),
            message,
        }
    }
}

/// Shuttle bytes between the client streams and the hijacked engine stream.
///
/// Output drives the session: it ends when the engine closes its side. When
/// client input ends the engine's stdin is half-closed and remaining output
/// is still drained; when input fails the session ends with that error.
async fn pump<R, W>(
    streams: ExecStreams,
    mut engine_read: R,
    mut engine_write: W,
    raw_terminal: bool,
) -> EngineResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let ExecStreams {
        mut input,
        mut output,
        mut error,
    } = streams;

    let stdin = async {
        let copied = tokio::io::copy(&mut input, &mut engine_write).await;
        let _ = engine_write.shutdown().await;
        copied
    };

    let stdout = async {
        if raw_terminal {
            tokio::io::copy(&mut engine_read, &mut output).await?;
        } else {
            demux(&mut engine_read, &mut output, &mut error).await?;
        }
        output.flush().await?;
        error.flush().await
    };

    tokio::pin!(stdin, stdout);

    let stdin_result = tokio::select! {
        result = &mut stdout => return result.map_err(EngineError::from),
        result = &mut stdin => result,
    };
    stdin_result?;
    stdout.await.map_err(EngineError::from)
}

/// Stream selector in the engine's multiplexed output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

/// Parse a multiplexing header: stream type, three zero bytes, big-endian
/// payload length.
fn parse_frame_header(header: &[u8; FRAME_HEADER_LEN]) -> io::Result<(StreamKind, u64)> {
    let kind = match header[0] {
        0 => StreamKind::Stdin,
        1 => StreamKind::Stdout,
        2 => StreamKind::Stderr,
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown stream type {} in engine output", other),
            ));
        }
    };
    let len = u64::from(u32::from_be_bytes([header[4], header[5], header[6], header[7]]));
    Ok((kind, len))
}

/// Split multiplexed engine output onto `output` and `error`.
async fn demux<R, O, E>(reader: &mut R, output: &mut O, error: &mut E) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];

    loop {
        match reader.read_exact(&mut header).await {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(err),
        }

        let (kind, len) = parse_frame_header(&header)?;
        // Stream the payload through; the header length is never trusted for
        // an allocation.
        let mut payload = (&mut *reader).take(len);
        let copied = match kind {
            StreamKind::Stderr => tokio::io::copy(&mut payload, error).await?,
            StreamKind::Stdin | StreamKind::Stdout => {
                tokio::io::copy(&mut payload, output).await?
            }
        };
        if copied < len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("engine output frame truncated after {} of {} bytes", copied, len),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn frame(kind: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![kind, 0, 0, 0];
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_uri_includes_api_version() {
        let engine = DockerEngine::new("/tmp/docker.sock", Some("1.43".to_string()));
        let uri = engine.uri("/exec/abc/resize?h=24&w=80");
        assert_eq!(uri.path(), "/v1.43/exec/abc/resize");
        assert_eq!(uri.query(), Some("h=24&w=80"));

        let engine = DockerEngine::new("/tmp/docker.sock", None);
        assert_eq!(engine.uri("/_ping").path(), "/_ping");
    }

    #[test]
    fn test_error_from_response_uses_daemon_message() {
        let err = error_from_response(
            StatusCode::NOT_FOUND,
            br#"{"message":"No such exec instance: abc"}"#,
        );
        assert!(
            matches!(err, EngineError::NotFound(ref msg) if msg == "No such exec instance: abc")
        );

        let err = error_from_response(
            StatusCode::CONFLICT,
            br#"{"message":"container c1 is not running"}"#,
        );
        match err {
            EngineError::Api { status, message } => {
                assert_eq!(status, 409);
                assert_eq!(message, "container c1 is not running");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = error_from_response(StatusCode::INTERNAL_SERVER_ERROR, b"");
        assert_eq!(err.to_string(), "Internal Server Error");
    }

    #[test]
    fn test_exec_config_body_uses_engine_field_names() {
        let cmd = vec!["/bin/sh".to_string()];
        let body = serde_json::to_value(ExecConfigBody {
            attach_stdin: true,
            attach_stdout: true,
            attach_stderr: true,
            tty: true,
            cmd: &cmd,
            user: Some("root"),
            privileged: false,
        })
        .unwrap();

        assert_eq!(body["AttachStdin"], true);
        assert_eq!(body["Tty"], true);
        assert_eq!(body["Cmd"][0], "/bin/sh");
        assert_eq!(body["User"], "root");
        assert_eq!(body["Privileged"], false);
    }

    #[test]
    fn test_parse_frame_header() {
        let (kind, len) = parse_frame_header(&[2, 0, 0, 0, 0, 0, 1, 0]).unwrap();
        assert_eq!(kind, StreamKind::Stderr);
        assert_eq!(len, 256);

        assert!(parse_frame_header(&[7, 0, 0, 0, 0, 0, 0, 1]).is_err());
    }

    #[tokio::test]
    async fn test_demux_splits_stdout_and_stderr() {
        let mut raw = frame(1, b"hello ");
        raw.extend(frame(2, b"oops"));
        raw.extend(frame(1, b"world"));

        let mut reader = raw.as_slice();
        let mut output = Vec::new();
        let mut error = Vec::new();
        demux(&mut reader, &mut output, &mut error).await.unwrap();

        assert_eq!(output, b"hello world");
        assert_eq!(error, b"oops");
    }

    #[tokio::test]
    async fn test_demux_truncated_payload_fails() {
        let mut raw = frame(1, b"hello");
        raw.truncate(raw.len() - 2);

        let mut reader = raw.as_slice();
        let err = demux(&mut reader, &mut Vec::new(), &mut Vec::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_demux_oversized_length_is_not_preallocated() {
        // Header claims ~4 GiB but only a few bytes follow.
        let mut raw = vec![1, 0, 0, 0, 0xff, 0xff, 0xff, 0xff];
        raw.extend_from_slice(b"hello");

        let mut reader = raw.as_slice();
        let mut output = Vec::new();
        let err = demux(&mut reader, &mut output, &mut Vec::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(output, b"hello");
        assert!(output.capacity() < 1024 * 1024);
    }

    #[tokio::test]
    async fn test_pump_relays_both_directions() {
        let (client_in, mut client_in_writer) = duplex(1024);
        let (client_out_reader, client_out) = duplex(1024);
        let (engine_side, mut daemon) = duplex(1024);
        let (engine_read, engine_write) = tokio::io::split(engine_side);

        let streams = ExecStreams::new(client_in, client_out, tokio::io::sink());
        let session = tokio::spawn(pump(streams, engine_read, engine_write, true));

        client_in_writer.write_all(b"echo hi\n").await.unwrap();
        let mut received = [0u8; 8];
        daemon.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"echo hi\n");

        daemon.write_all(b"hi\r\n").await.unwrap();
        drop(daemon);

        let mut client_out_reader = client_out_reader;
        let mut echoed = Vec::new();
        client_out_reader.read_to_end(&mut echoed).await.unwrap();
        assert_eq!(echoed, b"hi\r\n");

        session.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_pump_input_failure_ends_session() {
        struct FailingReader;

        impl AsyncRead for FailingReader {
            fn poll_read(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                _buf: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<io::Result<()>> {
                std::task::Poll::Ready(Err(crate::transport::TransportError::Closed.into()))
            }
        }

        let (engine_side, _daemon) = duplex(1024);
        let (engine_read, engine_write) = tokio::io::split(engine_side);
        let streams = ExecStreams::new(FailingReader, tokio::io::sink(), tokio::io::sink());

        let err = pump(streams, engine_read, engine_write, true)
            .await
            .unwrap_err();
        assert!(err.is_transport_closed());
    }
}
