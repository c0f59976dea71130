//! Test utilities and common setup.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use console_proxy::api::{self, AppState};
use console_proxy::engine::{
    CreateExecOptions, EngineError, EngineResult, ExecEngine, ExecStreams, StartExecOptions,
};
use console_proxy::exec::ExecManager;
use console_proxy::session::SessionRegistry;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Greeting written by every started exec.
pub const READY: &str = "ready\r\n";

/// In-memory exec engine.
///
/// Started execs greet with [`READY`], echo each input frame, end cleanly on
/// "exit" and fail like a dead backend process on "fail".
pub struct MockExecEngine {
    containers: HashSet<String>,
    execs: Mutex<HashMap<String, String>>,
    pub create_calls: AtomicUsize,
    pub start_calls: AtomicUsize,
}

impl MockExecEngine {
    pub fn new(containers: &[&str]) -> Self {
        Self {
            containers: containers.iter().map(|c| c.to_string()).collect(),
            execs: Mutex::new(HashMap::new()),
            create_calls: AtomicUsize::new(0),
            start_calls: AtomicUsize::new(0),
        }
    }

    pub fn starts(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecEngine for MockExecEngine {
    async fn create_exec(&self, options: &CreateExecOptions) -> EngineResult<String> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if !self.containers.contains(&options.container_id) {
            return Err(EngineError::NotFound(format!(
                "No such container: {}",
                options.container_id
            )));
        }

        let id = uuid::Uuid::new_v4().simple().to_string();
        self.execs
            .lock()
            .unwrap()
            .insert(id.clone(), options.container_id.clone());
        Ok(id)
    }

    async fn start_exec(
        &self,
        exec_id: &str,
        mut streams: ExecStreams,
        _options: &StartExecOptions,
    ) -> EngineResult<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if !self.execs.lock().unwrap().contains_key(exec_id) {
            return Err(EngineError::NotFound(format!(
                "No such exec instance: {}",
                exec_id
            )));
        }

        streams.output.write_all(READY.as_bytes()).await?;
        let mut buf = vec![0u8; 4096];
        loop {
            let n = streams.input.read(&mut buf).await?;
            match &buf[..n] {
                b"exit" => return Ok(()),
                b"fail" => {
                    return Err(EngineError::Api {
                        status: 500,
                        message: "backend process exited".to_string(),
                    });
                }
                line => streams.output.write_all(line).await?,
            }
        }
    }

    async fn resize_exec_tty(&self, exec_id: &str, _height: u16, _width: u16) -> EngineResult<()> {
        if self.execs.lock().unwrap().contains_key(exec_id) {
            Ok(())
        } else {
            Err(EngineError::NotFound(format!(
                "No such exec instance: {}",
                exec_id
            )))
        }
    }
}

/// Gateway state over a mock engine with containers "c1" and "c2".
pub fn test_state(single_session: bool, ping_period: Duration) -> (AppState, Arc<MockExecEngine>) {
    let engine = Arc::new(MockExecEngine::new(&["c1", "c2"]));
    let exec = ExecManager::new(engine.clone(), true, false);
    let state = AppState {
        exec: Arc::new(exec),
        sessions: SessionRegistry::new(single_session),
        ping_period,
        write_wait: Duration::from_secs(10),
    };
    (state, engine)
}

/// Create a test application router.
pub fn test_app(state: AppState) -> Router {
    api::create_router(state)
}

/// Serve the gateway on an ephemeral local port.
pub async fn spawn_server(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = api::create_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
