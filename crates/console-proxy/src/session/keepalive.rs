//! Periodic ping frames for long-lived, mostly idle sessions.

use std::fmt::Display;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::Sink;
use log::debug;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::transport::TransportWriter;

/// Ping period for a peer that drops idle connections after `pong_wait`.
pub fn ping_period(pong_wait: Duration) -> Duration {
    pong_wait * 9 / 10
}

/// Handle to a running keepalive task.
///
/// The task stops when [`Keepalive::stop`] is called or the handle is dropped.
/// A failed ping also ends it: the transport is gone and the session's own
/// read/write loop will observe that independently.
pub struct Keepalive {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Keepalive {
    /// Start sending pings through `writer` every `period`.
    pub fn spawn<W>(writer: TransportWriter<W>, period: Duration) -> Self
    where
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: Display,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // A late tick is sent once, never as a burst of catch-up pings.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let ping = writer.ping();
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => break,
                            result = ping => {
                                if let Err(err) = result {
                                    debug!("keepalive ping failed, stopping: {}", err);
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        });

        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Stop the task and wait for it to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.task.as_ref().is_none_or(|task| task.is_finished())
    }
}

impl Drop for Keepalive {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
