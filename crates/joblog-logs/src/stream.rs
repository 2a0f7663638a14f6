use futures::AsyncBufReadExt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use joblog_k8s::{ClusterApi, LogReader};
use joblog_types::{ContainerLogRequest, JobLogError, LogRequest, StreamStatus};

use crate::engine::LogEngine;
use crate::interrupt::{Interrupt, guarded};

/// Container whose log is streamed
#[derive(Clone, Copy, Debug)]
pub struct LogTarget<'a> {
    pub namespace: &'a str,
    pub pod_name: &'a str,
    pub container_name: &'a str,
    pub follow: bool,
    pub tail_lines: Option<i64>,
}

/// Open a container's log and forward it line by line to `sink`
pub async fn stream_container_log(
    cancel: &CancellationToken,
    api: &dyn ClusterApi,
    target: LogTarget<'_>,
    sink: &mpsc::UnboundedSender<String>,
) -> StreamStatus {
    info!(
        "Get container log of pod {}/{}",
        target.pod_name, target.container_name
    );

    let opened = guarded(
        cancel,
        api.open_log_stream(
            target.namespace,
            target.pod_name,
            target.container_name,
            target.follow,
            target.tail_lines,
        ),
    )
    .await;

    match opened {
        Ok(reader) => stream_lines(cancel, reader, sink).await,
        Err(Interrupt::Cancelled) => {
            debug!("Cancelled before the container log stream opened");
            StreamStatus::Cancelled
        }
        Err(Interrupt::Failed(err)) => {
            error!("Failed to open container log stream: {}", err);
            StreamStatus::Failed(err)
        }
    }
}

/// Forward every line of `reader` to `sink`, trimmed, in arrival order.
///
/// A trailing line without a newline is forwarded only when it is not blank.
/// The reader is dropped (and the stream released) on every return path.
pub async fn stream_lines(
    cancel: &CancellationToken,
    mut reader: LogReader,
    sink: &mpsc::UnboundedSender<String>,
) -> StreamStatus {
    let mut buf = Vec::new();
    let mut delivered: u64 = 0;

    loop {
        buf.clear();
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(lines = delivered, "Connection is closed, container log stream stopped");
                return StreamStatus::Cancelled;
            }
            read = reader.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(0) => {
                info!(
                    lines = delivered,
                    "No more input is available, container log stream stopped"
                );
                return StreamStatus::Completed;
            }
            Ok(_) => {
                let complete = buf.last() == Some(&b'\n');
                let line = String::from_utf8_lossy(&buf).trim().to_string();
                if !complete && line.is_empty() {
                    continue;
                }
                if cancel.is_cancelled() {
                    return StreamStatus::Cancelled;
                }
                if sink.send(line).is_err() {
                    debug!(lines = delivered, "Log consumer went away, stopping stream");
                    return StreamStatus::Cancelled;
                }
                delivered += 1;
            }
            Err(e) => {
                error!("Scan container log stream error: {}", e);
                return StreamStatus::Failed(JobLogError::Transport(format!(
                    "failed to read container log stream: {}",
                    e
                )));
            }
        }
    }
}

/// The entry point a session runs
#[derive(Clone, Debug)]
pub enum SessionRequest {
    Task(LogRequest),
    WorkflowJob(LogRequest),
    TestJob(LogRequest),
    Container(ContainerLogRequest),
}

/// Handle on one running session
pub struct SessionHandle {
    cancel: CancellationToken,
    status: oneshot::Receiver<StreamStatus>,
}

impl SessionHandle {
    /// Ask the session to stop
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token cancelling this session, for use after the handle is consumed
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the session to end
    pub async fn wait(self) -> StreamStatus {
        // A session aborted by LogSessions::stop never reports
        self.status.await.unwrap_or(StreamStatus::Cancelled)
    }
}

/// Runs log sessions, each on its own task
pub struct LogSessions {
    engine: Arc<LogEngine>,

    /// Parent of every session's cancellation token
    cancel: CancellationToken,

    /// Active session task handles
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl LogSessions {
    pub fn new(engine: Arc<LogEngine>) -> Self {
        Self {
            engine,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    /// Spawn a session pushing its lines into `sink`
    pub fn start(
        &mut self,
        request: SessionRequest,
        sink: mpsc::UnboundedSender<String>,
    ) -> SessionHandle {
        self.tasks.retain(|t| !t.is_finished());

        let cancel = self.cancel.child_token();
        let (status_tx, status_rx) = oneshot::channel();
        let engine = Arc::clone(&self.engine);
        let session_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            let status = match request {
                SessionRequest::Task(request) => {
                    engine.stream_task_logs(&session_cancel, request, &sink).await
                }
                SessionRequest::WorkflowJob(request) => {
                    engine
                        .stream_workflow_job_logs(&session_cancel, request, &sink)
                        .await
                }
                SessionRequest::TestJob(request) => {
                    engine.stream_test_job_logs(&session_cancel, request, &sink).await
                }
                SessionRequest::Container(request) => {
                    engine
                        .stream_container_logs(&session_cancel, request, &sink)
                        .await
                }
            };
            // The handle may have been dropped
            let _ = status_tx.send(status);
        });
        self.tasks.push(task);

        SessionHandle {
            cancel,
            status: status_rx,
        }
    }

    /// Cancel and abort every session
    pub fn stop(&mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        // Create a fresh cancellation token for future sessions
        self.cancel = CancellationToken::new();
    }

    /// Get the number of sessions still running
    pub fn active_count(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_finished()).count()
    }
}

impl Drop for LogSessions {
    fn drop(&mut self) {
        self.stop();
    }
}
