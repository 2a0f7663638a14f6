use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use joblog_k8s::ClusterResolver;
use joblog_store::MetadataStore;
use joblog_types::{ContainerLogRequest, JobLabelSelector, LogRequest, StreamStatus};

use crate::context::JobContextResolver;
use crate::interrupt::{Interrupt, guarded};
use crate::locator::PodLocator;
use crate::settings::EngineSettings;
use crate::stream::{LogTarget, stream_container_log};

/// Streams the live logs of CI jobs.
///
/// Every entry point resolves where the job's pod runs, waits for it and
/// pushes its log lines into `sink` until the log ends, the caller cancels
/// or something fails. The returned status says which; the sink is never
/// read or closed by the engine.
pub struct LogEngine {
    resolver: JobContextResolver,
    locator: PodLocator,
    clusters: Arc<dyn ClusterResolver>,
}

impl LogEngine {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        clusters: Arc<dyn ClusterResolver>,
        settings: EngineSettings,
    ) -> Self {
        let locator = PodLocator::new(Arc::clone(&clusters), settings.pod_wait_timeout);
        Self {
            resolver: JobContextResolver::new(store, settings),
            locator,
            clusters,
        }
    }

    /// Logs of a pipeline task (build or environment-started job)
    pub async fn stream_task_logs(
        &self,
        cancel: &CancellationToken,
        mut request: LogRequest,
        sink: &mpsc::UnboundedSender<String>,
    ) -> StreamStatus {
        debug!("Start to get task container log");
        let status = match self.resolver.resolve_task(cancel, &mut request).await {
            Ok(selector) => self.wait_and_stream(cancel, &request, &selector, sink).await,
            Err(interrupt) => interrupt.into(),
        };
        report("task", status)
    }

    /// Logs of a v4 workflow job
    pub async fn stream_workflow_job_logs(
        &self,
        cancel: &CancellationToken,
        mut request: LogRequest,
        sink: &mpsc::UnboundedSender<String>,
    ) -> StreamStatus {
        debug!("Start to get workflow job container log");
        let status = match self.resolver.resolve_workflow_job(cancel, &mut request).await {
            Ok(selector) => self.wait_and_stream(cancel, &request, &selector, sink).await,
            Err(interrupt) => interrupt.into(),
        };
        report("workflow", status)
    }

    /// Logs of a standalone test job
    pub async fn stream_test_job_logs(
        &self,
        cancel: &CancellationToken,
        mut request: LogRequest,
        sink: &mpsc::UnboundedSender<String>,
    ) -> StreamStatus {
        debug!("Start to get test job container log");
        let status = match self.resolver.resolve_test_job(cancel, &mut request).await {
            Ok(selector) => self.wait_and_stream(cancel, &request, &selector, sink).await,
            Err(interrupt) => interrupt.into(),
        };
        report("test", status)
    }

    /// Logs of a named container in a product environment
    pub async fn stream_container_logs(
        &self,
        cancel: &CancellationToken,
        request: ContainerLogRequest,
        sink: &mpsc::UnboundedSender<String>,
    ) -> StreamStatus {
        let status = match self.open_environment(cancel, &request).await {
            Ok((api, namespace)) => {
                let target = LogTarget {
                    namespace: &namespace,
                    pod_name: &request.pod_name,
                    container_name: &request.container_name,
                    follow: request.follow,
                    tail_lines: (request.tail_lines > 0).then_some(request.tail_lines),
                };
                stream_container_log(cancel, api.as_ref(), target, sink).await
            }
            Err(interrupt) => interrupt.into(),
        };
        report("container", status)
    }

    async fn open_environment(
        &self,
        cancel: &CancellationToken,
        request: &ContainerLogRequest,
    ) -> Result<(Arc<dyn joblog_k8s::ClusterApi>, String), Interrupt> {
        let env = self.resolver.resolve_environment(cancel, request).await?;
        let api = guarded(cancel, self.clusters.resolve(&env.cluster_id)).await?;
        Ok((api, env.namespace))
    }

    /// Wait for the job's pod, then stream the sub-task's container
    async fn wait_and_stream(
        &self,
        cancel: &CancellationToken,
        request: &LogRequest,
        selector: &JobLabelSelector,
        sink: &mpsc::UnboundedSender<String>,
    ) -> StreamStatus {
        let located = match self
            .locator
            .locate(cancel, &request.cluster_id, &request.namespace, selector)
            .await
        {
            Ok(located) => located,
            Err(interrupt) => return interrupt.into(),
        };

        let target = LogTarget {
            namespace: &located.pod.namespace,
            pod_name: &located.pod.name,
            container_name: &request.sub_task,
            follow: request.follow,
            tail_lines: request.tail(),
        };
        stream_container_log(cancel, located.api.as_ref(), target, sink).await
    }
}

fn report(entry: &'static str, status: StreamStatus) -> StreamStatus {
    match &status {
        StreamStatus::Failed(err) => {
            error!(entry, status = status.label(), "Log session ended: {}", err)
        }
        _ => info!(entry, status = status.label(), "Log session ended"),
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeCluster, FakeClusters, catalog_store, drain};
    use crate::stream::{LogSessions, SessionRequest};
    use joblog_types::{JobLogError, LOCAL_CLUSTER_ID};
    use std::time::Duration;

    fn engine(clusters: FakeClusters, settings: EngineSettings) -> LogEngine {
        LogEngine::new(Arc::new(catalog_store()), Arc::new(clusters), settings)
    }

    fn workflow_request() -> LogRequest {
        LogRequest {
            pipeline_name: "wf1".to_string(),
            task_id: 7,
            sub_task: "build-job".to_string(),
            tail_lines: 100,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_workflow_job_streams_local_pod() {
        let local = FakeCluster::running(&["wf1-7-build-job-x"]).with_log(b"step 1\nstep 2\ndone");
        let clusters = FakeClusters::with(LOCAL_CLUSTER_ID, local.clone());
        let engine = engine(clusters.clone(), EngineSettings::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let status = engine
            .stream_workflow_job_logs(&CancellationToken::new(), workflow_request(), &tx)
            .await;

        assert_eq!(status, StreamStatus::Completed);
        assert_eq!(drain(&mut rx), vec!["step 1", "step 2", "done"]);
        assert_eq!(clusters.resolved(), vec![LOCAL_CLUSTER_ID.to_string()]);

        let opened = local.opened();
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].namespace, "zadig");
        assert_eq!(opened[0].pod_name, "wf1-7-build-job-x");
        assert_eq!(opened[0].container_name, "build-job");
        assert_eq!(opened[0].tail_lines, Some(100));
        assert_eq!(local.releases().count(), 1);
    }

    #[tokio::test]
    async fn test_task_logs_on_attached_cluster() {
        let remote = FakeCluster::running(&["build-pod"]).with_log(b"compiling\n");
        let clusters = FakeClusters::with("c-remote", remote.clone());
        let engine = engine(clusters, EngineSettings::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let request = LogRequest {
            pipeline_name: "shop-build".to_string(),
            task_id: 3,
            product_name: "shop".to_string(),
            service_name: "api-server_api".to_string(),
            ..Default::default()
        };
        let status = engine
            .stream_task_logs(&CancellationToken::new(), request, &tx)
            .await;

        assert_eq!(status, StreamStatus::Completed);
        assert_eq!(drain(&mut rx), vec!["compiling"]);
        assert_eq!(
            remote.waited_selectors(),
            vec!["s-service=api-server_api,s-task=shop-build-3,s-type=buildv2".to_string()]
        );
        assert_eq!(remote.opened()[0].namespace, "koderover-agent");
        assert_eq!(remote.opened()[0].container_name, "buildv2");
    }

    #[tokio::test]
    async fn test_unsupported_job_type_never_searches() {
        let clusters = FakeClusters::with(LOCAL_CLUSTER_ID, FakeCluster::running(&["p"]));
        let engine = engine(clusters.clone(), EngineSettings::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let request = LogRequest {
            sub_task: "deploy".to_string(),
            ..workflow_request()
        };
        let status = engine
            .stream_workflow_job_logs(&CancellationToken::new(), request, &tx)
            .await;

        assert_eq!(
            status,
            StreamStatus::Failed(JobLogError::UnsupportedJobType("zadig-deploy".to_string()))
        );
        assert!(clusters.resolved().is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_pod_wait_timeout_ends_session() {
        let clusters = FakeClusters::with(LOCAL_CLUSTER_ID, FakeCluster::never_running());
        let settings = EngineSettings {
            pod_wait_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let engine = engine(clusters, settings);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let status = tokio::time::timeout(
            Duration::from_secs(5),
            engine.stream_workflow_job_logs(&CancellationToken::new(), workflow_request(), &tx),
        )
        .await
        .expect("session must end after the pod wait deadline");

        assert!(matches!(status, StreamStatus::Failed(JobLogError::Timeout { .. })));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_test_job_without_definition_uses_local_cluster() {
        let local = FakeCluster::running(&["unit-pod"]).with_log(b"ok\n");
        let clusters = FakeClusters::with(LOCAL_CLUSTER_ID, local.clone());
        let engine = engine(clusters.clone(), EngineSettings::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let request = LogRequest {
            pipeline_name: "unit-job".to_string(),
            task_id: 4,
            service_name: "unit-job".to_string(),
            namespace: "zadig".to_string(),
            ..Default::default()
        };
        let status = engine
            .stream_test_job_logs(&CancellationToken::new(), request, &tx)
            .await;

        assert_eq!(status, StreamStatus::Completed);
        assert_eq!(drain(&mut rx), vec!["ok"]);
        assert_eq!(clusters.resolved(), vec![String::new()]);
        assert_eq!(local.opened()[0].container_name, "testingv2");
    }

    #[tokio::test]
    async fn test_container_logs_of_environment() {
        let local = FakeCluster::running(&[]).with_log(b"GET /health 200\n");
        let clusters = FakeClusters::with(LOCAL_CLUSTER_ID, local.clone());
        let engine = engine(clusters, EngineSettings::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let request = ContainerLogRequest {
            product_name: "shop".to_string(),
            env_name: "dev".to_string(),
            pod_name: "api-0".to_string(),
            container_name: "api".to_string(),
            tail_lines: 0,
            follow: false,
        };
        let status = engine
            .stream_container_logs(&CancellationToken::new(), request, &tx)
            .await;

        assert_eq!(status, StreamStatus::Completed);
        assert_eq!(drain(&mut rx), vec!["GET /health 200"]);
        let opened = local.opened();
        assert_eq!(opened[0].namespace, "shop-dev");
        assert_eq!(opened[0].tail_lines, None);
        assert!(!opened[0].follow);
        assert!(local.waited_selectors().is_empty());
    }

    #[tokio::test]
    async fn test_container_logs_unknown_environment() {
        let clusters = FakeClusters::with(LOCAL_CLUSTER_ID, FakeCluster::running(&[]));
        let engine = engine(clusters, EngineSettings::default());
        let (tx, _rx) = mpsc::unbounded_channel();

        let request = ContainerLogRequest {
            product_name: "shop".to_string(),
            env_name: "prod".to_string(),
            pod_name: "api-0".to_string(),
            container_name: "api".to_string(),
            tail_lines: 0,
            follow: true,
        };
        let status = engine
            .stream_container_logs(&CancellationToken::new(), request, &tx)
            .await;
        assert!(matches!(status, StreamStatus::Failed(JobLogError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_sessions_cancel_following_stream() {
        let local = FakeCluster::running(&["wf1-7-build-job-x"]).with_following_log(b"l1\n");
        let clusters = FakeClusters::with(LOCAL_CLUSTER_ID, local.clone());
        let engine = Arc::new(engine(clusters, EngineSettings::default()));
        let mut sessions = LogSessions::new(engine);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = sessions.start(SessionRequest::WorkflowJob(workflow_request()), tx);
        assert_eq!(rx.recv().await.as_deref(), Some("l1"));
        assert_eq!(sessions.active_count(), 1);

        handle.cancel();
        let status = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("cancelled session should end promptly");
        assert_eq!(status, StreamStatus::Cancelled);
        assert_eq!(local.releases().count(), 1);
    }

    #[tokio::test]
    async fn test_sessions_stop_all() {
        let clusters = FakeClusters::with(LOCAL_CLUSTER_ID, FakeCluster::never_running());
        let engine = Arc::new(engine(clusters, EngineSettings::default()));
        let mut sessions = LogSessions::new(engine);

        let (tx, _rx) = mpsc::unbounded_channel();
        let first = sessions.start(SessionRequest::WorkflowJob(workflow_request()), tx.clone());
        let second = sessions.start(SessionRequest::WorkflowJob(workflow_request()), tx);

        sessions.stop();
        assert_eq!(first.wait().await, StreamStatus::Cancelled);
        assert_eq!(second.wait().await, StreamStatus::Cancelled);
        assert_eq!(sessions.active_count(), 0);
    }
}
