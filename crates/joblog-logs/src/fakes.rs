//! In-memory collaborators for the engine tests

use async_trait::async_trait;
use futures::io::{AsyncBufRead, AsyncRead};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll, ready};
use tokio::sync::mpsc;

use joblog_k8s::{ClusterApi, ClusterResolver, LogReader};
use joblog_store::{Catalog, CatalogStore, MetadataStore};
use joblog_types::{
    BuildConfig, EnvironmentRecord, JobLabelSelector, JobLogError, JobRecord, LOCAL_CLUSTER_ID,
    PodPhase, PodReference, Result, TestConfig, WorkflowTaskRecord,
};

const CATALOG: &str = r#"
[[jobs]]
pipeline_name = "api-dev-job"
task_id = 3
task_type = "service"

[[jobs]]
pipeline_name = "api-dev-job"
task_id = 9
task_type = "service"

[[builds]]
name = "api-build"
product_name = "shop"
targets = [{ service_name = "api", service_module = "api-server" }]
pre_build = { cluster_id = "c-remote" }

[[builds]]
name = "web-build"
product_name = "shop"
targets = [{ service_name = "web", service_module = "web-server" }]
pre_build = { cluster_id = "local" }

[[builds]]
name = "shared-build"
targets = [{ service_name = "auth", service_module = "auth" }]

[[workflow_tasks]]
workflow_name = "wf1"
task_id = 7

[[workflow_tasks.stages]]
name = "build"

[[workflow_tasks.stages.jobs]]
name = "build-job"
k8s_job_name = "wf1-7-build-job"
job_type = "zadig-build"
spec = { properties = { cluster_id = "" } }

[[workflow_tasks.stages]]
name = "release"

[[workflow_tasks.stages.jobs]]
name = "notify"
k8s_job_name = "wf1-7-notify"
job_type = "plugin"
spec = { properties = { cluster_id = "c-remote" } }

[[workflow_tasks.stages.jobs]]
name = "deploy"
k8s_job_name = "wf1-7-deploy"
job_type = "zadig-deploy"

[[tests]]
name = "smoke"
pre_test = { cluster_id = "c-remote" }

[[tests]]
name = "lint"
pre_test = { cluster_id = "local" }

[[environments]]
product_name = "shop"
env_name = "dev"
namespace = "shop-dev"
cluster_id = "local"
"#;

pub(crate) fn catalog_store() -> CatalogStore {
    CatalogStore::new(Catalog::parse(CATALOG, false).expect("test catalog"))
}

/// Store whose every lookup fails
pub(crate) struct FailingStore;

fn unavailable<T>() -> Result<T> {
    Err(JobLogError::Store("store unavailable".to_string()))
}

#[async_trait]
impl MetadataStore for FailingStore {
    async fn find_job_record(&self, _: &str, _: &str) -> Result<Option<JobRecord>> {
        unavailable()
    }

    async fn find_build_config(
        &self,
        _: Option<&str>,
        _: &[String],
        _: Option<&str>,
    ) -> Result<Option<BuildConfig>> {
        unavailable()
    }

    async fn find_workflow_task(&self, _: &str, _: i64) -> Result<Option<WorkflowTaskRecord>> {
        unavailable()
    }

    async fn find_test_config(&self, _: &str) -> Result<Option<TestConfig>> {
        unavailable()
    }

    async fn find_environment(&self, _: &str, _: &str) -> Result<Option<EnvironmentRecord>> {
        unavailable()
    }
}

/// Counts how many scripted readers have been dropped
#[derive(Clone, Default)]
pub(crate) struct Releases(Arc<AtomicUsize>);

impl Releases {
    pub(crate) fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

struct ReleaseGuard(Releases);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        (self.0).0.fetch_add(1, Ordering::SeqCst);
    }
}

/// What a scripted reader does once its data is consumed
#[derive(Clone, Copy, Debug)]
enum After {
    End,
    Pending,
    Error,
}

/// Log reader replaying fixed bytes
pub(crate) struct ScriptedReader {
    data: Vec<u8>,
    pos: usize,
    after: After,
    _release: ReleaseGuard,
}

impl ScriptedReader {
    fn new(data: &[u8], after: After, releases: Releases) -> Self {
        Self {
            data: data.to_vec(),
            pos: 0,
            after,
            _release: ReleaseGuard(releases),
        }
    }

    fn scripted(data: &[u8], after: After) -> (Self, Releases) {
        let releases = Releases::default();
        (Self::new(data, after, releases.clone()), releases)
    }

    /// Ends after `data`
    pub(crate) fn ending(data: &[u8]) -> (Self, Releases) {
        Self::scripted(data, After::End)
    }

    /// Fails after `data`
    pub(crate) fn failing(data: &[u8]) -> (Self, Releases) {
        Self::scripted(data, After::Error)
    }

    /// Waits forever after `data`, like a followed log
    pub(crate) fn following(data: &[u8]) -> (Self, Releases) {
        Self::scripted(data, After::Pending)
    }
}

impl AsyncRead for ScriptedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        let available = ready!(self.as_mut().poll_fill_buf(cx))?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Poll::Ready(Ok(n))
    }
}

impl AsyncBufRead for ScriptedReader {
    fn poll_fill_buf(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        let this = self.get_mut();
        if this.pos < this.data.len() {
            return Poll::Ready(Ok(&this.data[this.pos..]));
        }
        match this.after {
            After::End => Poll::Ready(Ok(&[])),
            After::Pending => Poll::Pending,
            After::Error => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "log stream reset",
            ))),
        }
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        let this = self.get_mut();
        this.pos = (this.pos + amt).min(this.data.len());
    }
}

/// Take everything already pushed to a sink
pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(line) = rx.try_recv() {
        lines.push(line);
    }
    lines
}

/// Parameters of one opened log stream
#[derive(Clone, Debug)]
pub(crate) struct OpenedLog {
    pub namespace: String,
    pub pod_name: String,
    pub container_name: String,
    pub follow: bool,
    pub tail_lines: Option<i64>,
}

#[derive(Default)]
struct Recorded {
    waited: Vec<String>,
    opened: Vec<OpenedLog>,
}

/// Scripted cluster; clones share what they record
#[derive(Clone)]
pub(crate) struct FakeCluster {
    pods: Vec<String>,
    running: bool,
    log: Vec<u8>,
    after: After,
    recorded: Arc<Mutex<Recorded>>,
    releases: Releases,
}

impl FakeCluster {
    fn new(pods: &[&str], running: bool) -> Self {
        Self {
            pods: pods.iter().map(|p| p.to_string()).collect(),
            running,
            log: Vec::new(),
            after: After::End,
            recorded: Arc::default(),
            releases: Releases::default(),
        }
    }

    /// Cluster where `pods` already run
    pub(crate) fn running(pods: &[&str]) -> Self {
        Self::new(pods, true)
    }

    /// Cluster where no pod ever starts
    pub(crate) fn never_running() -> Self {
        Self::new(&[], false)
    }

    /// Every container log holds `log`, then ends
    pub(crate) fn with_log(mut self, log: &[u8]) -> Self {
        self.log = log.to_vec();
        self.after = After::End;
        self
    }

    /// Every container log holds `log`, then stays open
    pub(crate) fn with_following_log(mut self, log: &[u8]) -> Self {
        self.log = log.to_vec();
        self.after = After::Pending;
        self
    }

    pub(crate) fn waited_selectors(&self) -> Vec<String> {
        self.recorded.lock().waited.clone()
    }

    pub(crate) fn opened(&self) -> Vec<OpenedLog> {
        self.recorded.lock().opened.clone()
    }

    pub(crate) fn releases(&self) -> Releases {
        self.releases.clone()
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn wait_pod_running(&self, _namespace: &str, selector: &JobLabelSelector) -> Result<()> {
        self.recorded.lock().waited.push(selector.to_string());
        if !self.running {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        _selector: &JobLabelSelector,
    ) -> Result<Vec<PodReference>> {
        Ok(self
            .pods
            .iter()
            .map(|name| {
                let mut pod = PodReference::new(name.clone(), namespace.to_string());
                pod.phase = PodPhase::Running;
                pod
            })
            .collect())
    }

    async fn open_log_stream(
        &self,
        namespace: &str,
        pod_name: &str,
        container_name: &str,
        follow: bool,
        tail_lines: Option<i64>,
    ) -> Result<LogReader> {
        self.recorded.lock().opened.push(OpenedLog {
            namespace: namespace.to_string(),
            pod_name: pod_name.to_string(),
            container_name: container_name.to_string(),
            follow,
            tail_lines,
        });
        let reader = ScriptedReader::new(&self.log, self.after, self.releases.clone());
        Ok(Box::pin(reader))
    }
}

/// Cluster resolver over fixed fake clusters; records every requested id
#[derive(Clone, Default)]
pub(crate) struct FakeClusters {
    clusters: HashMap<String, Arc<dyn ClusterApi>>,
    resolved: Arc<Mutex<Vec<String>>>,
}

impl FakeClusters {
    pub(crate) fn with(cluster_id: &str, cluster: FakeCluster) -> Self {
        let mut clusters = Self::default();
        clusters
            .clusters
            .insert(cluster_id.to_string(), Arc::new(cluster));
        clusters
    }

    pub(crate) fn resolved(&self) -> Vec<String> {
        self.resolved.lock().clone()
    }
}

#[async_trait]
impl ClusterResolver for FakeClusters {
    async fn resolve(&self, cluster_id: &str) -> Result<Arc<dyn ClusterApi>> {
        self.resolved.lock().push(cluster_id.to_string());
        let id = if cluster_id.is_empty() {
            LOCAL_CLUSTER_ID
        } else {
            cluster_id
        };
        self.clusters
            .get(id)
            .cloned()
            .ok_or_else(|| JobLogError::UnknownCluster(cluster_id.to_string()))
    }
}
