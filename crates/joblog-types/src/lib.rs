//! Shared types for joblog
//!
//! This crate contains the data model used across the joblog crates: log
//! requests, label selectors, pod references, job metadata records and the
//! error taxonomy of a streaming session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Cluster id of the cluster running the control plane
pub const LOCAL_CLUSTER_ID: &str = "local";

/// Sub-task (and container) name of build jobs
pub const TASK_BUILD: &str = "buildv2";

/// Sub-task (and container) name of standalone test jobs
pub const TASK_TESTING: &str = "testingv2";

/// Task type of jobs started from an environment rather than a workflow
pub const SERVICE_TASK_TYPE: &str = "service";

// ============================================================================
// Request Types
// ============================================================================

/// A request for the live logs of one job.
///
/// Callers fill in what they know; the job-context resolver fills in the
/// derived fields (`namespace`, `cluster_id`, `task_id`, `job_name`, ...)
/// before the pod search.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRequest {
    pub namespace: String,
    pub pipeline_name: String,
    pub sub_task: String,
    pub job_name: String,
    pub job_type: String,
    /// Number of trailing lines to start from; `<= 0` streams the full log
    pub tail_lines: i64,
    pub follow: bool,
    pub task_id: i64,
    pub pipeline_type: String,
    pub service_name: String,
    pub service_module: String,
    pub test_name: String,
    pub env_name: String,
    pub product_name: String,
    pub cluster_id: String,
}

impl Default for LogRequest {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            pipeline_name: String::new(),
            sub_task: String::new(),
            job_name: String::new(),
            job_type: String::new(),
            tail_lines: 0,
            follow: true,
            task_id: 0,
            pipeline_type: String::new(),
            service_name: String::new(),
            service_module: String::new(),
            test_name: String::new(),
            env_name: String::new(),
            product_name: String::new(),
            cluster_id: String::new(),
        }
    }
}

impl LogRequest {
    /// Tail-line count as the Kubernetes API expects it
    pub fn tail(&self) -> Option<i64> {
        (self.tail_lines > 0).then_some(self.tail_lines)
    }
}

/// A request for the logs of a named container in an environment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerLogRequest {
    pub product_name: String,
    pub env_name: String,
    pub pod_name: String,
    pub container_name: String,
    /// Number of trailing lines to start from; `<= 0` streams the full log
    pub tail_lines: i64,
    pub follow: bool,
}

// ============================================================================
// Kubernetes Types
// ============================================================================

/// Equality-based label selector used to find job pods.
///
/// Labels with empty values are never part of the selector: an absent label
/// is not the same constraint as an empty one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JobLabelSelector {
    labels: BTreeMap<String, String>,
}

impl JobLabelSelector {
    /// Build a selector, keeping only entries with a non-empty value
    pub fn from_labels<I, K, V>(labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let labels = labels
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(_, v)| !v.is_empty())
            .collect();
        Self { labels }
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Render as a Kubernetes label selector string (`k1=v1,k2=v2`)
    pub fn to_selector_string(&self) -> String {
        self.labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for JobLabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_selector_string())
    }
}

/// Identity of a pod found by the pod locator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodReference {
    pub name: String,
    pub namespace: String,
    pub phase: PodPhase,
    pub created_at: Option<DateTime<Utc>>,
}

impl PodReference {
    pub fn new(name: String, namespace: String) -> Self {
        Self {
            name,
            namespace,
            phase: PodPhase::Unknown,
            created_at: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    #[default]
    Unknown,
}

impl From<&str> for PodPhase {
    fn from(s: &str) -> Self {
        match s {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

// ============================================================================
// Metadata Records
// ============================================================================

/// Most recent run of a pipeline task
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct JobRecord {
    pub pipeline_name: String,
    pub task_id: i64,
    pub task_type: String,
    #[serde(default)]
    pub status: String,
}

/// Build configuration of one or more service modules
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct BuildConfig {
    pub name: String,
    /// Empty for builds shared across products
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub targets: Vec<ServiceModuleTarget>,
    #[serde(default)]
    pub pre_build: Option<PreBuild>,
}

impl BuildConfig {
    /// Cluster the build runs on, if the record declares one
    pub fn cluster_id(&self) -> Option<&str> {
        self.pre_build
            .as_ref()
            .map(|p| p.cluster_id.as_str())
            .filter(|id| !id.is_empty())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ServiceModuleTarget {
    #[serde(default)]
    pub service_name: String,
    pub service_module: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct PreBuild {
    #[serde(default)]
    pub cluster_id: String,
}

/// Test definition
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct TestConfig {
    pub name: String,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub pre_test: Option<PreTest>,
}

impl TestConfig {
    /// Cluster the test runs on, if the record declares one
    pub fn cluster_id(&self) -> Option<&str> {
        self.pre_test
            .as_ref()
            .map(|p| p.cluster_id.as_str())
            .filter(|id| !id.is_empty())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct PreTest {
    #[serde(default)]
    pub cluster_id: String,
}

/// One run of a v4 workflow
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct WorkflowTaskRecord {
    pub workflow_name: String,
    pub task_id: i64,
    #[serde(default)]
    pub stages: Vec<StageTask>,
}

impl WorkflowTaskRecord {
    /// First job, in stage order, with the given name
    pub fn find_job(&self, name: &str) -> Option<&JobTask> {
        self.stages
            .iter()
            .flat_map(|stage| stage.jobs.iter())
            .find(|job| job.name == name)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct StageTask {
    pub name: String,
    #[serde(default)]
    pub jobs: Vec<JobTask>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct JobTask {
    pub name: String,
    #[serde(default)]
    pub k8s_job_name: String,
    pub job_type: String,
    /// Job-type specific payload, decoded through [`JobSpec::decode`]
    #[serde(default)]
    pub spec: serde_json::Value,
}

/// Deployed environment of a product
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct EnvironmentRecord {
    pub product_name: String,
    pub env_name: String,
    pub namespace: String,
    #[serde(default)]
    pub cluster_id: String,
}

// ============================================================================
// Job Specs
// ============================================================================

/// Workflow job types whose pods can be streamed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobKind {
    ZadigBuild,
    Freestyle,
    ZadigTesting,
    ZadigScanning,
    ZadigDistributeImage,
    /// Pre-v4 build job
    Build,
    Plugin,
}

impl JobKind {
    /// Parse a job type string; `None` for types without a streamable pod
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "zadig-build" => Some(Self::ZadigBuild),
            "freestyle" => Some(Self::Freestyle),
            "zadig-test" => Some(Self::ZadigTesting),
            "zadig-scanning" => Some(Self::ZadigScanning),
            "zadig-distribute-image" => Some(Self::ZadigDistributeImage),
            "build" => Some(Self::Build),
            "plugin" => Some(Self::Plugin),
            _ => None,
        }
    }
}

/// Properties shared by every job spec shape.
///
/// Only the fields the engine reads are decoded; explicit nulls count as
/// absent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct JobProperties {
    #[serde(deserialize_with = "null_as_default")]
    pub cluster_id: String,
}

/// Spec of build, freestyle, testing, scanning and image distribution jobs
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FreestyleJobSpec {
    #[serde(deserialize_with = "null_as_default")]
    pub properties: JobProperties,
}

/// Spec of plugin jobs
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PluginJobSpec {
    #[serde(deserialize_with = "null_as_default")]
    pub properties: JobProperties,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A decoded job spec
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobSpec {
    Freestyle(FreestyleJobSpec),
    Plugin(PluginJobSpec),
}

impl JobSpec {
    /// Decode the spec payload with the parser of the job's kind.
    ///
    /// A missing (null) payload decodes to the default spec.
    pub fn decode(kind: JobKind, spec: &serde_json::Value) -> Result<Self, serde_json::Error> {
        match kind {
            JobKind::Plugin => decode_or_default(spec).map(Self::Plugin),
            _ => decode_or_default(spec).map(Self::Freestyle),
        }
    }

    pub fn properties(&self) -> &JobProperties {
        match self {
            Self::Freestyle(spec) => &spec.properties,
            Self::Plugin(spec) => &spec.properties,
        }
    }

    /// Cluster id declared by the job, empty when unset
    pub fn cluster_id(&self) -> &str {
        &self.properties().cluster_id
    }
}

fn decode_or_default<T>(value: &serde_json::Value) -> Result<T, serde_json::Error>
where
    T: serde::de::DeserializeOwned + Default,
{
    if value.is_null() {
        Ok(T::default())
    } else {
        T::deserialize(value)
    }
}

// ============================================================================
// Errors & Session Status
// ============================================================================

/// Why a log streaming session failed
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum JobLogError {
    #[error("{what} not found")]
    NotFound { what: String },

    #[error("unsupported job type {0}")]
    UnsupportedJobType(String),

    #[error("failed to parse spec of job {job}: {reason}")]
    InvalidJobSpec { job: String, reason: String },

    #[error(
        "no pod matching '{selector}' in namespace '{namespace}' was running after {}s",
        .timeout.as_secs()
    )]
    Timeout {
        selector: String,
        namespace: String,
        timeout: Duration,
    },

    #[error("no pod matching '{selector}' in namespace '{namespace}'")]
    NoPodFound { selector: String, namespace: String },

    #[error("unknown cluster {0}")]
    UnknownCluster(String),

    #[error("metadata store error: {0}")]
    Store(String),

    #[error("kubernetes api error: {0}")]
    Transport(String),
}

impl JobLogError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn transport(err: impl fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}

pub type Result<T, E = JobLogError> = std::result::Result<T, E>;

/// How a streaming session ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamStatus {
    /// The log stream reached its end
    Completed,
    /// The caller cancelled, or the consumer went away
    Cancelled,
    Failed(JobLogError),
}

impl StreamStatus {
    /// Short name of the outcome, for logs
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed(_) => "failed",
        }
    }
}

impl From<JobLogError> for StreamStatus {
    fn from(err: JobLogError) -> Self {
        Self::Failed(err)
    }
}
