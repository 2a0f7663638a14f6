//! Configuration for the joblog binary.
//!
//! Loaded from `joblog.toml` in the working directory unless `--config`
//! names another file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use joblog_k8s::ClusterEndpoint;
use joblog_logs::EngineSettings;

pub const DEFAULT_CONFIG_FILE: &str = "joblog.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    /// Namespace of job pods on the local cluster
    #[serde(default = "default_namespace")]
    pub default_namespace: String,

    /// Shared namespace of job pods on attached clusters
    #[serde(default = "default_attached_namespace")]
    pub attached_namespace: String,

    /// How long to wait for a job pod to run
    #[serde(default = "default_pod_wait_timeout")]
    pub pod_wait_timeout_secs: u64,

    /// Metadata catalog file (TOML, or JSON with a `.json` extension)
    #[serde(default)]
    pub catalog: Option<PathBuf>,

    /// Attached clusters by id
    #[serde(default)]
    pub clusters: HashMap<String, ClusterConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ClusterConfig {
    /// Kubeconfig context of the cluster
    pub context: Option<String>,
    /// Kubeconfig file holding the context
    pub kubeconfig: Option<PathBuf>,
}

fn default_namespace() -> String {
    "zadig".to_string()
}

fn default_attached_namespace() -> String {
    "koderover-agent".to_string()
}

fn default_pod_wait_timeout() -> u64 {
    300
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_namespace: default_namespace(),
            attached_namespace: default_attached_namespace(),
            pod_wait_timeout_secs: default_pod_wait_timeout(),
            catalog: None,
            clusters: HashMap::new(),
        }
    }
}

impl Config {
    /// Load the configuration.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if !path.exists() {
                    tracing::debug!("No config file at {}, using defaults", path.display());
                    return Ok(Self::default());
                }
                Self::load_from(path)
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            default_namespace: self.default_namespace.clone(),
            attached_namespace: self.attached_namespace.clone(),
            pod_wait_timeout: Duration::from_secs(self.pod_wait_timeout_secs),
        }
    }

    pub fn cluster_endpoints(&self) -> HashMap<String, ClusterEndpoint> {
        self.clusters
            .iter()
            .map(|(id, cluster)| {
                let endpoint = ClusterEndpoint {
                    context: cluster.context.clone(),
                    kubeconfig: cluster.kubeconfig.clone(),
                };
                (id.clone(), endpoint)
            })
            .collect()
    }
}
