use async_trait::async_trait;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use joblog_types::{
    BuildConfig, EnvironmentRecord, JobLogError, JobRecord, Result, TestConfig,
    WorkflowTaskRecord,
};

use crate::MetadataStore;

/// Metadata records as stored in a catalog file
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Catalog {
    pub jobs: Vec<JobRecord>,
    pub builds: Vec<BuildConfig>,
    pub workflow_tasks: Vec<WorkflowTaskRecord>,
    pub tests: Vec<TestConfig>,
    pub environments: Vec<EnvironmentRecord>,
}

impl Catalog {
    /// Parse a catalog, as JSON when `is_json` is set and TOML otherwise
    pub fn parse(content: &str, is_json: bool) -> Result<Self> {
        if is_json {
            serde_json::from_str(content).map_err(|e| JobLogError::Store(e.to_string()))
        } else {
            toml::from_str(content).map_err(|e| JobLogError::Store(e.to_string()))
        }
    }
}

/// In-memory metadata store, loaded from a catalog file
pub struct CatalogStore {
    catalog: Catalog,
}

impl CatalogStore {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }

    /// Load a catalog file (`.json` files as JSON, anything else as TOML)
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let catalog = read_catalog(path)?;
        tracing::debug!(
            path = %path.display(),
            jobs = catalog.jobs.len(),
            builds = catalog.builds.len(),
            workflow_tasks = catalog.workflow_tasks.len(),
            tests = catalog.tests.len(),
            environments = catalog.environments.len(),
            "Loaded metadata catalog"
        );
        Ok(Self::new(catalog))
    }
}

impl Default for CatalogStore {
    fn default() -> Self {
        Self::new(Catalog::default())
    }
}

fn read_catalog(path: &Path) -> Result<Catalog> {
    let content = fs::read_to_string(path).map_err(|e| {
        JobLogError::Store(format!("failed to read catalog {}: {}", path.display(), e))
    })?;
    let is_json = path.extension().is_some_and(|ext| ext == "json");
    Catalog::parse(&content, is_json)
        .map_err(|e| JobLogError::Store(format!("invalid catalog {}: {}", path.display(), e)))
}

#[async_trait]
impl MetadataStore for CatalogStore {
    async fn find_job_record(
        &self,
        pipeline_name: &str,
        task_type: &str,
    ) -> Result<Option<JobRecord>> {
        Ok(self
            .catalog
            .jobs
            .iter()
            .filter(|j| j.pipeline_name == pipeline_name && j.task_type == task_type)
            .max_by_key(|j| j.task_id)
            .cloned())
    }

    async fn find_build_config(
        &self,
        product_name: Option<&str>,
        targets: &[String],
        service_name: Option<&str>,
    ) -> Result<Option<BuildConfig>> {
        Ok(self
            .catalog
            .builds
            .iter()
            .filter(|b| product_name.is_none_or(|p| b.product_name == p))
            .find(|b| {
                b.targets.iter().any(|t| {
                    targets.contains(&t.service_module)
                        && service_name.is_none_or(|s| t.service_name == s)
                })
            })
            .cloned())
    }

    async fn find_workflow_task(
        &self,
        workflow_name: &str,
        task_id: i64,
    ) -> Result<Option<WorkflowTaskRecord>> {
        Ok(self
            .catalog
            .workflow_tasks
            .iter()
            .find(|t| t.workflow_name == workflow_name && t.task_id == task_id)
            .cloned())
    }

    async fn find_test_config(&self, test_name: &str) -> Result<Option<TestConfig>> {
        Ok(self
            .catalog
            .tests
            .iter()
            .find(|t| t.name == test_name)
            .cloned())
    }

    async fn find_environment(
        &self,
        product_name: &str,
        env_name: &str,
    ) -> Result<Option<EnvironmentRecord>> {
        Ok(self
            .catalog
            .environments
            .iter()
            .find(|e| e.product_name == product_name && e.env_name == env_name)
            .cloned())
    }
}
