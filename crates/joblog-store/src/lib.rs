//! Job metadata lookups for joblog
//!
//! This crate defines the lookups the log engine needs from the job metadata
//! store, plus a catalog-backed implementation of them.

mod catalog;

use async_trait::async_trait;

use joblog_types::{
    BuildConfig, EnvironmentRecord, JobRecord, Result, TestConfig, WorkflowTaskRecord,
};

pub use catalog::{Catalog, CatalogStore};

/// Read-only access to job, build, workflow, test and environment records.
///
/// Every lookup returns `Ok(None)` on a miss; `Err` is reserved for the
/// store itself failing.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Most recent run of `pipeline_name` with the given task type
    async fn find_job_record(&self, pipeline_name: &str, task_type: &str)
    -> Result<Option<JobRecord>>;

    /// Build configuration for any of the service modules in `targets`.
    ///
    /// `product_name: None` searches builds shared across products.
    async fn find_build_config(
        &self,
        product_name: Option<&str>,
        targets: &[String],
        service_name: Option<&str>,
    ) -> Result<Option<BuildConfig>>;

    async fn find_workflow_task(
        &self,
        workflow_name: &str,
        task_id: i64,
    ) -> Result<Option<WorkflowTaskRecord>>;

    async fn find_test_config(&self, test_name: &str) -> Result<Option<TestConfig>>;

    async fn find_environment(
        &self,
        product_name: &str,
        env_name: &str,
    ) -> Result<Option<EnvironmentRecord>>;
}
