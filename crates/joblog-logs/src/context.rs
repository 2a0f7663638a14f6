use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use joblog_store::MetadataStore;
use joblog_types::{
    ContainerLogRequest, EnvironmentRecord, JobKind, JobLabelSelector, JobLogError, JobSpec,
    LOCAL_CLUSTER_ID, LogRequest, Result, SERVICE_TASK_TYPE, TASK_BUILD, TASK_TESTING,
};

use crate::interrupt::{Interrupt, until_cancelled};
use crate::selector::{task_selector, workflow_selector};
use crate::service_name::ServiceName;
use crate::settings::EngineSettings;

/// Works out which cluster and namespace a job's pod runs in.
///
/// Each resolver fills the derived fields of the request in place and
/// returns the selector of the job's pods.
pub struct JobContextResolver {
    store: Arc<dyn MetadataStore>,
    settings: EngineSettings,
}

impl JobContextResolver {
    pub fn new(store: Arc<dyn MetadataStore>, settings: EngineSettings) -> Self {
        Self { store, settings }
    }

    /// Resolve a pipeline task, started either from an environment or from
    /// a product's build
    pub async fn resolve_task(
        &self,
        cancel: &CancellationToken,
        request: &mut LogRequest,
    ) -> Result<JobLabelSelector, Interrupt> {
        let (service_name, service_module) =
            ServiceName::parse(&request.service_name, &request.service_module).into_parts();

        // Environment requests carry no pipeline name
        if !request.env_name.is_empty()
            && !request.product_name.is_empty()
            && request.pipeline_name.is_empty()
        {
            self.resolve_environment_task(cancel, request, &service_name)
                .await?;
        } else if !request.product_name.is_empty() {
            self.resolve_build_cluster(cancel, request, &service_name, &service_module)
                .await?;
        }

        if request.sub_task.is_empty() {
            request.sub_task = TASK_BUILD.to_string();
        }
        Ok(task_selector(request))
    }

    async fn resolve_environment_task(
        &self,
        cancel: &CancellationToken,
        request: &mut LogRequest,
        service_name: &str,
    ) -> Result<(), Interrupt> {
        request.pipeline_name = format!("{}-{}-job", service_name, request.env_name);

        let what = format!("task of pipeline {}", request.pipeline_name);
        let found = until_cancelled(
            cancel,
            self.store
                .find_job_record(&request.pipeline_name, SERVICE_TASK_TYPE),
        )
        .await?;
        if let Some(record) = optional(&what, found) {
            request.task_id = record.task_id;
        }
        Ok(())
    }

    async fn resolve_build_cluster(
        &self,
        cancel: &CancellationToken,
        request: &mut LogRequest,
        service_name: &str,
        service_module: &str,
    ) -> Result<(), Interrupt> {
        let targets = vec![service_module.to_string()];
        let service = (!service_name.is_empty()).then_some(service_name);
        let what = format!("build of service module {}", service_module);

        let found = until_cancelled(
            cancel,
            self.store
                .find_build_config(Some(request.product_name.as_str()), &targets, service),
        )
        .await?;
        let build = match optional(&what, found) {
            Some(build) => build,
            None => {
                // Maybe this service is shared across products
                debug!(
                    product = %request.product_name,
                    service_module,
                    "Looking for a shared build"
                );
                let found = until_cancelled(
                    cancel,
                    self.store.find_build_config(None, &targets, service),
                )
                .await?;
                required(&what, found)?
            }
        };

        if let Some(cluster_id) = build.cluster_id() {
            self.assign_cluster(request, cluster_id);
        }
        Ok(())
    }

    /// Resolve a v4 workflow job.
    ///
    /// A task without a job named after the sub-task fails with `NotFound`
    /// rather than searching with a selector that has no job labels.
    pub async fn resolve_workflow_job(
        &self,
        cancel: &CancellationToken,
        request: &mut LogRequest,
    ) -> Result<JobLabelSelector, Interrupt> {
        let what = format!(
            "workflow {} task {}",
            request.pipeline_name, request.task_id
        );
        let found = until_cancelled(
            cancel,
            self.store
                .find_workflow_task(&request.pipeline_name, request.task_id),
        )
        .await?;
        let task = required(&what, found)?;

        let job = task.find_job(&request.sub_task).ok_or_else(|| {
            warn!(
                workflow = %request.pipeline_name,
                task_id = request.task_id,
                job = %request.sub_task,
                "No such job in workflow task"
            );
            JobLogError::not_found(format!("job {} in {}", request.sub_task, what))
        })?;
        request.job_name = job.k8s_job_name.clone();
        request.job_type = job.job_type.clone();

        let kind = JobKind::parse(&job.job_type)
            .ok_or_else(|| JobLogError::UnsupportedJobType(job.job_type.clone()))?;
        let spec = JobSpec::decode(kind, &job.spec).map_err(|e| JobLogError::InvalidJobSpec {
            job: job.name.clone(),
            reason: e.to_string(),
        })?;

        let cluster_id = match spec.cluster_id() {
            "" => LOCAL_CLUSTER_ID,
            id => id,
        };
        self.assign_cluster(request, cluster_id);

        Ok(workflow_selector(request))
    }

    /// Resolve a standalone test job
    pub async fn resolve_test_job(
        &self,
        cancel: &CancellationToken,
        request: &mut LogRequest,
    ) -> Result<JobLabelSelector, Interrupt> {
        request.sub_task = TASK_TESTING.to_string();
        let selector = task_selector(request);

        if request.test_name.is_empty() {
            request.test_name = test_name_of(&request.service_name).to_string();
        }
        let what = format!("test {}", request.test_name);
        let found =
            until_cancelled(cancel, self.store.find_test_config(&request.test_name)).await?;
        if let Some(test) = optional(&what, found)
            && let Some(cluster_id) = test.cluster_id()
        {
            self.assign_cluster(request, cluster_id);
        }

        Ok(selector)
    }

    /// Find the environment a container log request points at
    pub async fn resolve_environment(
        &self,
        cancel: &CancellationToken,
        request: &ContainerLogRequest,
    ) -> Result<EnvironmentRecord, Interrupt> {
        let what = format!(
            "environment {} of product {}",
            request.env_name, request.product_name
        );
        let found = until_cancelled(
            cancel,
            self.store
                .find_environment(&request.product_name, &request.env_name),
        )
        .await?;
        required(&what, found)
    }

    fn assign_cluster(&self, request: &mut LogRequest, cluster_id: &str) {
        request.cluster_id = cluster_id.to_string();
        request.namespace = self.settings.namespace_for(cluster_id).to_string();
    }
}

/// Test jobs are named after their test plus a `-job` suffix
fn test_name_of(service_name: &str) -> &str {
    service_name.strip_suffix("-job").unwrap_or(service_name)
}

/// Lookup policy for records the session cannot do without: a miss or a
/// store error ends the session
fn required<T>(what: &str, found: Result<Option<T>>) -> Result<T, Interrupt> {
    match found {
        Ok(Some(record)) => Ok(record),
        Ok(None) => Err(JobLogError::not_found(what).into()),
        Err(err) => Err(err.into()),
    }
}

/// Lookup policy for records that only refine defaults: a miss or a store
/// error keeps the defaults
fn optional<T>(what: &str, found: Result<Option<T>>) -> Option<T> {
    match found {
        Ok(Some(record)) => Some(record),
        Ok(None) => {
            debug!("{} not found, keeping defaults", what);
            None
        }
        Err(err) => {
            warn!("Failed to look up {}, keeping defaults: {}", what, err);
            None
        }
    }
}
