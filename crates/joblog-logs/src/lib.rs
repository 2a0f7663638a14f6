//! Job log resolution and streaming for joblog
//!
//! Given a pipeline task, workflow job or test job, this crate finds the pod
//! running it (possibly on an attached cluster), waits for the pod to run and
//! forwards its container log, line by line, to a caller-owned sink.

mod context;
mod engine;
mod interrupt;
mod locator;
mod selector;
mod service_name;
mod settings;
mod stream;

#[cfg(test)]
mod fakes;

pub use context::JobContextResolver;
pub use engine::LogEngine;
pub use interrupt::{Interrupt, until_cancelled};
pub use locator::{LocatedPod, PodLocator};
pub use selector::{
    LABEL_JOB_NAME, LABEL_PIPELINE_TYPE, LABEL_SERVICE, LABEL_SUB_TASK_TYPE, LABEL_TASK,
    task_selector, valid_label_value, workflow_selector,
};
pub use service_name::ServiceName;
pub use settings::{EngineSettings, POD_WAIT_TIMEOUT};
pub use stream::{
    LogSessions, LogTarget, SessionHandle, SessionRequest, stream_container_log, stream_lines,
};

// Re-export types used in our public API
pub use joblog_types::{ContainerLogRequest, JobLabelSelector, LogRequest, StreamStatus};
