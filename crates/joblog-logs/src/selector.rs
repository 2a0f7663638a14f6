use regex::Regex;
use std::sync::LazyLock;

use joblog_types::{JobLabelSelector, LogRequest};

/// `<pipeline>-<task id>` of the task a job pod belongs to
pub const LABEL_TASK: &str = "s-task";
pub const LABEL_SERVICE: &str = "s-service";
/// Sub-task or workflow job type
pub const LABEL_SUB_TASK_TYPE: &str = "s-type";
pub const LABEL_PIPELINE_TYPE: &str = "p-type";
/// Kubernetes job name of a workflow job
pub const LABEL_JOB_NAME: &str = "s-name";

const MAX_LABEL_VALUE_LEN: usize = 63;

static LABEL_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$").expect("label value pattern")
});

static INVALID_LABEL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^-A-Za-z0-9_.]").expect("label char pattern"));

/// Coerce a string into a valid Kubernetes label value.
///
/// Invalid characters become `-`, the value is cut to 63 characters and
/// must begin and end with an alphanumeric character.
pub fn valid_label_value(value: &str) -> String {
    if value.is_empty() || (value.len() <= MAX_LABEL_VALUE_LEN && LABEL_VALUE.is_match(value)) {
        return value.to_string();
    }

    let replaced = INVALID_LABEL_CHARS.replace_all(value, "-");
    let truncated: String = replaced.chars().take(MAX_LABEL_VALUE_LEN).collect();
    truncated
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

/// Selector of the pods of a pipeline task
pub fn task_selector(request: &LogRequest) -> JobLabelSelector {
    JobLabelSelector::from_labels([
        (
            LABEL_TASK,
            format!("{}-{}", request.pipeline_name.to_lowercase(), request.task_id),
        ),
        (
            LABEL_SERVICE,
            valid_label_value(&request.service_name).to_lowercase(),
        ),
        (LABEL_SUB_TASK_TYPE, request.sub_task.replace('_', "-")),
        (LABEL_PIPELINE_TYPE, request.pipeline_type.clone()),
    ])
}

/// Selector of the pods of a v4 workflow job
pub fn workflow_selector(request: &LogRequest) -> JobLabelSelector {
    JobLabelSelector::from_labels([
        (LABEL_SUB_TASK_TYPE, request.job_type.replace('_', "-")),
        (LABEL_JOB_NAME, request.job_name.replace('_', "-")),
    ])
}
