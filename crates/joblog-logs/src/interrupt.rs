use std::future::Future;
use tokio_util::sync::CancellationToken;

use joblog_types::{JobLogError, StreamStatus};

/// Why a session stopped before reaching its log stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Interrupt {
    Cancelled,
    Failed(JobLogError),
}

impl From<JobLogError> for Interrupt {
    fn from(err: JobLogError) -> Self {
        Self::Failed(err)
    }
}

impl From<Interrupt> for StreamStatus {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Cancelled => StreamStatus::Cancelled,
            Interrupt::Failed(err) => StreamStatus::Failed(err),
        }
    }
}

/// Drive `fut` to completion unless `cancel` fires first.
///
/// Cancellation wins when both are ready.
pub async fn until_cancelled<F>(cancel: &CancellationToken, fut: F) -> Result<F::Output, Interrupt>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupt::Cancelled),
        out = fut => Ok(out),
    }
}

/// [`until_cancelled`] for fallible futures, folding their error in
pub(crate) async fn guarded<F, T>(cancel: &CancellationToken, fut: F) -> Result<T, Interrupt>
where
    F: Future<Output = joblog_types::Result<T>>,
{
    Ok(until_cancelled(cancel, fut).await??)
}
