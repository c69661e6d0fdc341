//! Consumer side: applies queued jobs from the privileged process.
//!
//! The queue lock is only held for the synchronous claim and settle steps,
//! never across [`JobHandler::apply`]. Producers in the same process block on
//! the lock, so holding it over an `await` could starve the task that owns it.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use crate::error::VaultResult;

use super::crypto::JobKey;
use super::store::JobQueueStore;
use super::types::{now_millis, Job, JobStatus};

/// A claim older than this is treated as left behind by a consumer that
/// died mid-run, and the job is handed out again.
pub const STALE_CLAIM_AFTER: Duration = Duration::from_secs(10 * 60);

/// Applies one job to the vault.
///
/// Returns a human-readable reason on failure; the drain records it on the
/// job and schedules a retry.
pub trait JobHandler {
    /// Performs the write described by `job`.
    fn apply(&mut self, job: &Job) -> impl Future<Output = Result<(), String>> + Send;
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Jobs handed to the handler.
    pub processed: usize,
    /// Jobs the handler applied.
    pub succeeded: usize,
    /// Jobs the handler rejected.
    pub failed: usize,
    /// `(job id, reason)` for every rejection.
    pub errors: Vec<(String, String)>,
    /// Set when another holder had the queue lock and nothing was done.
    pub skipped: bool,
}

/// Applies every pending job for `active_vault_id`.
///
/// Runs in three steps:
///
/// 1. Under the queue lock (taken without blocking), the matching `Pending`
///    jobs are marked `InProgress` and written back. Claims older than
///    [`STALE_CLAIM_AFTER`] are taken over as well.
/// 2. With the lock released, each claimed job goes to `handler`.
/// 3. Under the lock again, the queue is re-read and the outcomes merged:
///    completed jobs are dropped, failures recorded. Jobs appended meanwhile
///    are kept. When nothing remains the job file and the attachments folder
///    are removed.
///
/// # Errors
///
/// Propagates read and write errors from the store. Handler failures are
/// recorded on the jobs, not returned.
pub async fn drain<H: JobHandler>(
    store: &JobQueueStore,
    key: &JobKey,
    active_vault_id: &str,
    handler: &mut H,
) -> VaultResult<DrainReport> {
    let Some(claimed) = claim(store, key, active_vault_id)? else {
        tracing::info!("job queue is locked elsewhere, skipping drain");
        return Ok(DrainReport {
            skipped: true,
            ..DrainReport::default()
        });
    };

    let mut report = DrainReport::default();
    let mut outcomes = HashMap::with_capacity(claimed.len());
    for job in &claimed {
        report.processed += 1;
        match handler.apply(job).await {
            Ok(()) => {
                report.succeeded += 1;
                outcomes.insert(job.id.clone(), Ok(()));
            }
            Err(reason) => {
                tracing::warn!(job_id = %job.id, "job failed: {reason}");
                report.failed += 1;
                report.errors.push((job.id.clone(), reason.clone()));
                outcomes.insert(job.id.clone(), Err(reason));
            }
        }
    }

    if !claimed.is_empty() {
        settle(store, key, outcomes)?;
    }

    tracing::info!(
        processed = report.processed,
        succeeded = report.succeeded,
        failed = report.failed,
        "drained job queue"
    );
    Ok(report)
}

/// Marks the jobs to run as `InProgress`; `None` if the lock is taken.
fn claim(
    store: &JobQueueStore,
    key: &JobKey,
    active_vault_id: &str,
) -> VaultResult<Option<Vec<Job>>> {
    let Some(_guard) = store.try_locked()? else {
        return Ok(None);
    };
    if !store.job_file_exists() {
        return Ok(Some(Vec::new()));
    }

    let mut jobs = store.read_jobs(key)?;
    if jobs.is_empty() {
        remove_queue(store)?;
        return Ok(Some(Vec::new()));
    }

    let stale_before = now_millis().saturating_sub(
        u64::try_from(STALE_CLAIM_AFTER.as_millis()).unwrap_or(u64::MAX),
    );
    let mut claimed = Vec::new();
    for job in jobs.iter_mut().filter(|job| job.vault_id == active_vault_id) {
        let runnable = match job.status {
            JobStatus::Pending => true,
            JobStatus::InProgress if job.updated_at < stale_before => {
                tracing::warn!(job_id = %job.id, "taking over stale claim");
                true
            }
            _ => false,
        };
        if runnable {
            job.set_status(JobStatus::InProgress);
            claimed.push(job.clone());
        }
    }

    if !claimed.is_empty() {
        store.write_jobs(&jobs, key)?;
    }
    Ok(Some(claimed))
}

/// Folds handler outcomes into the current queue.
fn settle(
    store: &JobQueueStore,
    key: &JobKey,
    mut outcomes: HashMap<String, Result<(), String>>,
) -> VaultResult<()> {
    let lock = store.lock()?;
    let _guard = lock.lock()?;

    let mut jobs = store.read_jobs(key)?;
    jobs.retain_mut(|job| match outcomes.remove(&job.id) {
        Some(Ok(())) => false,
        Some(Err(reason)) => {
            job.record_failure(reason);
            true
        }
        None => true,
    });
    if !outcomes.is_empty() {
        tracing::debug!(missing = outcomes.len(), "claimed jobs left the queue during the run");
    }

    if jobs.is_empty() {
        remove_queue(store)
    } else {
        store.write_jobs(&jobs, key)
    }
}

fn remove_queue(store: &JobQueueStore) -> VaultResult<()> {
    store.delete_job_file()?;
    store.delete_attachments_folder()
}
