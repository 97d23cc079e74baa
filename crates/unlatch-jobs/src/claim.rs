//! Work-Claim Protocol
//!
//! Claiming is "atomically mark as taken": the files handed out and their
//! `processing` entries are chosen and written inside one registry mutation,
//! so concurrent claimers always see each other's picks.

use std::time::Duration;

use tracing::debug;
use unlatch_core::types::SourceFile;
use unlatch_core::unix_millis;

use crate::error::JobResult;
use crate::job::{FileResult, FileStatus, Job, JobStatus};
use crate::registry::Registry;

/// What a claim attempt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Files now marked `processing` for this caller (possibly none)
    Claimed(Vec<SourceFile>),
    /// Job is paused; nothing was claimed
    Paused,
    /// File list or destination not set yet
    Uninitialized,
    /// Job already finished
    Finished(JobStatus),
}

/// Files with no `processing`, `success` or `failed` result.
///
/// A plain read: use it to ask "is anything left", never to pick work.
pub fn pending_files(job: &Job) -> Vec<SourceFile> {
    let Some(files) = &job.files else {
        return Vec::new();
    };
    files
        .iter()
        .filter(|f| {
            !job.result(&f.name).is_some_and(|r| {
                matches!(
                    r.status,
                    FileStatus::Processing | FileStatus::Success | FileStatus::Failed
                )
            })
        })
        .cloned()
        .collect()
}

/// Claim up to `count` files of job `id` in source-list order.
///
/// Picks files with no result at all. With `stale_after` set, a
/// `processing` entry claimed longer ago than that is handed out again.
pub fn claim(
    registry: &Registry,
    id: &str,
    count: usize,
    stale_after: Option<Duration>,
) -> JobResult<ClaimOutcome> {
    let now = unix_millis();
    let stale_before = stale_after.map(|d| now.saturating_sub(d.as_millis() as u64));
    let mut outcome = ClaimOutcome::Uninitialized;

    registry.mutate(id, |job| {
        outcome = claim_in(job, count, now, stale_before);
    })?;

    if let ClaimOutcome::Claimed(files) = &outcome {
        debug!(job_id = id, claimed = files.len(), "claimed batch");
    }
    Ok(outcome)
}

fn claim_in(job: &mut Job, count: usize, now: u64, stale_before: Option<u64>) -> ClaimOutcome {
    if job.status.is_terminal() {
        return ClaimOutcome::Finished(job.status);
    }
    if job.is_paused {
        return ClaimOutcome::Paused;
    }
    if !job.is_ready() {
        return ClaimOutcome::Uninitialized;
    }

    let picked: Vec<SourceFile> = job
        .files
        .iter()
        .flatten()
        .filter(|f| match job.result(&f.name) {
            None => true,
            Some(r) => r.status == FileStatus::Processing && is_stale(r, stale_before),
        })
        .take(count)
        .cloned()
        .collect();

    for file in &picked {
        job.upsert_result(FileResult::processing(&file.name, now));
    }
    if let Some(last) = picked.last() {
        job.current_file = Some(last.name.clone());
    }
    if job.status == JobStatus::Pending {
        job.status = JobStatus::Processing;
    }
    ClaimOutcome::Claimed(picked)
}

fn is_stale(result: &FileResult, stale_before: Option<u64>) -> bool {
    match (stale_before, result.claimed_at) {
        (Some(cutoff), Some(claimed_at)) => claimed_at <= cutoff,
        _ => false,
    }
}
