//! Job Registry: the single choke-point for job mutation
//!
//! Every operation is one atomic read-modify-write through
//! [`JobStore::mutate`], so callers never hold a lock of their own and two
//! updates to the same job can never interleave.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info, warn};
use unlatch_core::types::SourceFile;
use unlatch_core::unix_millis;

use crate::error::{JobError, JobResult};
use crate::job::{FileResult, Job, JobConfig, JobStatus, ProgressUpdate, ResolvedDestination};

/// Storage backend for job records.
///
/// Expired records are invisible to every method except
/// [`JobStore::sweep_expired`], which removes them.
pub trait JobStore: Send + Sync {
    fn insert(&self, job: Job);
    /// Owned snapshot of a live job. An expired job is deleted and `None` returned.
    fn get(&self, id: &str) -> Option<Job>;
    /// Apply `f` to the live job under the store's exclusion boundary and
    /// return a snapshot of the result. `updated_at` is refreshed.
    fn mutate(&self, id: &str, f: &mut dyn FnMut(&mut Job)) -> Option<Job>;
    fn remove(&self, id: &str) -> Option<Job>;
    /// Snapshots of every live job.
    fn list(&self) -> Vec<Job>;
    /// Remove expired jobs; returns their ids.
    fn sweep_expired(&self) -> Vec<String>;
}

/// In-process store: one map behind one mutex.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Job>> {
        self.jobs.lock().unwrap_or_else(|poisoned| {
            warn!("job table mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

/// Look up `id`, evicting it first if it has expired.
fn live<'a>(jobs: &'a mut HashMap<String, Job>, id: &str, now: u64) -> Option<&'a mut Job> {
    if jobs.get(id).is_some_and(|job| job.is_expired(now)) {
        jobs.remove(id);
        debug!(job_id = id, "evicted expired job on access");
        return None;
    }
    jobs.get_mut(id)
}

impl JobStore for MemoryJobStore {
    fn insert(&self, job: Job) {
        self.lock().insert(job.id.clone(), job);
    }

    fn get(&self, id: &str) -> Option<Job> {
        let mut jobs = self.lock();
        live(&mut jobs, id, unix_millis()).map(|job| job.clone())
    }

    fn mutate(&self, id: &str, f: &mut dyn FnMut(&mut Job)) -> Option<Job> {
        let now = unix_millis();
        let mut jobs = self.lock();
        let job = live(&mut jobs, id, now)?;
        f(job);
        job.updated_at = now;
        Some(job.clone())
    }

    fn remove(&self, id: &str) -> Option<Job> {
        self.lock().remove(id)
    }

    fn list(&self) -> Vec<Job> {
        let now = unix_millis();
        let mut jobs: Vec<Job> = self
            .lock()
            .values()
            .filter(|job| !job.is_expired(now))
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    fn sweep_expired(&self) -> Vec<String> {
        let now = unix_millis();
        let mut jobs = self.lock();
        let expired: Vec<String> = jobs
            .values()
            .filter(|job| job.is_expired(now))
            .map(|job| job.id.clone())
            .collect();
        for id in &expired {
            jobs.remove(id);
        }
        expired
    }
}

/// Typed operations over a [`JobStore`].
#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn JobStore>,
    ttl: Duration,
}

impl Registry {
    pub fn new(store: Arc<dyn JobStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Registry over a fresh [`MemoryJobStore`].
    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryJobStore::new()), ttl)
    }

    pub fn create(&self, config: JobConfig) -> Job {
        self.insert_new(config, None)
    }

    /// New job that re-processes files of `original`.
    pub fn create_retry(&self, config: JobConfig, original: &str) -> Job {
        self.insert_new(config, Some(original.to_string()))
    }

    fn insert_new(&self, config: JobConfig, retry_of: Option<String>) -> Job {
        let id = uuid::Uuid::new_v4().to_string();
        let mut job = Job::new(id, config, unix_millis(), self.ttl.as_millis() as u64);
        job.retry_of = retry_of;
        self.store.insert(job.clone());
        info!(
            job_id = %job.id,
            source = job.config.source_locator.as_deref().unwrap_or("-"),
            destination = %job.config.destination_kind,
            retry_of = job.retry_of.as_deref().unwrap_or("-"),
            "job created"
        );
        job
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.store.get(id)
    }

    /// Like [`Registry::get`] but absent is an error.
    pub fn require(&self, id: &str) -> JobResult<Job> {
        self.get(id).ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    /// Atomic read-modify-write of a live job.
    pub fn mutate(&self, id: &str, mut f: impl FnMut(&mut Job)) -> JobResult<Job> {
        self.store
            .mutate(id, &mut f)
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    /// Move to `status`, recording `error` if given. Transitions the state
    /// machine forbids are rejected and leave the job unchanged.
    pub fn set_status(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<String>,
    ) -> JobResult<Job> {
        let mut rejected = None;
        let job = self.mutate(id, |job| {
            if !job.status.can_transition_to(status) {
                rejected = Some(job.status);
                return;
            }
            job.status = status;
            if status == JobStatus::Paused {
                job.is_paused = true;
            }
            if status.is_terminal() {
                job.current_file = None;
            }
            if error.is_some() {
                job.error = error.clone();
            }
        })?;
        match rejected {
            Some(from) => Err(JobError::InvalidTransition { from, to: status }),
            None => Ok(job),
        }
    }

    pub fn set_progress(&self, id: &str, update: ProgressUpdate) -> JobResult<Job> {
        self.mutate(id, |job| {
            if let Some(n) = update.processed_files {
                job.processed_files = n;
            }
            if let Some(name) = &update.current_file {
                job.current_file = Some(name.clone());
            }
            if let Some(n) = update.total_files {
                job.total_files = n;
            }
        })
    }

    /// First writer wins: record the file list unless one is already set.
    /// Returns whether this call was the one that set it. A finished job
    /// never takes a file list.
    pub fn set_files_once(&self, id: &str, files: Vec<SourceFile>) -> JobResult<bool> {
        let mut files = Some(files);
        let mut won = false;
        self.mutate(id, |job| {
            if job.files.is_some() || job.status.is_terminal() {
                return;
            }
            if let Some(files) = files.take() {
                job.total_files = files.len();
                job.files = Some(files);
                won = true;
            }
        })?;
        Ok(won)
    }

    /// Mark the job failed with `error`, but only if no caller has recorded
    /// a file list yet. Returns false when the job was already initialized
    /// (or already finished) and was left alone.
    pub fn fail_unless_initialized(&self, id: &str, error: String) -> JobResult<bool> {
        let mut error = Some(error);
        let mut failed = false;
        self.mutate(id, |job| {
            if job.files.is_some() || !job.status.can_transition_to(JobStatus::Failed) {
                return;
            }
            job.status = JobStatus::Failed;
            job.current_file = None;
            job.error = error.take();
            failed = true;
        })?;
        Ok(failed)
    }

    /// Insert or merge a result by file name. Returns false when the update
    /// was refused because it would revert a finished file to `processing`.
    pub fn upsert_result(&self, id: &str, result: FileResult) -> JobResult<bool> {
        let filename = result.filename.clone();
        let mut result = Some(result);
        let mut applied = false;
        self.mutate(id, |job| {
            if let Some(result) = result.take() {
                applied = job.upsert_result(result);
            }
        })?;
        if !applied {
            warn!(job_id = id, file = %filename, "refused to revert finished file");
        }
        Ok(applied)
    }

    /// Record the destination unless one is already set. This completes
    /// initialization, so a pending job moves to `processing`.
    pub fn set_resolved_destination(
        &self,
        id: &str,
        destination: ResolvedDestination,
    ) -> JobResult<Job> {
        let mut destination = Some(destination);
        self.mutate(id, |job| {
            if job.resolved_destination.is_none() {
                job.resolved_destination = destination.take();
            }
            if job.status == JobStatus::Pending && job.is_ready() {
                job.status = JobStatus::Processing;
            }
        })
    }

    /// Move the expiry to `after` from now.
    pub fn expire_after(&self, id: &str, after: Duration) -> JobResult<Job> {
        let at = unix_millis().saturating_add(after.as_millis() as u64);
        self.mutate(id, |job| job.expires_at = at)
    }

    pub fn delete(&self, id: &str) -> bool {
        self.store.remove(id).is_some()
    }

    pub fn list_all(&self) -> Vec<Job> {
        self.store.list()
    }

    /// Remove expired jobs; returns their ids.
    pub fn sweep_expired_ids(&self) -> Vec<String> {
        let ids = self.store.sweep_expired();
        if !ids.is_empty() {
            info!(count = ids.len(), "swept expired jobs");
        }
        ids
    }

    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_ids().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::FileStatus;
    use unlatch_cipher::DecryptionKey;
    use unlatch_core::types::{DestinationKind, SourceKind};

    fn config() -> JobConfig {
        JobConfig::new(
            SourceKind::RemoteFolder,
            DestinationKind::ClientDownload,
            DecryptionKey::parse("f626ad1ffb5159bef3e9295df34244af").unwrap(),
        )
        .with_source("cam")
    }

    fn files(names: &[&str]) -> Vec<SourceFile> {
        names
            .iter()
            .map(|n| SourceFile::new(format!("cam/{n}"), *n, 100))
            .collect()
    }

    #[test]
    fn test_create_defaults() {
        let reg = Registry::in_memory(Duration::from_secs(60));
        let job = reg.create(config());
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.results.is_empty());
        assert!(job.files.is_none());
        assert_eq!(job.expires_at - job.created_at, 60_000);
        assert!(reg.get(&job.id).is_some());
    }

    #[test]
    fn test_set_files_once_first_writer_wins() {
        let reg = Registry::in_memory(Duration::from_secs(60));
        let id = reg.create(config()).id;

        assert!(reg.set_files_once(&id, files(&["a.mp4", "b.mp4"])).unwrap());
        assert!(!reg.set_files_once(&id, files(&["z.mp4"])).unwrap());

        let job = reg.get(&id).unwrap();
        let names: Vec<_> = job.files.unwrap().into_iter().map(|f| f.name).collect();
        assert_eq!(names, ["a.mp4", "b.mp4"]);
        assert_eq!(job.total_files, 2);
    }

    #[test]
    fn test_expired_job_is_absent_and_evicted() {
        let reg = Registry::in_memory(Duration::ZERO);
        let id = reg.create(config()).id;
        assert!(reg.get(&id).is_none());
        assert!(matches!(reg.require(&id), Err(JobError::NotFound(_))));
        assert!(reg.list_all().is_empty());
    }

    #[test]
    fn test_sweep_expired_counts() {
        let reg = Registry::in_memory(Duration::from_secs(60));
        let keep = reg.create(config()).id;
        let gone = reg.create(config()).id;
        reg.expire_after(&gone, Duration::ZERO).unwrap();
        assert_eq!(reg.sweep_expired(), 1);
        assert!(reg.get(&keep).is_some());
        assert_eq!(reg.sweep_expired(), 0);
    }

    #[test]
    fn test_set_status_rejects_leaving_terminal() {
        let reg = Registry::in_memory(Duration::from_secs(60));
        let id = reg.create(config()).id;
        reg.set_status(&id, JobStatus::Failed, Some("boom".into()))
            .unwrap();
        let err = reg
            .set_status(&id, JobStatus::Processing, None)
            .unwrap_err();
        assert!(matches!(
            err,
            JobError::InvalidTransition {
                from: JobStatus::Failed,
                to: JobStatus::Processing
            }
        ));
        let job = reg.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_failed_job_keeps_first_error() {
        let reg = Registry::in_memory(Duration::from_secs(60));
        let id = reg.create(config()).id;
        reg.set_status(&id, JobStatus::Failed, Some("listing broke".into()))
            .unwrap();
        let err = reg
            .set_status(&id, JobStatus::Failed, Some("cancelled".into()))
            .unwrap_err();
        assert!(matches!(
            err,
            JobError::InvalidTransition {
                from: JobStatus::Failed,
                to: JobStatus::Failed
            }
        ));
        assert_eq!(reg.get(&id).unwrap().error.as_deref(), Some("listing broke"));
    }

    #[test]
    fn test_fail_unless_initialized() {
        let reg = Registry::in_memory(Duration::from_secs(60));
        let ready = reg.create(config()).id;
        assert!(reg.set_files_once(&ready, files(&["a.mp4"])).unwrap());
        assert!(!reg
            .fail_unless_initialized(&ready, "listing broke".into())
            .unwrap());
        let job = reg.get(&ready).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.error.is_none());

        let fresh = reg.create(config()).id;
        assert!(reg
            .fail_unless_initialized(&fresh, "listing broke".into())
            .unwrap());
        assert_eq!(reg.get(&fresh).unwrap().status, JobStatus::Failed);
        // a late initializer cannot revive it
        assert!(!reg.set_files_once(&fresh, files(&["a.mp4"])).unwrap());
        assert!(reg.get(&fresh).unwrap().files.is_none());
    }

    #[test]
    fn test_resolved_destination_starts_processing() {
        let reg = Registry::in_memory(Duration::from_secs(60));
        let id = reg.create(config()).id;
        // no file list yet: destination recorded, status unchanged
        let job = reg
            .set_resolved_destination(&id, ResolvedDestination::Download)
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        assert!(reg.set_files_once(&id, files(&["a.mp4"])).unwrap());
        let job = reg
            .set_resolved_destination(&id, ResolvedDestination::Download)
            .unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.is_ready());
    }

    #[test]
    fn test_upsert_result_in_place() {
        let reg = Registry::in_memory(Duration::from_secs(60));
        let id = reg.create(config()).id;
        assert!(reg
            .upsert_result(&id, FileResult::processing("a.mp4", 1))
            .unwrap());
        assert!(reg
            .upsert_result(&id, FileResult::failed("a.mp4", "bad", 2))
            .unwrap());
        assert!(!reg
            .upsert_result(&id, FileResult::processing("a.mp4", 3))
            .unwrap());

        let job = reg.get(&id).unwrap();
        assert_eq!(job.results.len(), 1);
        assert_eq!(job.results[0].status, FileStatus::Failed);
    }

    #[test]
    fn test_progress_partial_update() {
        let reg = Registry::in_memory(Duration::from_secs(60));
        let id = reg.create(config()).id;
        let before = reg.get(&id).unwrap().updated_at;
        let job = reg
            .set_progress(
                &id,
                ProgressUpdate {
                    current_file: Some("a.mp4".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(job.current_file.as_deref(), Some("a.mp4"));
        assert_eq!(job.processed_files, 0);
        assert!(job.updated_at >= before);
    }

    #[test]
    fn test_snapshots_are_detached() {
        let reg = Registry::in_memory(Duration::from_secs(60));
        let id = reg.create(config()).id;
        let mut snapshot = reg.get(&id).unwrap();
        snapshot.status = JobStatus::Completed;
        assert_eq!(reg.get(&id).unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn test_delete() {
        let reg = Registry::in_memory(Duration::from_secs(60));
        let id = reg.create(config()).id;
        assert!(reg.delete(&id));
        assert!(!reg.delete(&id));
        assert!(reg.get(&id).is_none());
    }
}
