//! Job Orchestrator: one invocation advances a job by one batch
//!
//! Any number of callers may call [`Orchestrator::advance`] for the same job
//! concurrently. The first caller to find the job uninitialized lists the
//! source and resolves the destination; the others wait for it, then all of
//! them claim disjoint batches until nothing is left.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use unlatch_cipher::{
    decrypt_in_place, decrypt_in_place_parallel, looks_like_container_header, Keystream,
    HEADER_PROBE_LEN,
};
use unlatch_core::config::UnlatchConfig;
use unlatch_core::types::{DestinationKind, SourceFile};
use unlatch_core::unix_millis;
use unlatch_storage::{content_type_for, ArtifactStore, FileStore};

use crate::claim::{claim, pending_files, ClaimOutcome};
use crate::error::{JobError, JobResult};
use crate::job::{
    FileResult, FileStatus, Job, JobConfig, JobStatus, JobView, OutputRef, ProgressUpdate,
    ResolvedDestination,
};
use crate::registry::Registry;

/// Hint recorded when a decrypted header does not validate.
pub const WRONG_KEY_HINT: &str = "decrypted header is not a recognised container (wrong key?)";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Files claimed per invocation
    pub batch_size: usize,
    pub init_poll_interval: Duration,
    pub init_poll_attempts: u32,
    /// Reclaim `processing` entries older than this
    pub stale_claim_after: Option<Duration>,
    /// Client-download jobs expire this long after completing
    pub download_cleanup: Duration,
    /// Output name prefix for same-folder, prefix-mode jobs
    pub name_prefix: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_config(&UnlatchConfig::default())
    }
}

impl OrchestratorConfig {
    pub fn from_config(config: &UnlatchConfig) -> Self {
        let jobs = &config.jobs;
        Self {
            batch_size: jobs.batch_size.max(1),
            init_poll_interval: Duration::from_millis(jobs.init_poll_interval_ms),
            init_poll_attempts: jobs.init_poll_attempts,
            stale_claim_after: (jobs.stale_claim_secs > 0)
                .then(|| Duration::from_secs(jobs.stale_claim_secs)),
            download_cleanup: Duration::from_secs(jobs.download_cleanup_secs),
            name_prefix: config.output.name_prefix.clone(),
        }
    }
}

/// What one [`Orchestrator::advance`] call did.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub job_id: String,
    pub status: JobStatus,
    /// This call listed the source and resolved the destination
    pub initialized: bool,
    pub paused: bool,
    /// The caller's token fired before the batch finished
    pub cancelled: bool,
    /// Files this call claimed
    pub claimed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_files: usize,
    pub processed_files: usize,
}

impl BatchOutcome {
    fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            initialized: false,
            paused: job.is_paused,
            cancelled: false,
            claimed: 0,
            succeeded: 0,
            failed: 0,
            total_files: job.total_files,
            processed_files: job.processed_files,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether calling [`Orchestrator::advance`] again can make progress.
    /// False once the job is finished or paused, and when this call found no
    /// work because the remaining files are claimed by other callers.
    pub fn should_continue(&self) -> bool {
        !self.is_finished()
            && !self.paused
            && !self.cancelled
            && (self.initialized || self.claimed > 0)
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    registry: Registry,
    store: Arc<dyn FileStore>,
    artifacts: ArtifactStore,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        registry: Registry,
        store: Arc<dyn FileStore>,
        artifacts: ArtifactStore,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            store,
            artifacts,
            config,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn create_job(&self, config: JobConfig) -> JobResult<Job> {
        config.validate()?;
        Ok(self.registry.create(config))
    }

    pub fn view(&self, id: &str) -> JobResult<JobView> {
        Ok(self.registry.require(id)?.view())
    }

    pub fn list(&self) -> Vec<JobView> {
        self.registry.list_all().iter().map(Job::view).collect()
    }

    /// Advance one batch with no cancellation.
    pub async fn advance(&self, id: &str) -> JobResult<BatchOutcome> {
        self.advance_with_cancel(id, &CancellationToken::new()).await
    }

    /// Advance job `id` by one batch.
    ///
    /// `cancel` is checked between files; claims already recorded stay
    /// `processing`.
    pub async fn advance_with_cancel(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> JobResult<BatchOutcome> {
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        let mut job = self.registry.require(id)?;
        if job.status.is_terminal() || job.is_paused {
            return Ok(BatchOutcome::from_job(&job));
        }

        if !job.is_ready() {
            if job.files.is_none() && self.initialize(&job).await? {
                let job = self.registry.require(id)?;
                let mut outcome = BatchOutcome::from_job(&job);
                outcome.initialized = true;
                return Ok(outcome);
            }
            job = self.wait_until_ready(id).await?;
        }

        let files = match claim(
            &self.registry,
            id,
            self.config.batch_size,
            self.config.stale_claim_after,
        )? {
            ClaimOutcome::Claimed(files) => files,
            ClaimOutcome::Paused | ClaimOutcome::Finished(_) => {
                return Ok(BatchOutcome::from_job(&self.registry.require(id)?));
            }
            ClaimOutcome::Uninitialized => {
                return Err(JobError::InitTimeout {
                    attempts: self.config.init_poll_attempts,
                })
            }
        };

        let Some(destination) = job.resolved_destination.clone() else {
            return Err(JobError::InitTimeout {
                attempts: self.config.init_poll_attempts,
            });
        };
        let keystream = job.config.key.keystream();

        let (mut succeeded, mut failed, mut cancelled) = (0, 0, false);
        for file in &files {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            self.registry.set_progress(
                id,
                ProgressUpdate {
                    current_file: Some(file.name.clone()),
                    ..Default::default()
                },
            )?;

            let result = self.process_file(id, &destination, &keystream, file).await;
            match result.status {
                FileStatus::Success => succeeded += 1,
                _ => failed += 1,
            }
            self.registry.upsert_result(id, result)?;
        }

        let job = self.finalize(id)?;
        let mut outcome = BatchOutcome::from_job(&job);
        outcome.claimed = files.len();
        outcome.succeeded = succeeded;
        outcome.failed = failed;
        outcome.cancelled = cancelled;
        debug!(
            job_id = id,
            claimed = outcome.claimed,
            succeeded,
            failed,
            processed = job.processed_files,
            total = job.total_files,
            "batch done"
        );
        Ok(outcome)
    }

    /// List the source and try to become the initializer. Returns true if
    /// this call won and resolved the destination, false if another caller
    /// had already recorded the file list.
    async fn initialize(&self, job: &Job) -> JobResult<bool> {
        let id = job.id.as_str();
        let Some(source) = job
            .config
            .source_locator
            .as_deref()
            .filter(|s| !s.trim().is_empty())
        else {
            return Err(self.fail(id, JobError::MissingSource));
        };

        let mut files = match self.store.list_files(source).await {
            Ok(files) => files,
            Err(e) => {
                let err = JobError::Listing(e);
                // losing the race is not an error: someone else's listing worked
                if !self.registry.fail_unless_initialized(id, err.to_string())? {
                    warn!(
                        job_id = id,
                        error = %err,
                        "listing failed; job already initialized or finished"
                    );
                    return Ok(false);
                }
                error!(job_id = id, error = %err, "job failed");
                return Err(err);
            }
        };
        if let Some(only) = &job.config.only_files {
            files.retain(|f| only.contains(&f.name));
        }
        let count = files.len();

        if !self.registry.set_files_once(id, files)? {
            warn!(job_id = id, "another caller initialized the job first");
            return Ok(false);
        }

        let destination = self
            .resolve_destination(&job.config, source)
            .await
            .map_err(|e| self.fail(id, e))?;
        self.registry.set_resolved_destination(id, destination)?;

        info!(job_id = id, source, files = count, "job initialized");
        Ok(true)
    }

    async fn resolve_destination(
        &self,
        config: &JobConfig,
        source: &str,
    ) -> JobResult<ResolvedDestination> {
        match config.destination_kind {
            DestinationKind::ClientDownload => Ok(ResolvedDestination::Download),
            DestinationKind::RemoteFolder if config.same_folder => {
                if config.use_prefix {
                    Ok(ResolvedDestination::Folder {
                        locator: source.to_string(),
                        name_prefix: Some(self.config.name_prefix.clone()),
                    })
                } else {
                    let locator = self
                        .store
                        .resolve_destination_folder(source)
                        .await
                        .map_err(JobError::Destination)?;
                    Ok(ResolvedDestination::Folder {
                        locator,
                        name_prefix: None,
                    })
                }
            }
            DestinationKind::RemoteFolder => match config.destination_locator.as_deref() {
                Some(locator) if !locator.trim().is_empty() => Ok(ResolvedDestination::Folder {
                    locator: locator.to_string(),
                    name_prefix: None,
                }),
                _ => Err(JobError::InvalidConfig(
                    "remote-folder destination needs a locator".into(),
                )),
            },
        }
    }

    /// Poll until another caller finishes initializing, bounded by the
    /// configured attempts. A job that reached a terminal state also ends
    /// the wait.
    async fn wait_until_ready(&self, id: &str) -> JobResult<Job> {
        for attempt in 0..self.config.init_poll_attempts {
            let job = self.registry.require(id)?;
            if job.is_ready() || job.status.is_terminal() {
                return Ok(job);
            }
            debug!(job_id = id, attempt, "waiting for job initialization");
            tokio::time::sleep(self.config.init_poll_interval).await;
        }
        let job = self.registry.require(id)?;
        if job.is_ready() || job.status.is_terminal() {
            return Ok(job);
        }
        warn!(job_id = id, "gave up waiting for job initialization");
        Err(JobError::InitTimeout {
            attempts: self.config.init_poll_attempts,
        })
    }

    /// Download, validate, decrypt and store one file. Never fails: every
    /// error becomes a `failed` result.
    async fn process_file(
        &self,
        id: &str,
        destination: &ResolvedDestination,
        keystream: &Keystream,
        file: &SourceFile,
    ) -> FileResult {
        let name = file.name.as_str();
        let data = match self.store.download(&file.id).await {
            Ok(data) => data,
            Err(e) => return self.file_failed(id, name, format!("download failed: {e}")),
        };
        if data.len() < HEADER_PROBE_LEN {
            return self.file_failed(
                id,
                name,
                format!("file too short for a container header ({} bytes)", data.len()),
            );
        }

        let mut plain = data.to_vec();
        decrypt_in_place(&mut plain[..HEADER_PROBE_LEN], keystream, 0);
        if !looks_like_container_header(&plain[..HEADER_PROBE_LEN]) {
            return self.file_failed(id, name, WRONG_KEY_HINT.to_string());
        }

        let keystream = keystream.clone();
        let plain = match tokio::task::spawn_blocking(move || {
            decrypt_in_place_parallel(
                &mut plain[HEADER_PROBE_LEN..],
                &keystream,
                HEADER_PROBE_LEN as u64,
            );
            plain
        })
        .await
        {
            Ok(plain) => plain,
            Err(e) => return self.file_failed(id, name, format!("decryption task failed: {e}")),
        };
        let size = plain.len() as u64;
        let plain = Bytes::from(plain);

        let output = match destination {
            ResolvedDestination::Folder { locator, .. } => {
                let out_name = destination.output_name(name);
                self.store
                    .upload(locator, &out_name, plain, &content_type_for(name))
                    .await
                    .map(|file_id| OutputRef::Remote { file_id })
                    .map_err(|e| format!("upload failed: {e}"))
            }
            ResolvedDestination::Download => self
                .artifacts
                .put(id, name, plain)
                .await
                .map(|path| OutputRef::Artifact { path })
                .map_err(|e| format!("storing artifact failed: {e}")),
        };

        match output {
            Ok(output) => {
                debug!(job_id = id, file = name, size, "decrypted");
                FileResult::success(name, output, size, unix_millis())
            }
            Err(e) => self.file_failed(id, name, e),
        }
    }

    fn file_failed(&self, id: &str, name: &str, error: String) -> FileResult {
        warn!(job_id = id, file = name, error = %error, "file failed");
        FileResult::failed(name, error, unix_millis())
    }

    /// Recount progress and complete the job when no work is left.
    fn finalize(&self, id: &str) -> JobResult<Job> {
        let cleanup_ms = self.config.download_cleanup.as_millis() as u64;
        let mut completed = false;
        let job = self.registry.mutate(id, |job| {
            job.processed_files = job.count_terminal();
            if job.status.is_terminal() || !job.is_ready() {
                return;
            }
            if pending_files(job).is_empty()
                && !job.has_processing()
                && job.status.can_transition_to(JobStatus::Completed)
            {
                job.status = JobStatus::Completed;
                job.is_paused = false;
                job.current_file = None;
                if job.config.destination_kind == DestinationKind::ClientDownload {
                    job.expires_at = unix_millis().saturating_add(cleanup_ms);
                }
                completed = true;
            }
        })?;
        if completed {
            let failed = job
                .results
                .iter()
                .filter(|r| r.status == FileStatus::Failed)
                .count();
            info!(
                job_id = id,
                total = job.total_files,
                failed,
                "job completed"
            );
        }
        Ok(job)
    }

    /// Mark a job failed with `err` and hand the error back for propagation.
    fn fail(&self, id: &str, err: JobError) -> JobError {
        error!(job_id = id, error = %err, "job failed");
        if let Err(e) = self
            .registry
            .set_status(id, JobStatus::Failed, Some(err.to_string()))
        {
            warn!(job_id = id, error = %e, "could not mark job failed");
        }
        err
    }

    /// Stop new batches; in-flight files still finish.
    pub fn pause(&self, id: &str) -> JobResult<JobView> {
        let job = self.registry.set_status(id, JobStatus::Paused, None)?;
        info!(job_id = id, "job paused");
        Ok(job.view())
    }

    pub fn resume(&self, id: &str) -> JobResult<JobView> {
        let mut rejected = None;
        let job = self.registry.mutate(id, |job| {
            if job.status.is_terminal() {
                rejected = Some(job.status);
                return;
            }
            job.is_paused = false;
            if job.status == JobStatus::Paused {
                job.status = if job.files.is_some() {
                    JobStatus::Processing
                } else {
                    JobStatus::Pending
                };
            }
        })?;
        if let Some(from) = rejected {
            return Err(JobError::InvalidTransition {
                from,
                to: JobStatus::Processing,
            });
        }
        info!(job_id = id, "job resumed");
        Ok(job.view())
    }

    /// Mark the job failed. Other callers mid-batch finish their claimed
    /// files; no new batch starts.
    pub fn cancel(&self, id: &str) -> JobResult<JobView> {
        let job = self
            .registry
            .set_status(id, JobStatus::Failed, Some("cancelled".into()))?;
        info!(job_id = id, "job cancelled");
        Ok(job.view())
    }

    /// New job over the failed files of `id`, optionally narrowed to
    /// `filenames`. The original job is left untouched.
    pub fn retry(&self, id: &str, filenames: Option<&[String]>) -> JobResult<Job> {
        let original = self.registry.require(id)?;
        let selected: Vec<String> = original
            .results
            .iter()
            .filter(|r| r.status == FileStatus::Failed)
            .map(|r| r.filename.clone())
            .filter(|name| filenames.map_or(true, |wanted| wanted.contains(name)))
            .collect();
        if selected.is_empty() {
            return Err(JobError::NothingToRetry);
        }

        let mut config = original.config.clone();
        config.only_files = Some(selected);
        let job = self.registry.create_retry(config, id);
        info!(
            job_id = %job.id,
            retry_of = id,
            files = job.config.only_files.as_ref().map_or(0, Vec::len),
            "job retried"
        );
        Ok(job)
    }

    /// Drop the job and its artifacts. Returns whether the job existed.
    pub async fn delete(&self, id: &str) -> bool {
        let existed = self.registry.delete(id);
        match self.artifacts.remove_job(id).await {
            Ok(0) => {}
            Ok(removed) => debug!(job_id = id, removed, "removed artifacts"),
            Err(e) => warn!(job_id = id, error = %e, "failed to remove artifacts"),
        }
        if existed {
            info!(job_id = id, "job deleted");
        }
        existed
    }

    /// Plaintext of a successfully decrypted file of a client-download job.
    pub async fn artifact(&self, id: &str, filename: &str) -> JobResult<Bytes> {
        let job = self.registry.require(id)?;
        match job.result(filename) {
            Some(FileResult {
                status: FileStatus::Success,
                output: Some(OutputRef::Artifact { .. }),
                ..
            }) => Ok(self.artifacts.get(id, filename).await?),
            _ => Err(JobError::ArtifactUnavailable(filename.to_string())),
        }
    }
}
