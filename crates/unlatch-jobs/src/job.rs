//! Job record, per-file results, and the read model handed to callers

use serde::Serialize;
use unlatch_cipher::DecryptionKey;
use unlatch_core::types::{DestinationKind, SourceFile, SourceKind};

use crate::error::JobError;

/// Lifecycle of a job.
///
/// `pending -> processing <-> paused -> {completed | failed}`; `failed` is
/// also reachable from `pending` on a setup error. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Paused,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    /// Re-asserting a live state is allowed; a terminal state accepts nothing,
    /// not even itself.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        if self.is_terminal() {
            return false;
        }
        if self == next {
            return true;
        }
        match (self, next) {
            (Pending, Processing | Paused | Failed) => true,
            (Processing, Paused | Completed | Failed) => true,
            (Paused, Processing | Completed | Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl FileStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, FileStatus::Success | FileStatus::Failed)
    }
}

/// Where a decrypted file ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputRef {
    /// Uploaded to the remote store
    Remote { file_id: String },
    /// Retained in the artifact store for client download
    Artifact { path: String },
}

/// One file's outcome within a job. `filename` is the correlation key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileResult {
    pub filename: String,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// When the entry was last claimed (ms); drives stale-claim reclaim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
}

impl FileResult {
    pub fn processing(filename: impl Into<String>, now: u64) -> Self {
        Self {
            filename: filename.into(),
            status: FileStatus::Processing,
            error: None,
            output: None,
            size: None,
            claimed_at: Some(now),
            completed_at: None,
        }
    }

    pub fn success(filename: impl Into<String>, output: OutputRef, size: u64, now: u64) -> Self {
        Self {
            filename: filename.into(),
            status: FileStatus::Success,
            error: None,
            output: Some(output),
            size: Some(size),
            claimed_at: None,
            completed_at: Some(now),
        }
    }

    pub fn failed(filename: impl Into<String>, error: impl Into<String>, now: u64) -> Self {
        Self {
            filename: filename.into(),
            status: FileStatus::Failed,
            error: Some(error.into()),
            output: None,
            size: None,
            claimed_at: None,
            completed_at: Some(now),
        }
    }

    /// Merge `update` into this entry. Present fields overwrite; absent
    /// ones are kept. Returns false (leaving the entry untouched) when the
    /// update would move a terminal entry back to `processing`.
    pub fn merge(&mut self, update: FileResult) -> bool {
        if self.status.is_terminal() && !update.status.is_terminal() {
            return false;
        }
        self.status = update.status;
        if update.error.is_some() {
            self.error = update.error;
        }
        if update.output.is_some() {
            self.output = update.output;
        }
        if update.size.is_some() {
            self.size = update.size;
        }
        if update.claimed_at.is_some() {
            self.claimed_at = update.claimed_at;
        }
        if update.completed_at.is_some() {
            self.completed_at = update.completed_at;
        }
        true
    }
}

/// Destination fixed during initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolvedDestination {
    /// Upload into `locator`, optionally renaming each file with a prefix
    Folder {
        locator: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        name_prefix: Option<String>,
    },
    /// Keep plaintext as downloadable artifacts
    Download,
}

impl ResolvedDestination {
    /// Output name for a source file name.
    pub fn output_name(&self, name: &str) -> String {
        match self {
            ResolvedDestination::Folder {
                name_prefix: Some(prefix),
                ..
            } => format!("{prefix}{name}"),
            _ => name.to_string(),
        }
    }
}

/// Immutable configuration of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobConfig {
    pub source_kind: SourceKind,
    pub source_locator: Option<String>,
    pub destination_kind: DestinationKind,
    pub destination_locator: Option<String>,
    /// Write output next to the source instead of at `destination_locator`
    pub same_folder: bool,
    /// With `same_folder`: prefix output names instead of using a subfolder
    pub use_prefix: bool,
    #[serde(skip)]
    pub key: DecryptionKey,
    /// Restrict the job to these source names (retry jobs)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub only_files: Option<Vec<String>>,
}

impl JobConfig {
    pub fn new(
        source_kind: SourceKind,
        destination_kind: DestinationKind,
        key: DecryptionKey,
    ) -> Self {
        Self {
            source_kind,
            source_locator: None,
            destination_kind,
            destination_locator: None,
            same_folder: false,
            use_prefix: false,
            key,
            only_files: None,
        }
    }

    pub fn with_source(mut self, locator: impl Into<String>) -> Self {
        self.source_locator = Some(locator.into());
        self
    }

    pub fn with_destination(mut self, locator: impl Into<String>) -> Self {
        self.destination_locator = Some(locator.into());
        self
    }

    /// Output alongside the source; `use_prefix` picks renaming over a subfolder.
    pub fn same_folder(mut self, use_prefix: bool) -> Self {
        self.same_folder = true;
        self.use_prefix = use_prefix;
        self
    }

    /// Reject combinations that can never produce a destination. A missing
    /// source is not checked here; it fails the job on its first batch.
    pub fn validate(&self) -> Result<(), JobError> {
        match self.destination_kind {
            DestinationKind::ClientDownload => {
                if self.same_folder {
                    return Err(JobError::InvalidConfig(
                        "same-folder output needs a remote-folder destination".into(),
                    ));
                }
            }
            DestinationKind::RemoteFolder => {
                if self.same_folder && self.source_kind == SourceKind::LocalUpload {
                    return Err(JobError::InvalidConfig(
                        "same-folder output needs a remote-folder source".into(),
                    ));
                }
                let has_dest = self
                    .destination_locator
                    .as_deref()
                    .is_some_and(|d| !d.trim().is_empty());
                if !self.same_folder && !has_dest {
                    return Err(JobError::InvalidConfig(
                        "remote-folder destination needs a locator or same-folder".into(),
                    ));
                }
            }
        }
        if self.use_prefix && !self.same_folder {
            return Err(JobError::InvalidConfig(
                "name prefixing only applies to same-folder output".into(),
            ));
        }
        Ok(())
    }
}

/// A decryption run. Owned by the registry; callers only see clones.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub config: JobConfig,
    pub status: JobStatus,
    pub is_paused: bool,
    pub files: Option<Vec<SourceFile>>,
    pub resolved_destination: Option<ResolvedDestination>,
    /// One entry per file name, in first-claim order
    pub results: Vec<FileResult>,
    pub total_files: usize,
    pub processed_files: usize,
    pub current_file: Option<String>,
    pub error: Option<String>,
    pub retry_of: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
    pub expires_at: u64,
}

impl Job {
    pub fn new(id: String, config: JobConfig, now: u64, ttl_ms: u64) -> Self {
        Self {
            id,
            config,
            status: JobStatus::Pending,
            is_paused: false,
            files: None,
            resolved_destination: None,
            results: Vec::new(),
            total_files: 0,
            processed_files: 0,
            current_file: None,
            error: None,
            retry_of: None,
            created_at: now,
            updated_at: now,
            expires_at: now.saturating_add(ttl_ms),
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Files and destination are both in place; claiming may start.
    pub fn is_ready(&self) -> bool {
        self.files.is_some() && self.resolved_destination.is_some()
    }

    pub fn result(&self, filename: &str) -> Option<&FileResult> {
        self.results.iter().find(|r| r.filename == filename)
    }

    pub fn count_terminal(&self) -> usize {
        self.results.iter().filter(|r| r.status.is_terminal()).count()
    }

    pub fn has_processing(&self) -> bool {
        self.results
            .iter()
            .any(|r| r.status == FileStatus::Processing)
    }

    /// Insert or merge a result keyed by file name.
    pub fn upsert_result(&mut self, result: FileResult) -> bool {
        match self
            .results
            .iter_mut()
            .find(|r| r.filename == result.filename)
        {
            Some(existing) => existing.merge(result),
            None => {
                self.results.push(result);
                true
            }
        }
    }

    pub fn view(&self) -> JobView {
        JobView {
            id: self.id.clone(),
            status: self.status,
            is_paused: self.is_paused,
            total_files: self.total_files,
            processed_files: self.processed_files,
            current_file: self.current_file.clone(),
            error: self.error.clone(),
            retry_of: self.retry_of.clone(),
            results: self.results.clone(),
        }
    }
}

/// Read model for status polling.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub id: String,
    pub status: JobStatus,
    pub is_paused: bool,
    pub total_files: usize,
    pub processed_files: usize,
    pub current_file: Option<String>,
    pub error: Option<String>,
    pub retry_of: Option<String>,
    pub results: Vec<FileResult>,
}

/// Partial progress update; `None` fields are left as they are.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub processed_files: Option<usize>,
    pub current_file: Option<String>,
    pub total_files: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> DecryptionKey {
        DecryptionKey::parse("f626ad1ffb5159bef3e9295df34244af").unwrap()
    }

    #[test]
    fn test_terminal_states_are_final() {
        for next in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Paused,
        ] {
            assert!(!JobStatus::Completed.can_transition_to(next));
            assert!(!JobStatus::Failed.can_transition_to(next));
        }
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Paused.can_transition_to(JobStatus::Paused));
    }

    #[test]
    fn test_pause_cycle_allowed() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Paused));
        assert!(JobStatus::Paused.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Processing.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn test_merge_refuses_terminal_revert() {
        let mut r = FileResult::success(
            "a.mp4",
            OutputRef::Remote {
                file_id: "out/a.mp4".into(),
            },
            10,
            5,
        );
        assert!(!r.merge(FileResult::processing("a.mp4", 9)));
        assert_eq!(r.status, FileStatus::Success);
        assert_eq!(r.claimed_at, None);
    }

    #[test]
    fn test_merge_keeps_absent_fields() {
        let mut r = FileResult::processing("a.mp4", 3);
        assert!(r.merge(FileResult::failed("a.mp4", "boom", 7)));
        assert_eq!(r.status, FileStatus::Failed);
        assert_eq!(r.error.as_deref(), Some("boom"));
        assert_eq!(r.claimed_at, Some(3));
        assert_eq!(r.completed_at, Some(7));
    }

    #[test]
    fn test_upsert_keeps_names_unique() {
        let config = JobConfig::new(
            SourceKind::RemoteFolder,
            DestinationKind::ClientDownload,
            key(),
        )
        .with_source("cam");
        let mut job = Job::new("j".into(), config, 0, 1000);
        job.upsert_result(FileResult::processing("a.mp4", 1));
        job.upsert_result(FileResult::processing("b.mp4", 1));
        job.upsert_result(FileResult::failed("a.mp4", "x", 2));
        assert_eq!(job.results.len(), 2);
        assert_eq!(job.results[0].filename, "a.mp4");
        assert_eq!(job.count_terminal(), 1);
        assert!(job.has_processing());
    }

    #[test]
    fn test_output_name_prefix() {
        let plain = ResolvedDestination::Folder {
            locator: "cam/decrypted/".into(),
            name_prefix: None,
        };
        let prefixed = ResolvedDestination::Folder {
            locator: "cam/".into(),
            name_prefix: Some("decrypted_".into()),
        };
        assert_eq!(plain.output_name("a.mp4"), "a.mp4");
        assert_eq!(prefixed.output_name("a.mp4"), "decrypted_a.mp4");
        assert_eq!(ResolvedDestination::Download.output_name("a.mp4"), "a.mp4");
    }

    #[test]
    fn test_validate_config() {
        let ok = JobConfig::new(SourceKind::RemoteFolder, DestinationKind::RemoteFolder, key())
            .with_source("cam")
            .same_folder(true);
        assert!(ok.validate().is_ok());

        let no_dest = JobConfig::new(SourceKind::RemoteFolder, DestinationKind::RemoteFolder, key())
            .with_source("cam");
        assert!(matches!(no_dest.validate(), Err(JobError::InvalidConfig(_))));

        let upload_same = JobConfig::new(
            SourceKind::LocalUpload,
            DestinationKind::RemoteFolder,
            key(),
        )
        .with_source("staging")
        .same_folder(false);
        assert!(upload_same.validate().is_err());

        // missing source is deferred to the first batch
        let no_source = JobConfig::new(
            SourceKind::RemoteFolder,
            DestinationKind::ClientDownload,
            key(),
        );
        assert!(no_source.validate().is_ok());
    }

    #[test]
    fn test_view_never_exposes_key() {
        let config = JobConfig::new(
            SourceKind::RemoteFolder,
            DestinationKind::ClientDownload,
            key(),
        )
        .with_source("cam");
        let job = Job::new("j".into(), config, 0, 1000);
        let json = serde_json::to_string(&job).unwrap();
        assert!(!json.contains("f626ad1ffb5159bef3e9295df34244af"));
        let view = serde_json::to_value(job.view()).unwrap();
        assert_eq!(view["status"], "pending");
        assert_eq!(view["total_files"], 0);
    }
}
