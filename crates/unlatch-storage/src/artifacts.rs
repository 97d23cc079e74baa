//! Plaintext retained for client-download jobs
//!
//! Layout: `{job_id}/{filename}` inside a dedicated operator, so deleting a
//! job's artifacts is a single prefix sweep.

use std::collections::BTreeSet;

use bytes::Bytes;
use opendal::Operator;
use tracing::debug;

use crate::error::StorageError;
use crate::store::join_path;

#[derive(Clone)]
pub struct ArtifactStore {
    op: Operator,
}

impl ArtifactStore {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }

    /// In-memory artifact store.
    pub fn in_memory() -> Result<Self, StorageError> {
        let op = crate::memory_operator()
            .map_err(|e| StorageError::InvalidLocator(format!("memory operator: {e}")))?;
        Ok(Self::new(op))
    }

    /// Retain `data` for download; returns the artifact reference.
    pub async fn put(&self, job_id: &str, name: &str, data: Bytes) -> Result<String, StorageError> {
        let path = artifact_path(job_id, name)?;
        self.op
            .write(&path, data)
            .await
            .map_err(|e| StorageError::backend("write", &path, e))?;
        Ok(path)
    }

    pub async fn get(&self, job_id: &str, name: &str) -> Result<Bytes, StorageError> {
        let path = artifact_path(job_id, name)?;
        let buf = self
            .op
            .read(&path)
            .await
            .map_err(|e| StorageError::backend("read", &path, e))?;
        Ok(buf.to_bytes())
    }

    /// Delete every artifact of a job. Returns the number removed.
    pub async fn remove_job(&self, job_id: &str) -> Result<usize, StorageError> {
        let prefix = format!("{job_id}/");
        let entries = match self.op.list_with(&prefix).recursive(true).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StorageError::backend("list", &prefix, e)),
        };
        let mut removed = 0;
        for entry in entries {
            if !entry.metadata().mode().is_file() {
                continue;
            }
            self.op
                .delete(entry.path())
                .await
                .map_err(|e| StorageError::backend("delete", entry.path(), e))?;
            removed += 1;
        }
        debug!(job_id, removed, "removed job artifacts");
        Ok(removed)
    }

    /// Job ids that currently hold at least one artifact.
    pub async fn job_ids(&self) -> Result<BTreeSet<String>, StorageError> {
        let entries = self
            .op
            .list_with("/")
            .recursive(true)
            .await
            .map_err(|e| StorageError::backend("list", "/", e))?;
        Ok(entries
            .iter()
            .filter(|e| e.metadata().mode().is_file())
            .filter_map(|e| e.path().trim_start_matches('/').split('/').next())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect())
    }
}

fn artifact_path(job_id: &str, name: &str) -> Result<String, StorageError> {
    if job_id.is_empty() || job_id.contains('/') || name.is_empty() || name.contains('/') {
        return Err(StorageError::InvalidLocator(format!(
            "artifact reference {job_id:?}/{name:?}"
        )));
    }
    Ok(join_path(job_id, name))
}
