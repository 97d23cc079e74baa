//! File-store capabilities consumed by decryption jobs

use async_trait::async_trait;
use bytes::Bytes;
use opendal::Operator;
use tracing::debug;
use unlatch_core::types::SourceFile;

use crate::error::StorageError;

/// The remote file store as seen by the job core.
///
/// Implementations carry their own credentials; callers only pass locators.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Enumerate decryptable files directly under `source`.
    async fn list_files(&self, source: &str) -> Result<Vec<SourceFile>, StorageError>;

    /// Fetch the raw (encrypted) content of a file.
    async fn download(&self, file_id: &str) -> Result<Bytes, StorageError>;

    /// Store `data` as `name` inside `dest`; returns the new file id.
    async fn upload(
        &self,
        dest: &str,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<String, StorageError>;

    /// Idempotently resolve (creating if needed) the output folder that
    /// sits alongside `source`.
    async fn resolve_destination_folder(&self, source: &str) -> Result<String, StorageError>;
}

/// MIME type for an output file name.
pub fn content_type_for(name: &str) -> String {
    mime_guess::from_path(name)
        .first()
        .map(|m| m.to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

/// [`FileStore`] over an OpenDAL operator. File ids are object paths.
#[derive(Clone)]
pub struct OpendalStore {
    op: Operator,
    include: Vec<glob::Pattern>,
    subfolder_name: String,
}

impl OpendalStore {
    pub fn new(op: Operator) -> Self {
        Self {
            op,
            include: Vec::new(),
            subfolder_name: "decrypted".to_string(),
        }
    }

    /// Only list files whose name matches one of `patterns`.
    pub fn with_include_patterns(mut self, patterns: &[String]) -> Result<Self, StorageError> {
        self.include = patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p).map_err(|e| StorageError::InvalidPattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(self)
    }

    /// Name of the folder created by [`FileStore::resolve_destination_folder`].
    pub fn with_subfolder_name(mut self, name: impl Into<String>) -> Self {
        self.subfolder_name = name.into();
        self
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    fn included(&self, name: &str) -> bool {
        self.include.is_empty() || self.include.iter().any(|p| p.matches(name))
    }
}

#[async_trait]
impl FileStore for OpendalStore {
    async fn list_files(&self, source: &str) -> Result<Vec<SourceFile>, StorageError> {
        let dir = dir_path(source);
        let entries = self
            .op
            .list(&dir)
            .await
            .map_err(|e| StorageError::backend("list", &dir, e))?;

        let mut files = Vec::new();
        for entry in entries {
            if !entry.metadata().mode().is_file() || !self.included(entry.name()) {
                continue;
            }
            let mut size = entry.metadata().content_length();
            if size == 0 {
                // some listers leave the length unset
                size = self
                    .op
                    .stat(entry.path())
                    .await
                    .map_err(|e| StorageError::backend("stat", entry.path(), e))?
                    .content_length();
            }
            files.push(SourceFile::new(entry.path(), entry.name(), size));
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));

        debug!(source = %dir, count = files.len(), "listed source files");
        Ok(files)
    }

    async fn download(&self, file_id: &str) -> Result<Bytes, StorageError> {
        let buf = self
            .op
            .read(file_id)
            .await
            .map_err(|e| StorageError::backend("read", file_id, e))?;
        Ok(buf.to_bytes())
    }

    async fn upload(
        &self,
        dest: &str,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<String, StorageError> {
        if name.is_empty() || name.contains('/') {
            return Err(StorageError::InvalidLocator(format!(
                "output name must be a plain file name: {name:?}"
            )));
        }
        let path = join_path(dest, name);
        let result = if self.op.info().full_capability().write_with_content_type {
            self.op
                .write_with(&path, data)
                .content_type(content_type)
                .await
        } else {
            self.op.write(&path, data).await
        };
        result.map_err(|e| StorageError::backend("write", &path, e))?;
        Ok(path)
    }

    async fn resolve_destination_folder(&self, source: &str) -> Result<String, StorageError> {
        let dir = dir_path(&join_path(source, &self.subfolder_name));
        match self.op.create_dir(&dir).await {
            Ok(()) => {}
            // flat object stores create the prefix on first write
            Err(e) if e.kind() == opendal::ErrorKind::Unsupported => {}
            Err(e) => return Err(StorageError::backend("create_dir", &dir, e)),
        }
        Ok(dir)
    }
}

/// `a/b` + `c` → `a/b/c`; an empty or root dir yields just `name`.
pub(crate) fn join_path(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Directory form of a locator (trailing slash; root is `/`).
pub(crate) fn dir_path(locator: &str) -> String {
    let trimmed = locator.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("{trimmed}/")
    }
}
