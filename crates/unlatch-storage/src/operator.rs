//! OpenDAL Operator factory for unlatch storage backends

use anyhow::{Context, Result};
use opendal::Operator;
use unlatch_core::config::{StorageBackend, StorageConfig};

/// Settings for an S3-compatible backend
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Build an S3 operator with logging and retry layers.
///
/// Path-style addressing is the opendal default, which MinIO and SeaweedFS need.
pub fn build_s3_operator(cfg: &S3Settings) -> Result<Operator> {
    let builder = opendal::services::S3::default()
        .endpoint(&cfg.endpoint)
        .region(&cfg.region)
        .bucket(&cfg.bucket)
        .access_key_id(&cfg.access_key_id)
        .secret_access_key(&cfg.secret_access_key);

    let op = Operator::new(builder)
        .context("creating OpenDAL S3 operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        )
        .finish();

    Ok(op)
}

/// Build a local-filesystem operator rooted at `root`.
pub fn build_fs_operator(root: &std::path::Path) -> Result<Operator> {
    let root = root
        .to_str()
        .with_context(|| format!("fs root is not valid UTF-8: {}", root.display()))?;
    let op = Operator::new(opendal::services::Fs::default().root(root))
        .with_context(|| format!("creating OpenDAL fs operator at {root}"))?
        .layer(opendal::layers::LoggingLayer::default())
        .finish();
    Ok(op)
}

/// Process-local in-memory operator (tests, download artifacts).
pub fn memory_operator() -> Result<Operator> {
    Ok(Operator::new(opendal::services::Memory::default())
        .context("creating OpenDAL memory operator")?
        .finish())
}

/// Build the operator selected by `storage.backend`.
///
/// S3 credentials are read from `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`
/// (or the `UNLATCH_` prefixed equivalents). A plaintext HTTP endpoint is an
/// error when `enforce_tls` is set and a warning otherwise.
pub fn build_operator(storage: &StorageConfig) -> Result<Operator> {
    match storage.backend {
        StorageBackend::Fs => build_fs_operator(&storage.root),
        StorageBackend::Memory => memory_operator(),
        StorageBackend::S3 => {
            check_endpoint_tls(storage)?;
            let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
                .or_else(|_| std::env::var("UNLATCH_ACCESS_KEY_ID"))
                .context("S3 credentials not set: export AWS_ACCESS_KEY_ID")?;
            let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
                .or_else(|_| std::env::var("UNLATCH_SECRET_ACCESS_KEY"))
                .context("AWS_SECRET_ACCESS_KEY not set")?;
            build_s3_operator(&S3Settings {
                endpoint: storage.endpoint.clone(),
                region: storage.region.clone(),
                bucket: storage.bucket.clone(),
                access_key_id,
                secret_access_key,
            })
        }
    }
}

fn check_endpoint_tls(storage: &StorageConfig) -> Result<()> {
    if storage.endpoint.starts_with("http://") {
        if storage.enforce_tls {
            anyhow::bail!(
                "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                storage.endpoint
            );
        }
        tracing::warn!(
            endpoint = %storage.endpoint,
            "S3 endpoint uses plaintext HTTP: credentials are transmitted unencrypted"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_s3_operator_valid() {
        let cfg = S3Settings {
            endpoint: "http://localhost:8333".to_string(),
            region: "us-east-1".to_string(),
            bucket: "test-bucket".to_string(),
            access_key_id: "test-key".to_string(),
            secret_access_key: "test-secret".to_string(),
        };
        assert!(build_s3_operator(&cfg).is_ok());
    }

    #[test]
    fn test_http_endpoint_with_enforce_tls_fails() {
        let storage = StorageConfig {
            backend: StorageBackend::S3,
            endpoint: "http://insecure:8333".into(),
            enforce_tls: true,
            ..Default::default()
        };
        let err = build_operator(&storage).unwrap_err();
        assert!(err.to_string().contains("enforce_tls"));
    }

    #[test]
    fn test_http_endpoint_without_enforce_tls_passes_check() {
        let storage = StorageConfig {
            endpoint: "http://localhost:8333".into(),
            enforce_tls: false,
            ..Default::default()
        };
        assert!(check_endpoint_tls(&storage).is_ok());
    }

    #[test]
    fn test_fs_backend_builds() {
        let tmp = tempfile::TempDir::new().unwrap();
        let storage = StorageConfig {
            backend: StorageBackend::Fs,
            root: tmp.path().to_path_buf(),
            ..Default::default()
        };
        assert!(build_operator(&storage).is_ok());
    }

    #[test]
    fn test_memory_backend_builds() {
        let storage = StorageConfig {
            backend: StorageBackend::Memory,
            ..Default::default()
        };
        assert!(build_operator(&storage).is_ok());
    }
}
