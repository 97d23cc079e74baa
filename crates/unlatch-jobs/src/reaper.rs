//! Background expiry sweep
//!
//! Removes expired jobs (including download-mode jobs whose cleanup window
//! elapsed) together with their artifacts, and prunes artifacts whose job
//! is gone.

use std::collections::HashSet;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use unlatch_storage::ArtifactStore;

use crate::registry::Registry;

/// One sweep. Returns the number of jobs removed.
pub async fn sweep_once(registry: &Registry, artifacts: &ArtifactStore) -> usize {
    let expired = registry.sweep_expired_ids();
    for id in &expired {
        if let Err(e) = artifacts.remove_job(id).await {
            warn!(job_id = %id, error = %e, "failed to remove artifacts of expired job");
        }
    }

    let live: HashSet<String> = registry.list_all().into_iter().map(|job| job.id).collect();
    match artifacts.job_ids().await {
        Ok(ids) => {
            for orphan in ids.into_iter().filter(|id| !live.contains(id)) {
                match artifacts.remove_job(&orphan).await {
                    Ok(removed) => debug!(job_id = %orphan, removed, "pruned orphaned artifacts"),
                    Err(e) => warn!(job_id = %orphan, error = %e, "failed to prune artifacts"),
                }
            }
        }
        Err(e) => warn!(error = %e, "listing artifacts failed"),
    }
    expired.len()
}

/// Sweep every `every` until `cancel` fires.
pub fn spawn_reaper(
    registry: Registry,
    artifacts: ArtifactStore,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = every.as_secs(), "reaper started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("reaper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    sweep_once(&registry, &artifacts).await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use unlatch_cipher::DecryptionKey;
    use unlatch_core::types::{DestinationKind, SourceKind};

    use crate::job::JobConfig;

    fn config() -> JobConfig {
        JobConfig::new(
            SourceKind::RemoteFolder,
            DestinationKind::ClientDownload,
            DecryptionKey::parse("f626ad1ffb5159bef3e9295df34244af").unwrap(),
        )
        .with_source("cam")
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_and_orphans() {
        let registry = Registry::in_memory(Duration::from_secs(60));
        let artifacts = ArtifactStore::in_memory().unwrap();

        let live = registry.create(config()).id;
        let expired = registry.create(config()).id;
        registry.expire_after(&expired, Duration::ZERO).unwrap();

        for id in [live.as_str(), expired.as_str(), "orphan"] {
            artifacts
                .put(id, "a.mp4", Bytes::from_static(b"x"))
                .await
                .unwrap();
        }

        assert_eq!(sweep_once(&registry, &artifacts).await, 1);
        let left = artifacts.job_ids().await.unwrap();
        assert_eq!(left.into_iter().collect::<Vec<_>>(), [live.clone()]);
        assert!(registry.get(&live).is_some());
    }

    #[tokio::test]
    async fn test_reaper_stops_on_cancel() {
        let registry = Registry::in_memory(Duration::from_secs(60));
        let artifacts = ArtifactStore::in_memory().unwrap();
        let cancel = CancellationToken::new();
        let handle = spawn_reaper(
            registry,
            artifacts,
            Duration::from_millis(10),
            cancel.clone(),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        handle.await.unwrap();
    }
}
