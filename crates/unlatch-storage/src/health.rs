//! Reachability probe run before any job is created

use opendal::Operator;
use tracing::debug;

use crate::error::StorageError;

/// List the backend root once, so bad credentials or a dead endpoint fail
/// the command up front instead of failing every job on its first listing.
pub async fn check_health(op: &Operator) -> Result<(), StorageError> {
    let info = op.info();
    op.list("/")
        .await
        .map_err(|e| StorageError::backend("list", "/", e))?;
    debug!(scheme = %info.scheme(), root = %info.root(), "storage reachable");
    Ok(())
}
