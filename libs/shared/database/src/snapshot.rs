use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{info, instrument};

use crate::store::StoreError;

/// Writes `state` as JSON, going through a temporary file so a crash never
/// leaves a half-written snapshot behind.
#[instrument(skip(state))]
pub async fn save_snapshot<S: Serialize>(path: &Path, state: &S) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(state)?;

    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, json).await?;
    tokio::fs::rename(&tmp_path, path).await?;

    info!("Snapshot written to {}", path.display());
    Ok(())
}

/// Returns `None` when no snapshot exists yet.
#[instrument]
pub async fn load_snapshot<S: DeserializeOwned>(path: &Path) -> Result<Option<S>, StoreError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No snapshot at {}, starting empty", path.display());
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    let state = serde_json::from_slice(&bytes)?;
    info!("Snapshot loaded from {}", path.display());
    Ok(Some(state))
}
