//! Thumbnail file naming and cleanup

use std::path::Path;
use uuid::Uuid;
use vidx_core::{Result, VidxError};

/// File name of the thumbnail for a frame: `{video_id}_{seconds:.1}.jpg`
pub fn thumbnail_name(video_id: Uuid, timestamp: f64) -> String {
    format!("{video_id}_{timestamp:.1}.jpg")
}

/// Delete every thumbnail of a video; returns how many were removed
pub async fn purge_thumbnails(dir: &Path, video_id: Uuid) -> Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(VidxError::infrastructure(
                "thumbnail storage",
                format!("{}: {e}", dir.display()),
            ))
        }
    };

    let prefix = format!("{video_id}_");
    let mut removed = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| VidxError::infrastructure("thumbnail storage", e.to_string()))?
    {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(&prefix) {
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(
                    path = %entry.path().display(),
                    error = %e,
                    "Failed to remove thumbnail"
                ),
            }
        }
    }
    Ok(removed)
}
