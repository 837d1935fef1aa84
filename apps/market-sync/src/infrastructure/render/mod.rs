//! Snapshot Rendering
//!
//! Writes each live range snapshot to `<dir>/<range-id>.json`. Writes go to a
//! staging file unique to that write, which is then renamed over the target,
//! so readers never observe a partially written snapshot.
//!
//! Range ids are percent-encoded into file names. The encoding is one-to-one,
//! so two ranges never share an output file.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::application::ports::{RenderWriteError, Renderer};
use crate::domain::live_range::{RangeId, Snapshot};

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// Renders snapshots as JSON files in one directory.
#[derive(Debug, Clone)]
pub struct JsonFileRenderer {
    dir: PathBuf,
}

impl JsonFileRenderer {
    /// Create a renderer writing into `dir`. The directory is created on
    /// first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Output directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File a range is rendered to.
    #[must_use]
    pub fn path_for(&self, range_id: &RangeId) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(range_id)))
    }
}

#[async_trait]
impl Renderer for JsonFileRenderer {
    async fn write(&self, range_id: &RangeId, snapshot: &Snapshot) -> Result<(), RenderWriteError> {
        let body = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| RenderWriteError::new(range_id, format!("encode: {e}")))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| RenderWriteError::new(range_id, format!("create {}: {e}", self.dir.display())))?;

        let stem = file_stem(range_id);
        let target = self.dir.join(format!("{stem}.json"));
        let staging = self.dir.join(format!(
            "{stem}.json.{}-{}.tmp",
            std::process::id(),
            STAGING_SEQ.fetch_add(1, Ordering::Relaxed)
        ));

        let written = match tokio::fs::write(&staging, &body).await {
            Ok(()) => tokio::fs::rename(&staging, &target)
                .await
                .map_err(|e| format!("rename {}: {e}", target.display())),
            Err(e) => Err(format!("write {}: {e}", staging.display())),
        };
        if let Err(reason) = written {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(RenderWriteError::new(range_id, reason));
        }

        tracing::trace!(range_id = %range_id, path = %target.display(), bytes = body.len(), "Snapshot written");
        Ok(())
    }
}

/// File name stem for a range id. Bytes outside `[A-Za-z0-9._-]` become
/// `%XX`, as does a leading `.`, so no file name resolves to a directory.
fn file_stem(range_id: &RangeId) -> String {
    let id = range_id.as_str();
    let mut stem = String::with_capacity(id.len());
    for (i, byte) in id.bytes().enumerate() {
        let keep = byte.is_ascii_alphanumeric()
            || matches!(byte, b'_' | b'-')
            || (byte == b'.' && i > 0);
        if keep {
            stem.push(char::from(byte));
        } else {
            let _ = write!(stem, "%{byte:02X}");
        }
    }
    stem
}
