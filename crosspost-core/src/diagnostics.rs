use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use hex::encode as hex_encode;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{info, warn};

use crate::browser::SessionDriver;

/// Screenshot of the session at the point a step stopped, labelled with that step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticArtifact {
    pub step_name: String,
    pub image_bytes: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

/// JSON sidecar written next to a persisted artifact.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactRecord {
    pub step_name: String,
    pub captured_at: DateTime<Utc>,
    pub image_path: Option<PathBuf>,
    pub size_bytes: usize,
    pub sha256: Option<String>,
}

impl DiagnosticArtifact {
    /// Artifact for a step that had no session to photograph.
    pub fn empty(step_name: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            image_bytes: Vec::new(),
            captured_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.image_bytes.is_empty()
    }

    pub fn sha256(&self) -> Option<String> {
        if self.is_empty() {
            None
        } else {
            Some(hex_encode(Sha256::digest(&self.image_bytes)))
        }
    }

    pub fn record(&self, image_path: Option<&Path>) -> ArtifactRecord {
        ArtifactRecord {
            step_name: self.step_name.clone(),
            captured_at: self.captured_at,
            image_path: image_path.map(Path::to_path_buf),
            size_bytes: self.image_bytes.len(),
            sha256: self.sha256(),
        }
    }

    /// Writes the image (when there is one) to `path` and the record to
    /// `path` with a `.json` extension.
    pub async fn persist(&self, path: &Path) -> std::io::Result<ArtifactRecord> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let image_path = if self.is_empty() {
            // A screenshot left by an earlier run must not pass for this one.
            match fs::remove_file(path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
            None
        } else {
            fs::write(path, &self.image_bytes).await?;
            Some(path)
        };
        let record = self.record(image_path);
        let json = serde_json::to_vec_pretty(&record)?;
        fs::write(path.with_extension("json"), json).await?;
        info!(
            step = %self.step_name,
            path = %path.display(),
            bytes = record.size_bytes,
            "diagnostic artifact written"
        );
        Ok(record)
    }
}

/// Snapshots the session for `step_name`. Never fails: a broken capture yields an
/// artifact with empty image bytes.
pub async fn capture(session: &mut dyn SessionDriver, step_name: &str) -> DiagnosticArtifact {
    let image_bytes = session.screenshot().await;
    if image_bytes.is_empty() {
        warn!(step = step_name, "screenshot unavailable; recording empty artifact");
    }
    DiagnosticArtifact {
        step_name: step_name.to_string(),
        image_bytes,
        captured_at: Utc::now(),
    }
}
