use crate::connection::VuId;
use crate::transfer::paths;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Upload,
    Download,
}

impl TransferDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferDirection::Upload => "upload",
            TransferDirection::Download => "download",
        }
    }
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One whole-file copy between a local directory and a remote directory.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub vu: VuId,
    pub direction: TransferDirection,
    pub local_dir: PathBuf,
    pub remote_dir: String,
    pub filename: String,
}

impl TransferRequest {
    pub fn upload(
        vu: VuId,
        local_dir: impl Into<PathBuf>,
        filename: impl Into<String>,
        remote_dir: impl Into<String>,
    ) -> Self {
        Self {
            vu,
            direction: TransferDirection::Upload,
            local_dir: local_dir.into(),
            remote_dir: remote_dir.into(),
            filename: filename.into(),
        }
    }

    pub fn download(
        vu: VuId,
        remote_dir: impl Into<String>,
        filename: impl Into<String>,
        local_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            vu,
            direction: TransferDirection::Download,
            local_dir: local_dir.into(),
            remote_dir: remote_dir.into(),
            filename: filename.into(),
        }
    }

    pub fn local_path(&self) -> PathBuf {
        paths::join_local(&self.local_dir, &self.filename)
    }

    pub fn remote_path(&self) -> String {
        paths::join_remote(&self.remote_dir, &self.filename)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferOutcome {
    pub vu: VuId,
    pub direction: TransferDirection,
    pub local_path: PathBuf,
    pub remote_path: String,
    pub bytes: u64,
    pub elapsed: Duration,
    /// blake3 digest of the bytes moved, hex encoded.
    pub checksum: String,
}
