use crate::config::TransferConfig;
use crate::connection::{RemoteFs, VuId};
use crate::metrics::TransferMetrics;
use crate::registry::SessionRegistry;
use crate::transfer::error::{TransferError, TransferResult};
use crate::transfer::paths;
use crate::transfer::types::{TransferDirection, TransferOutcome, TransferRequest};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Streams whole files between local disk and a VU's session.
pub struct TransferEngine {
    registry: Arc<SessionRegistry>,
    config: TransferConfig,
}

impl TransferEngine {
    pub fn new(registry: Arc<SessionRegistry>, config: TransferConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn upload(
        &self,
        vu: VuId,
        local_dir: impl Into<PathBuf>,
        filename: &str,
        remote_dir: &str,
    ) -> TransferResult<TransferOutcome> {
        self.execute(&TransferRequest::upload(vu, local_dir, filename, remote_dir))
    }

    pub fn download(
        &self,
        vu: VuId,
        remote_dir: &str,
        filename: &str,
        local_dir: impl Into<PathBuf>,
    ) -> TransferResult<TransferOutcome> {
        self.execute(&TransferRequest::download(vu, remote_dir, filename, local_dir))
    }

    pub fn execute(&self, request: &TransferRequest) -> TransferResult<TransferOutcome> {
        let mut metrics = TransferMetrics::start(request.direction.as_str());
        match self.run(request, &mut metrics) {
            Ok((local_path, remote_path, checksum)) => {
                let bytes = metrics.bytes();
                let elapsed = metrics.complete();
                debug!(
                    vu = %request.vu,
                    direction = %request.direction,
                    bytes,
                    ?elapsed,
                    "Transfer finished"
                );
                Ok(TransferOutcome {
                    vu: request.vu,
                    direction: request.direction,
                    local_path,
                    remote_path,
                    bytes,
                    elapsed,
                    checksum,
                })
            }
            Err(e) => {
                metrics.fail(e.reason());
                Err(e)
            }
        }
    }

    fn run(
        &self,
        request: &TransferRequest,
        metrics: &mut TransferMetrics,
    ) -> TransferResult<(PathBuf, String, String)> {
        // Lookup first: an unknown VU never touches the local filesystem.
        let handle = self.registry.get(request.vu)?;

        paths::validate_filename(&request.filename)?;
        let local_path = request.local_path();
        if let Some(root) = &self.config.local_root {
            paths::ensure_within(&local_path, root)?;
        }
        let remote_path = request.remote_path();

        debug!(
            vu = %request.vu,
            direction = %request.direction,
            local = %local_path.display(),
            remote = %remote_path,
            "Transfer starting"
        );

        let checksum = handle
            .with_remote(|remote| match request.direction {
                TransferDirection::Upload => {
                    self.upload_with(remote, &local_path, &remote_path, metrics)
                }
                TransferDirection::Download => {
                    self.download_with(remote, &remote_path, &local_path, metrics)
                }
            })
            .ok_or(TransferError::SessionClosed(request.vu))??;

        match request.direction {
            TransferDirection::Upload => handle.record_upload(metrics.bytes()),
            TransferDirection::Download => handle.record_download(metrics.bytes()),
        }

        Ok((local_path, remote_path, checksum))
    }

    fn upload_with(
        &self,
        remote: &mut dyn RemoteFs,
        local_path: &Path,
        remote_path: &str,
        metrics: &mut TransferMetrics,
    ) -> TransferResult<String> {
        let mut source = File::open(local_path).map_err(|source| TransferError::LocalFile {
            path: local_path.to_path_buf(),
            source,
        })?;
        let mut sink = remote
            .create(remote_path)
            .map_err(|e| remote_error(remote_path, e))?;

        let checksum = self.pump(&mut source, &mut sink, TransferDirection::Upload, metrics)?;
        sink.finish().map_err(|source| TransferError::Stream {
            direction: TransferDirection::Upload,
            bytes: metrics.bytes(),
            source,
        })?;
        Ok(checksum)
    }

    fn download_with(
        &self,
        remote: &mut dyn RemoteFs,
        remote_path: &str,
        local_path: &Path,
        metrics: &mut TransferMetrics,
    ) -> TransferResult<String> {
        // Remote first so a missing remote file leaves the local one intact.
        let mut source = remote
            .open(remote_path)
            .map_err(|e| remote_error(remote_path, e))?;
        let mut sink = File::create(local_path).map_err(|source| TransferError::LocalFile {
            path: local_path.to_path_buf(),
            source,
        })?;

        let checksum = self.pump(&mut source, &mut sink, TransferDirection::Download, metrics)?;
        sink.flush().map_err(|source| TransferError::Stream {
            direction: TransferDirection::Download,
            bytes: metrics.bytes(),
            source,
        })?;
        Ok(checksum)
    }

    /// Copy until EOF, hashing as we go. Returns the hex blake3 digest.
    fn pump<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        direction: TransferDirection,
        metrics: &mut TransferMetrics,
    ) -> TransferResult<String>
    where
        R: Read + ?Sized,
        W: Write + ?Sized,
    {
        let mut buffer = vec![0u8; self.config.buffer_size.max(1)];
        let mut hasher = blake3::Hasher::new();

        loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(TransferError::Stream {
                        direction,
                        bytes: metrics.bytes(),
                        source,
                    })
                }
            };
            writer
                .write_all(&buffer[..read])
                .map_err(|source| TransferError::Stream {
                    direction,
                    bytes: metrics.bytes(),
                    source,
                })?;
            hasher.update(&buffer[..read]);
            metrics.add_bytes(read as u64);
        }

        Ok(hasher.finalize().to_hex().to_string())
    }
}

fn remote_error(path: &str, source: io::Error) -> TransferError {
    if source.kind() == io::ErrorKind::PermissionDenied {
        return TransferError::PermissionDenied {
            path: path.to_string(),
        };
    }
    TransferError::RemoteFile {
        path: path.to_string(),
        source,
    }
}
