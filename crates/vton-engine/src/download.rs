use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use vton_contracts::jobs::{ArtifactRef, PersistedArtifact, ResultArtifact};

use crate::error::DownloadError;
use crate::transport::{HttpRequest, Transport};

/// Materializes an artifact reference at a destination path.
///
/// Bytes go to a temp file in the destination directory first and are
/// renamed into place, so a failed download never leaves a partial file
/// (or clobbers an existing one).
pub struct ResultDownloader {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl ResultDownloader {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn persist(
        &self,
        artifact: &ArtifactRef,
        destination: &Path,
    ) -> Result<PersistedArtifact, DownloadError> {
        let bytes = match artifact {
            ArtifactRef::Url { url } => self.fetch(url)?,
            ArtifactRef::Inline { data, .. } => decode_inline(data)?,
        };
        write_atomic(destination, &bytes)?;
        Ok(PersistedArtifact {
            path: destination.to_path_buf(),
            bytes: bytes.len() as u64,
            sha256: hex::encode(Sha256::digest(&bytes)),
            format: image::guess_format(&bytes)
                .ok()
                .and_then(|format| format.extensions_str().first())
                .map(|ext| ext.to_string()),
        })
    }

    /// Persists `artifact` once; a second call is refused.
    pub fn persist_result(
        &self,
        artifact: &mut ResultArtifact,
        destination: &Path,
    ) -> Result<PersistedArtifact, DownloadError> {
        if let Some(existing) = artifact.persisted() {
            return Err(DownloadError::AlreadyPersisted {
                path: existing.path.clone(),
            });
        }
        let persisted = self.persist(&artifact.source, destination)?;
        artifact
            .record_persisted(persisted.clone())
            .map_err(|_| DownloadError::AlreadyPersisted {
                path: destination.to_path_buf(),
            })?;
        Ok(persisted)
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let reply = self
            .transport
            .send(HttpRequest::get(url, self.timeout).header("Accept", "*/*"))?;
        if !reply.is_success() {
            return Err(DownloadError::Failed {
                status: reply.status,
                url: url.to_string(),
            });
        }
        Ok(reply.body)
    }
}

pub fn decode_inline(data: &str) -> Result<Vec<u8>, DownloadError> {
    let compact: String = data.chars().filter(|ch| !ch.is_whitespace()).collect();
    let bytes = BASE64_STANDARD
        .decode(compact.as_bytes())
        .map_err(|err| DownloadError::DecodeFailed(err.to_string()))?;
    if bytes.is_empty() {
        return Err(DownloadError::DecodeFailed("payload is empty".to_string()));
    }
    Ok(bytes)
}

pub fn write_atomic(destination: &Path, bytes: &[u8]) -> Result<(), DownloadError> {
    let io_err = |source: std::io::Error| DownloadError::Io {
        path: destination.to_path_buf(),
        source,
    };
    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(io_err)?;
    let mut staged = NamedTempFile::new_in(&parent).map_err(io_err)?;
    staged.write_all(bytes).map_err(io_err)?;
    staged.as_file().sync_all().map_err(io_err)?;
    staged
        .persist(destination)
        .map_err(|err| io_err(err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use sha2::{Digest, Sha256};
    use vton_contracts::jobs::{ArtifactRef, ResultArtifact};

    use super::ResultDownloader;
    use crate::error::DownloadError;
    use crate::transport::testing::ScriptedTransport;

    const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDRpayload";

    #[test]
    fn url_bytes_are_written_unchanged() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let dest = temp.path().join("out").join("result.png");
        let transport = Arc::new(ScriptedTransport::new());
        transport.bytes(200, PNG_BYTES);
        let downloader = ResultDownloader::new(transport.clone(), Duration::from_secs(5));
        let persisted = downloader.persist(
            &ArtifactRef::Url {
                url: "http://x/r.png".to_string(),
            },
            &dest,
        )?;

        assert_eq!(std::fs::read(&dest)?, PNG_BYTES);
        assert_eq!(persisted.bytes, PNG_BYTES.len() as u64);
        assert_eq!(persisted.sha256, hex::encode(Sha256::digest(PNG_BYTES)));
        assert_eq!(persisted.format.as_deref(), Some("png"));
        assert_eq!(transport.requests()[0].timeout, Duration::from_secs(5));
        Ok(())
    }

    #[test]
    fn inline_payload_is_decoded() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let dest = temp.path().join("inline.bin");
        let transport = Arc::new(ScriptedTransport::new());
        let downloader = ResultDownloader::new(transport.clone(), Duration::from_secs(5));
        let persisted = downloader.persist(
            &ArtifactRef::Inline {
                data: "aGVsbG8g\nd29ybGQ=".to_string(),
                mime: None,
            },
            &dest,
        )?;
        assert_eq!(std::fs::read(&dest)?, b"hello world");
        assert_eq!(persisted.format, None);
        assert!(transport.requests().is_empty());
        Ok(())
    }

    #[test]
    fn failed_download_leaves_existing_file_untouched() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let dest = temp.path().join("result.png");
        std::fs::write(&dest, b"previous")?;
        let transport = Arc::new(ScriptedTransport::new());
        transport.bytes(404, b"not found");
        let downloader = ResultDownloader::new(transport, Duration::from_secs(5));
        let err = downloader
            .persist(
                &ArtifactRef::Url {
                    url: "http://x/missing.png".to_string(),
                },
                &dest,
            )
            .unwrap_err();
        assert!(matches!(err, DownloadError::Failed { status: 404, .. }));
        assert_eq!(std::fs::read(&dest)?, b"previous");
        assert_eq!(std::fs::read_dir(temp.path())?.count(), 1);
        Ok(())
    }

    #[test]
    fn undecodable_inline_payload_writes_nothing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let dest = temp.path().join("result.png");
        let downloader =
            ResultDownloader::new(Arc::new(ScriptedTransport::new()), Duration::from_secs(5));
        let err = downloader
            .persist(
                &ArtifactRef::Inline {
                    data: "not base64!!".to_string(),
                    mime: None,
                },
                &dest,
            )
            .unwrap_err();
        assert!(matches!(err, DownloadError::DecodeFailed(_)));
        assert!(!dest.exists());
        Ok(())
    }

    #[test]
    fn result_is_persisted_once() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let dest = temp.path().join("once.png");
        let transport = Arc::new(ScriptedTransport::new());
        transport.bytes(200, PNG_BYTES).bytes(200, b"second");
        let downloader = ResultDownloader::new(transport.clone(), Duration::from_secs(5));
        let mut artifact = ResultArtifact::new(ArtifactRef::Url {
            url: "http://x/r.png".to_string(),
        });
        downloader.persist_result(&mut artifact, &dest)?;
        let again = downloader.persist_result(&mut artifact, &temp.path().join("twice.png"));
        assert!(matches!(again, Err(DownloadError::AlreadyPersisted { .. })));
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(artifact.persisted().map(|row| row.path.clone()), Some(dest));
        Ok(())
    }
}
