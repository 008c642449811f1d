// pgvault/src/backup/verification.rs
use flate2::read::MultiGzDecoder;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::commands::decrypt_command;
use super::{COMPRESSED_SUFFIX, ENCRYPTED_SUFFIX};
use crate::config::Secret;
use crate::errors::{BackupError, Result};
use crate::utils::checksum::calculate_checksum;
use crate::utils::command::CommandRunner;

#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub file: PathBuf,
    pub valid: bool,
    pub checksum: Option<String>,
    pub error: Option<String>,
}

/// Checks that a backup can be decrypted and decompressed without restoring it.
pub struct IntegrityVerifier {
    runner: Arc<dyn CommandRunner>,
    encryption_key: Option<Secret>,
}

impl IntegrityVerifier {
    pub fn new(runner: Arc<dyn CommandRunner>, encryption_key: Option<Secret>) -> Self {
        Self {
            runner,
            encryption_key,
        }
    }

    pub async fn verify(&self, path: &Path) -> VerificationReport {
        info!("🔍 Verifying backup: {}", path.display());
        match self.check_structure(path).await {
            Ok(()) => {
                let checksum = calculate_checksum(path).await;
                info!("✅ Backup verification passed: {}", path.display());
                VerificationReport {
                    file: path.to_path_buf(),
                    valid: true,
                    checksum,
                    error: None,
                }
            }
            Err(e) => {
                error!("❌ Backup verification failed for {}: {}", path.display(), e);
                VerificationReport {
                    file: path.to_path_buf(),
                    valid: false,
                    checksum: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn check_structure(&self, path: &Path) -> Result<()> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|_| BackupError::NotFound(path.display().to_string()))?;
        if metadata.len() == 0 {
            return Err(BackupError::Verification("backup file is empty".to_string()));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        match name.strip_suffix(ENCRYPTED_SUFFIX) {
            Some(inner) => self.check_encrypted(path, inner).await,
            None if name.ends_with(COMPRESSED_SUFFIX) => gzip_test(path).await,
            None => Ok(()),
        }
    }

    /// Decrypts into a scratch directory that is removed on return.
    async fn check_encrypted(&self, path: &Path, inner_name: &str) -> Result<()> {
        let Some(key) = self.encryption_key.as_ref().map(Secret::expose).filter(|k| !k.is_empty()) else {
            warn!(
                "⚠️  No encryption key configured; skipping decryption test for {}",
                path.display()
            );
            return Ok(());
        };

        let scratch = tempfile::tempdir()?;
        let plaintext = scratch.path().join(inner_name);
        self.runner
            .run(&decrypt_command(path, &plaintext, key))
            .await
            .map_err(|e| BackupError::Verification(format!("decryption test failed: {e}")))?;

        if inner_name.ends_with(COMPRESSED_SUFFIX) {
            gzip_test(&plaintext).await?;
        }
        Ok(())
    }
}

/// Streams the whole file through a gzip decoder into a sink.
async fn gzip_test(path: &Path) -> Result<()> {
    let path = path.to_path_buf();
    let decoded = tokio::task::spawn_blocking(move || -> io::Result<u64> {
        let mut decoder = MultiGzDecoder::new(BufReader::new(File::open(&path)?));
        io::copy(&mut decoder, &mut io::sink())
    })
    .await
    .map_err(io::Error::other)?;

    decoded
        .map(|_| ())
        .map_err(|e| BackupError::Verification(format!("decompression test failed: {e}")))
}
