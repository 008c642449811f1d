use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::warn;

const CHUNK_SIZE: usize = 64 * 1024;

/// SHA-256 digest of a file, hex encoded.
pub async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Lenient variant used for backup records: an unreadable file yields `None`
/// instead of failing the surrounding operation.
pub async fn calculate_checksum(path: &Path) -> Option<String> {
    match sha256_file(path).await {
        Ok(digest) => Some(digest),
        Err(e) => {
            warn!("Could not calculate checksum for {}: {}", path.display(), e);
            None
        }
    }
}
