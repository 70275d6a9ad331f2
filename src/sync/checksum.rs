//! Streaming content checksums

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::error::Result;
use crate::types::CHECKSUM_PREFIX;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// SHA-256 of a file as `sha256:<hex>`, reading it once in fixed-size blocks
pub async fn file_checksum(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{}{}", CHECKSUM_PREFIX, hex::encode(hasher.finalize())))
}

/// SHA-256 of an in-memory buffer as `sha256:<hex>`
pub fn bytes_checksum(data: &[u8]) -> String {
    format!("{}{}", CHECKSUM_PREFIX, hex::encode(Sha256::digest(data)))
}
