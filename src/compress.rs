//! Gzip codec for compressed document payloads

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

/// Codec failure
#[derive(Debug)]
pub enum CompressionError {
  Io(std::io::Error),
  TaskFailed(String),
}

impl std::fmt::Display for CompressionError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      CompressionError::Io(e) => write!(f, "compression IO error: {}", e),
      CompressionError::TaskFailed(msg) => write!(f, "compression task failed: {}", msg),
    }
  }
}

impl std::error::Error for CompressionError {}

/// Gzip-compress a payload on the blocking pool.
pub async fn compress(bytes: Vec<u8>) -> Result<Vec<u8>, CompressionError> {
  tokio::task::spawn_blocking(move || {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&bytes).map_err(CompressionError::Io)?;
    encoder.finish().map_err(CompressionError::Io)
  })
  .await
  .map_err(|e| CompressionError::TaskFailed(e.to_string()))?
}

/// Gzip-decompress a payload on the blocking pool.
pub async fn decompress(bytes: Vec<u8>) -> Result<Vec<u8>, CompressionError> {
  tokio::task::spawn_blocking(move || {
    let mut decoder = GzDecoder::new(bytes.as_slice());
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(CompressionError::Io)?;
    Ok(out)
  })
  .await
  .map_err(|e| CompressionError::TaskFailed(e.to_string()))?
}
