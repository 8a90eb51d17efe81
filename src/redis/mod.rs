//! Backend client facade over Redis

mod client;

pub use client::RedisConnection;

use async_trait::async_trait;
use std::collections::HashMap;

/// Result type for backend operations
pub type RedisResult<T> = Result<T, RedisClientError>;

/// Backend operation error
#[derive(Debug)]
pub enum RedisClientError {
  /// The backend does not have the requested script cached (NOSCRIPT)
  ScriptMissing,
  /// Driver-level failure
  Command(redis::RedisError),
  /// A reply that does not match the expected shape
  Unexpected(String),
}

impl std::fmt::Display for RedisClientError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      RedisClientError::ScriptMissing => write!(f, "script not cached on backend (NOSCRIPT)"),
      RedisClientError::Command(e) => write!(f, "redis command failed: {}", e),
      RedisClientError::Unexpected(msg) => write!(f, "unexpected redis reply: {}", msg),
    }
  }
}

impl std::error::Error for RedisClientError {}

impl From<redis::RedisError> for RedisClientError {
  fn from(e: redis::RedisError) -> Self {
    if e.code() == Some("NOSCRIPT") {
      RedisClientError::ScriptMissing
    } else {
      RedisClientError::Command(e)
    }
  }
}

impl RedisClientError {
  pub fn is_script_missing(&self) -> bool {
    matches!(self, RedisClientError::ScriptMissing)
  }
}

/// The five backend capabilities the storage engine consumes.
///
/// `eval_script` must be atomic with respect to other operations on the
/// same backend; everything else is plain request/response. Keys and
/// arguments are Latin-1 strings (see the `path` module) and reach the wire
/// as their raw octets.
#[async_trait]
pub trait RedisBackend: Send + Sync {
  /// Invoke a preloaded script by content hash.
  async fn eval_script(
    &self,
    sha: &str,
    keys: &[String],
    args: &[String],
  ) -> RedisResult<redis::Value>;

  /// Register a script source; returns the backend's content hash.
  async fn load_script(&self, source: &str) -> RedisResult<String>;

  /// Whether the backend has a script cached under the given hash.
  async fn script_exists(&self, sha: &str) -> RedisResult<bool>;

  /// The `memory` section of the backend's INFO output.
  async fn info_memory(&self) -> RedisResult<HashMap<String, String>>;

  /// Count ordered-set members with scores within `[min, max]`.
  async fn zcount(&self, key: &str, min: i64, max: i64) -> RedisResult<i64>;
}
