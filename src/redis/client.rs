//! Redis client over a managed connection

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use std::collections::HashMap;

use super::{RedisBackend, RedisResult};
use crate::config::StorageConfig;
use crate::path::decode_binary;

/// Backend client wrapping a reconnecting Redis connection.
pub struct RedisConnection {
  connection: ConnectionManager,
}

impl RedisConnection {
  /// Connect using the configured endpoint.
  pub async fn new(config: &StorageConfig) -> Result<Self, redis::RedisError> {
    let client = Client::open(config.connection_url())?;
    let connection = ConnectionManager::new(client).await?;
    Ok(Self { connection })
  }

  /// Test the connection to Redis.
  pub async fn test_connection(&self) -> Result<(), redis::RedisError> {
    let mut conn = self.connection.clone();
    redis::cmd("PING").query_async::<()>(&mut conn).await?;
    Ok(())
  }
}

#[async_trait]
impl RedisBackend for RedisConnection {
  async fn eval_script(
    &self,
    sha: &str,
    keys: &[String],
    args: &[String],
  ) -> RedisResult<redis::Value> {
    let mut conn = self.connection.clone();
    let mut cmd = redis::cmd("EVALSHA");
    cmd.arg(sha).arg(keys.len());
    // Keys and args travel as their Latin-1 octets so binary payloads and
    // escaped path characters hit the wire unchanged.
    for key in keys {
      cmd.arg(decode_binary(key));
    }
    for arg in args {
      cmd.arg(decode_binary(arg));
    }
    let value = cmd.query_async(&mut conn).await?;
    Ok(value)
  }

  async fn load_script(&self, source: &str) -> RedisResult<String> {
    let mut conn = self.connection.clone();
    let sha: String = redis::cmd("SCRIPT")
      .arg("LOAD")
      .arg(source)
      .query_async(&mut conn)
      .await?;
    Ok(sha)
  }

  async fn script_exists(&self, sha: &str) -> RedisResult<bool> {
    let mut conn = self.connection.clone();
    let flags: Vec<i64> = redis::cmd("SCRIPT")
      .arg("EXISTS")
      .arg(sha)
      .query_async(&mut conn)
      .await?;
    Ok(flags.first().copied() == Some(1))
  }

  async fn info_memory(&self) -> RedisResult<HashMap<String, String>> {
    let mut conn = self.connection.clone();
    let info: String = redis::cmd("INFO")
      .arg("memory")
      .query_async(&mut conn)
      .await?;

    let mut section = HashMap::new();
    for line in info.lines() {
      if line.starts_with('#') {
        continue;
      }
      if let Some((key, value)) = line.split_once(':') {
        section.insert(key.trim().to_string(), value.trim().to_string());
      }
    }
    Ok(section)
  }

  async fn zcount(&self, key: &str, min: i64, max: i64) -> RedisResult<i64> {
    let mut conn = self.connection.clone();
    let count: i64 = redis::cmd("ZCOUNT")
      .arg(key)
      .arg(min)
      .arg(max)
      .query_async(&mut conn)
      .await?;
    Ok(count)
  }
}
