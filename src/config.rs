//! Storage configuration

use serde::{Deserialize, Serialize};

/// Storage engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
  /// Redis host
  #[serde(default = "default_redis_host")]
  pub redis_host: String,

  /// Redis port
  #[serde(default = "default_redis_port")]
  pub redis_port: u16,

  /// Redis password (optional)
  #[serde(default)]
  pub redis_auth: Option<String>,

  /// Key prefix for document bodies
  #[serde(default = "default_resources_prefix")]
  pub resources_prefix: String,

  /// Key prefix for collection membership sets
  #[serde(default = "default_collections_prefix")]
  pub collections_prefix: String,

  /// Key prefix for the delta resource index
  #[serde(default = "default_delta_resources_prefix")]
  pub delta_resources_prefix: String,

  /// Key prefix for the delta etag index
  #[serde(default = "default_delta_etags_prefix")]
  pub delta_etags_prefix: String,

  /// Key of the expirable index (ordered set driving cleanup)
  #[serde(default = "default_expirable_prefix")]
  pub expirable_prefix: String,

  /// Key prefix for lock entries
  #[serde(default = "default_lock_prefix")]
  pub lock_prefix: String,

  /// Default maximum number of resources removed by one cleanup run
  #[serde(default = "default_resource_cleanup_amount")]
  pub resource_cleanup_amount: u64,

  /// Reject writes when Redis memory usage is high; enables the memory
  /// monitor
  #[serde(default)]
  pub reject_storage_write_on_low_memory: bool,

  /// Interval between memory usage samples in milliseconds
  #[serde(default = "default_free_memory_check_interval_ms")]
  pub free_memory_check_interval_ms: u64,
}

fn default_redis_host() -> String {
  "localhost".to_string()
}

fn default_redis_port() -> u16 {
  6379
}

fn default_resources_prefix() -> String {
  "acorn:storage:resources".to_string()
}

fn default_collections_prefix() -> String {
  "acorn:storage:collections".to_string()
}

fn default_delta_resources_prefix() -> String {
  "acorn:storage:delta:resources".to_string()
}

fn default_delta_etags_prefix() -> String {
  "acorn:storage:delta:etags".to_string()
}

fn default_expirable_prefix() -> String {
  "acorn:storage:expirable".to_string()
}

fn default_lock_prefix() -> String {
  "acorn:storage:locks".to_string()
}

fn default_resource_cleanup_amount() -> u64 {
  100_000
}

fn default_free_memory_check_interval_ms() -> u64 {
  60_000
}

impl Default for StorageConfig {
  fn default() -> Self {
    Self {
      redis_host: default_redis_host(),
      redis_port: default_redis_port(),
      redis_auth: None,
      resources_prefix: default_resources_prefix(),
      collections_prefix: default_collections_prefix(),
      delta_resources_prefix: default_delta_resources_prefix(),
      delta_etags_prefix: default_delta_etags_prefix(),
      expirable_prefix: default_expirable_prefix(),
      lock_prefix: default_lock_prefix(),
      resource_cleanup_amount: default_resource_cleanup_amount(),
      reject_storage_write_on_low_memory: false,
      free_memory_check_interval_ms: default_free_memory_check_interval_ms(),
    }
  }
}

impl StorageConfig {
  /// Generate the Redis connection URL.
  pub fn connection_url(&self) -> String {
    let auth = match &self.redis_auth {
      Some(pwd) if !pwd.is_empty() => format!(":{}@", pwd),
      _ => String::new(),
    };
    format!("redis://{}{}:{}/", auth, self.redis_host, self.redis_port)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_config_defaults() {
    let config = StorageConfig::default();
    assert_eq!(config.redis_host, "localhost");
    assert_eq!(config.redis_port, 6379);
    assert_eq!(config.resources_prefix, "acorn:storage:resources");
    assert_eq!(config.expirable_prefix, "acorn:storage:expirable");
    assert_eq!(config.resource_cleanup_amount, 100_000);
    assert!(!config.reject_storage_write_on_low_memory);
    assert_eq!(config.free_memory_check_interval_ms, 60_000);
  }

  #[test]
  fn test_connection_url() {
    let config = StorageConfig::default();
    assert_eq!(config.connection_url(), "redis://localhost:6379/");

    let config = StorageConfig {
      redis_auth: Some("sekret".into()),
      redis_port: 6380,
      ..StorageConfig::default()
    };
    assert_eq!(config.connection_url(), "redis://:sekret@localhost:6380/");
  }

  #[test]
  fn test_config_deserialize_partial() {
    let config: StorageConfig = serde_json::from_str(r#"{"redis_port": 7000}"#).unwrap();
    assert_eq!(config.redis_port, 7000);
    assert_eq!(config.redis_host, "localhost");
    assert_eq!(config.lock_prefix, "acorn:storage:locks");
  }
}
