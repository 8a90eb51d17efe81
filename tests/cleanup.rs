//! Cleanup sweep and memory monitor tests

mod common;

use std::sync::Arc;

use acornstore::storage::{
  calculate_current_memory_usage, RedisResourceStorage, CLEANUP_BULK_SIZE, MAX_EXPIRE_IN_MILLIS,
};
use acornstore::{Resource, StorageConfig};
use common::{count_reply, MockRedisBackend};

fn storage_with(backend: Arc<MockRedisBackend>) -> RedisResourceStorage {
  RedisResourceStorage::new(backend, StorageConfig::default())
}

async fn cleanup_body(resource: Resource) -> serde_json::Value {
  match resource {
    Resource::Document(doc) => {
      let body = doc.stream.unwrap().read_to_end().await;
      serde_json::from_slice(&body).unwrap()
    }
    other => panic!("expected document, got {:?}", other),
  }
}

// =============================================================================
// Cleanup Tests
// =============================================================================

#[tokio::test]
async fn test_cleanup_argument_contract() {
  let backend = Arc::new(MockRedisBackend::new());
  backend.queue(count_reply(0));
  let storage = storage_with(backend.clone());

  storage.cleanup(None).await;

  let call = backend.last_call();
  assert!(call.keys.is_empty());
  assert_eq!(call.args.len(), 11);
  assert_eq!(call.args[0], "acorn:storage:resources");
  assert_eq!(call.args[1], "acorn:storage:collections");
  assert_eq!(call.args[2], "acorn:storage:delta:resources");
  assert_eq!(call.args[3], "acorn:storage:delta:etags");
  assert_eq!(call.args[4], "acorn:storage:expirable");
  assert_eq!(call.args[5], "0");
  assert_eq!(call.args[6], MAX_EXPIRE_IN_MILLIS);
  assert_eq!(call.args[7], "false");
  assert_eq!(call.args[8], "true");
  assert_eq!(call.args[10], CLEANUP_BULK_SIZE.to_string());
}

#[tokio::test]
async fn test_cleanup_loops_until_empty_bulk() {
  let backend = Arc::new(MockRedisBackend::new());
  backend.queue(count_reply(200));
  backend.queue(count_reply(200));
  backend.queue(count_reply(37));
  backend.queue(count_reply(0));
  backend.set_zcount(0);
  let storage = storage_with(backend.clone());

  let body = cleanup_body(storage.cleanup(None).await).await;
  assert_eq!(body["cleanedResources"], 437);
  assert_eq!(body["expiredResourcesLeft"], 0);
  assert_eq!(backend.eval_call_count(), 4);
}

#[tokio::test]
async fn test_cleanup_stops_at_quota() {
  let backend = Arc::new(MockRedisBackend::new());
  backend.queue(count_reply(200));
  backend.queue(count_reply(200));
  backend.set_zcount(12);
  let storage = storage_with(backend.clone());

  let body = cleanup_body(storage.cleanup(Some("400")).await).await;
  assert_eq!(body["cleanedResources"], 400);
  assert_eq!(body["expiredResourcesLeft"], 12);
  assert_eq!(backend.eval_call_count(), 2);
}

#[tokio::test]
async fn test_cleanup_unparseable_override_falls_back_to_config() {
  let backend = Arc::new(MockRedisBackend::new());
  backend.queue(count_reply(150));
  backend.queue(count_reply(0));
  let storage = RedisResourceStorage::new(
    backend.clone(),
    StorageConfig {
      resource_cleanup_amount: 100,
      ..StorageConfig::default()
    },
  );

  // falls back to the configured quota of 100, already exceeded by bulk 1
  let body = cleanup_body(storage.cleanup(Some("not-a-number")).await).await;
  assert_eq!(body["cleanedResources"], 150);
  assert_eq!(backend.eval_call_count(), 1);
}

#[tokio::test]
async fn test_cleanup_missing_script_reloads_and_defers() {
  let backend = Arc::new(MockRedisBackend::new());
  backend.queue_script_missing();
  backend.set_script_cached(false);
  let storage = storage_with(backend.clone());

  match storage.cleanup(None).await {
    Resource::Error(msg) => assert!(msg.contains("next run")),
    other => panic!("expected error, got {:?}", other),
  }
  // the sweep stopped after the single failing call and reloaded the script
  assert_eq!(backend.eval_call_count(), 1);
  assert!(!backend.loaded_sources.lock().is_empty());
}

// =============================================================================
// Memory Monitor Tests
// =============================================================================

#[tokio::test]
async fn test_memory_usage_calculation() {
  let backend = MockRedisBackend::new();
  backend.set_info(&[
    ("used_memory", "536870912"),
    ("total_system_memory", "1073741824"),
  ]);
  let usage = calculate_current_memory_usage(&backend).await.unwrap();
  assert!((usage - 50.0).abs() < 0.01);
}

#[tokio::test]
async fn test_memory_usage_clamped_to_hundred() {
  let backend = MockRedisBackend::new();
  backend.set_info(&[("used_memory", "2000"), ("total_system_memory", "1000")]);
  let usage = calculate_current_memory_usage(&backend).await.unwrap();
  assert_eq!(usage, 100.0);
}

#[tokio::test]
async fn test_memory_usage_missing_section() {
  let backend = MockRedisBackend::new();
  assert!(calculate_current_memory_usage(&backend).await.is_none());
}

#[tokio::test]
async fn test_memory_usage_zero_total() {
  let backend = MockRedisBackend::new();
  backend.set_info(&[("used_memory", "100"), ("total_system_memory", "0")]);
  assert!(calculate_current_memory_usage(&backend).await.is_none());
}

#[tokio::test]
async fn test_memory_usage_unparseable_property() {
  let backend = MockRedisBackend::new();
  backend.set_info(&[
    ("used_memory", "garbage"),
    ("total_system_memory", "1000"),
  ]);
  assert!(calculate_current_memory_usage(&backend).await.is_none());
}
