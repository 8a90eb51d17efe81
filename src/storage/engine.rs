//! The five storage operations over scripted Redis

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use sha1::{Digest, Sha1};
use uuid::Uuid;

use super::memory::{self, MemoryUsageCell};
use crate::compress;
use crate::config::StorageConfig;
use crate::lock::LockMode;
use crate::path::{encode_binary, encode_path, escape_reserved, unescape_reserved};
use crate::redis::RedisBackend;
use crate::resource::{CollectionElement, CollectionResource, DocumentResource, Resource};
use crate::scripts::{ScriptKind, ScriptRegistry};
use crate::stream::ByteWriteSink;

/// Sentinel expiry meaning "never" (far in the year 2286).
pub const MAX_EXPIRE_IN_MILLIS: &str = "9999999999999";

/// How many expired documents one cleanup script call removes at most.
pub const CLEANUP_BULK_SIZE: u32 = 200;

fn now_ms() -> i64 {
  Utc::now().timestamp_millis()
}

fn sha1_hex(bytes: &[u8]) -> String {
  let mut hasher = Sha1::new();
  hasher.update(bytes);
  format!("{:x}", hasher.finalize())
}

/// Hierarchical resource storage over Redis.
///
/// Every operation runs as one atomic server-side script; this type
/// marshals arguments, keeps the scripts loaded and decodes replies into
/// [`Resource`] outcomes.
pub struct RedisResourceStorage {
  backend: Arc<dyn RedisBackend>,
  scripts: Arc<ScriptRegistry>,
  config: StorageConfig,
  current_memory_usage: MemoryUsageCell,
}

impl RedisResourceStorage {
  /// Build a storage engine on an existing backend.
  ///
  /// Must run inside the async runtime: the scripts are eagerly registered
  /// in the background (registration is lazily retried on first use
  /// anyway), and the memory monitor starts when configured.
  pub fn new(backend: Arc<dyn RedisBackend>, config: StorageConfig) -> Self {
    let scripts = Arc::new(ScriptRegistry::new());
    let current_memory_usage: MemoryUsageCell = Arc::new(RwLock::new(None));

    let preload_scripts = scripts.clone();
    let preload_backend = backend.clone();
    tokio::spawn(async move {
      preload_scripts.preload(preload_backend.as_ref()).await;
    });

    if config.reject_storage_write_on_low_memory {
      let monitor_backend = backend.clone();
      let cell = current_memory_usage.clone();
      let interval_ms = config.free_memory_check_interval_ms;
      tokio::spawn(async move {
        *cell.write() = memory::calculate_current_memory_usage(monitor_backend.as_ref()).await;
        memory::run_memory_usage_task(monitor_backend, cell, interval_ms).await;
      });
    }

    Self {
      backend,
      scripts,
      config,
      current_memory_usage,
    }
  }

  /// The most recent memory usage sample, as a percentage.
  pub fn current_memory_usage(&self) -> Option<f32> {
    *self.current_memory_usage.read()
  }

  /// Fetch the path's document or collection listing.
  ///
  /// `etag` short-circuits to [`Resource::NotModified`] on a match. A
  /// collection listing is paged by `offset`/`limit`; `offset=0, limit=-1`
  /// means "all, and report an empty collection as not found".
  pub async fn get(&self, path: &str, etag: &str, offset: i64, limit: i64) -> Resource {
    let key = encode_path(path);
    let args = vec![
      self.config.resources_prefix.clone(),
      self.config.collections_prefix.clone(),
      self.config.expirable_prefix.clone(),
      now_ms().to_string(),
      MAX_EXPIRE_IN_MILLIS.to_string(),
      offset.to_string(),
      limit.to_string(),
      etag.to_string(),
    ];

    let value = match self
      .scripts
      .execute(ScriptKind::Get, self.backend.as_ref(), &[key], &args)
      .await
    {
      Ok(value) => value,
      Err(e) => {
        tracing::error!("GET request failed: {}", e);
        return Resource::Error(format!("GET request failed: {}", e));
      }
    };

    let values = into_array(value);
    tracing::trace!("get result: {:?}", values);
    match first_string(&values).as_deref() {
      Some("notModified") => Resource::NotModified,
      Some("notFound") | None => Resource::NotFound,
      Some(_) => {
        self
          .decode_get_reply(values, offset == 0 && limit == -1)
          .await
      }
    }
  }

  async fn decode_get_reply(&self, values: Vec<redis::Value>, allow_empty_return: bool) -> Resource {
    match first_string(&values).as_deref() {
      Some("TYPE_RESOURCE") => {
        let content = match values.get(1).and_then(value_bytes) {
          Some(bytes) => bytes,
          None => return Resource::Error("resource reply carried no payload".to_string()),
        };
        let etag = values
          .get(2)
          .and_then(value_string)
          .unwrap_or_default();
        let compressed = values.get(3).map(is_present).unwrap_or(false);

        if compressed {
          match compress::decompress(content).await {
            Ok(decompressed) => Resource::Document(DocumentResource::with_content(decompressed, etag)),
            Err(e) => Resource::Error(format!("Error during decompression of resource: {}", e)),
          }
        } else {
          Resource::Document(DocumentResource::with_content(content, etag))
        }
      }
      Some("TYPE_COLLECTION") => {
        let mut items = Vec::new();
        for value in values.iter().skip(1) {
          let member = match value_string(value) {
            Some(member) => member,
            None => continue,
          };
          if let Some(name) = member.strip_suffix(':') {
            items.push(CollectionElement::Collection(name.to_string()));
          } else {
            items.push(CollectionElement::Document(member));
          }
        }
        if allow_empty_return && items.is_empty() {
          Resource::NotFound
        } else {
          Resource::Collection(CollectionResource::new(items))
        }
      }
      _ => Resource::NotFound,
    }
  }

  /// Fetch a set of named children of a collection in one round trip,
  /// synthesized into a single JSON document keyed by child name.
  pub async fn storage_expand(&self, path: &str, etag: &str, sub_resources: &[String]) -> Resource {
    let key = encode_path(path);
    let joined = sub_resources
      .iter()
      .map(|name| escape_reserved(name))
      .collect::<Vec<_>>()
      .join(";");
    let args = vec![
      self.config.resources_prefix.clone(),
      self.config.collections_prefix.clone(),
      self.config.expirable_prefix.clone(),
      now_ms().to_string(),
      MAX_EXPIRE_IN_MILLIS.to_string(),
      joined,
      sub_resources.len().to_string(),
    ];

    let value = match self
      .scripts
      .execute(ScriptKind::StorageExpand, self.backend.as_ref(), &[key], &args)
      .await
    {
      Ok(value) => value,
      Err(e) => {
        tracing::error!("StorageExpand request failed: {}", e);
        return Resource::Error(format!("StorageExpand request failed: {}", e));
      }
    };

    let reply = match scalar_string(&value) {
      Some(reply) => reply,
      None => return Resource::Error("unexpected storage expand reply shape".to_string()),
    };
    tracing::trace!("storage expand result: {}", reply);

    if reply.eq_ignore_ascii_case("compressionNotSupported") {
      return Resource::Invalid(
        "Collections having compressed resources are not supported in storage expand".to_string(),
      );
    }
    if reply.eq_ignore_ascii_case("notFound") {
      return Resource::NotFound;
    }

    let pairs: Vec<(String, String)> = match serde_json::from_str(&reply) {
      Ok(pairs) => pairs,
      Err(e) => return Resource::Error(format!("Error decoding storage expand reply: {}", e)),
    };

    let mut expanded = serde_json::Map::new();
    for (name, payload) in pairs {
      let sub_resource_name = unescape_reserved(&name);
      if payload.starts_with('[') && payload.ends_with(']') {
        expanded.insert(sub_resource_name, extract_sorted_collection_array(&payload));
      } else {
        match serde_json::from_str::<serde_json::Value>(&payload) {
          Ok(value @ serde_json::Value::Object(_)) => {
            expanded.insert(sub_resource_name, value);
          }
          _ => {
            return Resource::Invalid(format!(
              "Error decoding invalid json resource '{}'",
              sub_resource_name
            ));
          }
        }
      }
    }

    let content = serde_json::Value::Object(expanded).to_string().into_bytes();
    let digest = sha1_hex(&content);
    if digest == etag {
      Resource::NotModified
    } else {
      Resource::Document(DocumentResource::with_content(content, digest))
    }
  }

  /// Start a plain write: no lock, never-compressed.
  pub fn put(&self, path: &str, etag: &str, merge: bool, expire_seconds: i64) -> PutRequest {
    self.put_locked(path, etag, merge, expire_seconds, "", LockMode::Silent, 0, false)
  }

  /// Start a write with full lock and compression control.
  ///
  /// The returned [`PutRequest`] collects the payload; the script runs on
  /// [`PutRequest::end`]. An empty `etag` generates a fresh UUID.
  #[allow(clippy::too_many_arguments)]
  pub fn put_locked(
    &self,
    path: &str,
    etag: &str,
    merge: bool,
    expire_seconds: i64,
    lock_owner: &str,
    lock_mode: LockMode,
    lock_expire_seconds: i64,
    store_compressed: bool,
  ) -> PutRequest {
    let etag_value = if etag.is_empty() {
      Uuid::new_v4().to_string()
    } else {
      etag.to_string()
    };

    PutRequest {
      sink: ByteWriteSink::new(),
      backend: self.backend.clone(),
      scripts: self.scripts.clone(),
      config: self.config.clone(),
      key: encode_path(path),
      etag: etag_value,
      merge,
      expire_seconds,
      lock_owner: lock_owner.to_string(),
      lock_mode,
      lock_expire_seconds,
      store_compressed,
    }
  }

  /// Delete a document, or a collection subtree when `delete_recursive`.
  pub async fn delete(
    &self,
    path: &str,
    lock_owner: &str,
    lock_mode: LockMode,
    lock_expire_seconds: i64,
    confirm_collection_delete: bool,
    delete_recursive: bool,
  ) -> Resource {
    let key = encode_path(path);
    let now = now_ms();
    let lock_expire_at = now + lock_expire_seconds * 1000;
    let args = vec![
      self.config.resources_prefix.clone(),
      self.config.collections_prefix.clone(),
      self.config.delta_resources_prefix.clone(),
      self.config.delta_etags_prefix.clone(),
      self.config.expirable_prefix.clone(),
      now.to_string(),
      MAX_EXPIRE_IN_MILLIS.to_string(),
      bool_text(confirm_collection_delete),
      bool_text(delete_recursive),
      self.config.lock_prefix.clone(),
      lock_owner.to_string(),
      lock_mode.text().to_string(),
      lock_expire_at.to_string(),
    ];

    let value = match self
      .scripts
      .execute(ScriptKind::Delete, self.backend.as_ref(), &[key], &args)
      .await
    {
      Ok(value) => value,
      Err(e) => {
        tracing::error!("DELETE request failed: {}", e);
        return Resource::Error(format!("DELETE request failed: {}", e));
      }
    };

    let values = into_array(value);
    tracing::trace!("delete result: {:?}", values);
    match first_string(&values).as_deref() {
      Some("notEmpty") => Resource::NotEmpty,
      Some("notFound") => Resource::NotFound,
      Some(reply) if reply == LockMode::Reject.text() => Resource::Rejected,
      _ => Resource::Deleted,
    }
  }

  /// Sweep expired documents in bulks until none are left or the quota is
  /// reached; reports counts as a small JSON document.
  ///
  /// `amount` overrides the configured quota when it parses as a number.
  /// Each bulk is one atomic script call; the sweep as a whole is not
  /// atomic and interleaves with concurrent writes.
  pub async fn cleanup(&self, amount: Option<&str>) -> Resource {
    let max_delete = amount
      .and_then(|value| value.parse::<u64>().ok())
      .unwrap_or(self.config.resource_cleanup_amount);
    tracing::trace!("cleanup resources, amount: {}", max_delete);

    let mut cleaned: u64 = 0;
    loop {
      let args = vec![
        self.config.resources_prefix.clone(),
        self.config.collections_prefix.clone(),
        self.config.delta_resources_prefix.clone(),
        self.config.delta_etags_prefix.clone(),
        self.config.expirable_prefix.clone(),
        "0".to_string(),
        MAX_EXPIRE_IN_MILLIS.to_string(),
        "false".to_string(),
        "true".to_string(),
        now_ms().to_string(),
        CLEANUP_BULK_SIZE.to_string(),
      ];

      let value = match self
        .scripts
        .execute_once(ScriptKind::Cleanup, self.backend.as_ref(), &[], &args)
        .await
      {
        Ok(value) => value,
        Err(e) if e.is_script_missing() => {
          tracing::warn!("the cleanup script is not loaded; loading it for the next run");
          if let Err(load_err) = self.scripts.reload(ScriptKind::Cleanup, self.backend.as_ref()).await
          {
            tracing::error!("reloading the cleanup script failed: {}", load_err);
          }
          return Resource::Error("cleanup script was not loaded; retry on the next run".to_string());
        }
        Err(e) => {
          tracing::error!("CLEANUP request failed: {}", e);
          return Resource::Error(format!("CLEANUP request failed: {}", e));
        }
      };

      let cleaned_this_run = first_integer(&into_array(value)).unwrap_or(0) as u64;
      tracing::trace!("cleanup removed {} resources this bulk", cleaned_this_run);
      cleaned += cleaned_this_run;
      if cleaned_this_run == 0 || cleaned >= max_delete {
        break;
      }
    }

    let left = match self
      .backend
      .zcount(&self.config.expirable_prefix, 0, now_ms())
      .await
    {
      Ok(count) if count >= 0 => count,
      Ok(_) => 0,
      Err(e) => {
        tracing::warn!("zcount on the expirable set failed: {}", e);
        0
      }
    };

    let body = serde_json::json!({
      "cleanedResources": cleaned,
      "expiredResourcesLeft": left,
    });
    Resource::Document(DocumentResource::with_content(
      body.to_string().into_bytes(),
      String::new(),
    ))
  }
}

/// A pending write handed out by [`RedisResourceStorage::put`].
///
/// Collects payload bytes in memory; [`end`](Self::end) optionally
/// compresses them and runs the PUT script, resolving with the single
/// terminal outcome.
pub struct PutRequest {
  sink: ByteWriteSink,
  backend: Arc<dyn RedisBackend>,
  scripts: Arc<ScriptRegistry>,
  config: StorageConfig,
  key: String,
  etag: String,
  merge: bool,
  expire_seconds: i64,
  lock_owner: String,
  lock_mode: LockMode,
  lock_expire_seconds: i64,
  store_compressed: bool,
}

impl PutRequest {
  /// Append payload bytes.
  pub fn write(&mut self, data: &[u8]) {
    self.sink.write(data);
  }

  /// The etag the document will be stored under on success.
  pub fn etag(&self) -> &str {
    &self.etag
  }

  pub fn write_queue_full(&self) -> bool {
    self.sink.write_queue_full()
  }

  /// Finish the write: compress when requested, run the script, decode.
  pub async fn end(self) -> Resource {
    let now = now_ms();
    let expire_at = if self.expire_seconds > -1 {
      (now + self.expire_seconds * 1000).to_string()
    } else {
      MAX_EXPIRE_IN_MILLIS.to_string()
    };
    let lock_expire_at = (now + self.lock_expire_seconds * 1000).to_string();

    let content = self.sink.into_bytes();
    let length = content.len();
    let payload = if self.store_compressed {
      match compress::compress(content).await {
        Ok(compressed) => compressed,
        Err(e) => {
          tracing::error!("Error during compression of resource: {}", e);
          return Resource::Error("Error during compression of resource".to_string());
        }
      }
    } else {
      content
    };

    let args = vec![
      self.config.resources_prefix.clone(),
      self.config.collections_prefix.clone(),
      self.config.expirable_prefix.clone(),
      bool_text(self.merge),
      expire_at,
      MAX_EXPIRE_IN_MILLIS.to_string(),
      encode_binary(&payload),
      self.etag.clone(),
      self.config.lock_prefix.clone(),
      self.lock_owner.clone(),
      self.lock_mode.text().to_string(),
      lock_expire_at,
      if self.store_compressed { "1" } else { "0" }.to_string(),
    ];

    let value = match self
      .scripts
      .execute(ScriptKind::Put, self.backend.as_ref(), &[self.key.clone()], &args)
      .await
    {
      Ok(value) => value,
      Err(e) => {
        tracing::error!("PUT request failed: {}", e);
        return Resource::Error(format!("PUT request failed: {}", e));
      }
    };

    let values = into_array(value);
    tracing::trace!("put result: {:?}", values);
    let reply = first_string(&values).unwrap_or_default();
    if reply.starts_with("existingCollection") {
      Resource::Collection(CollectionResource::conflict())
    } else if reply.starts_with("existingResource") {
      Resource::Document(DocumentResource::shadowed())
    } else if reply == "notModified" {
      Resource::NotModified
    } else if reply == LockMode::Reject.text() {
      Resource::Rejected
    } else {
      Resource::Document(DocumentResource {
        name: None,
        exists: true,
        length,
        etag: self.etag,
        stream: None,
      })
    }
  }
}

/// Sort an array-shaped collection listing: names with a trailing `/`
/// (sub-collections) first, then the rest, each lexicographically.
///
/// The textual strip-and-split parse is lossy: names containing commas are
/// not supported here.
fn extract_sorted_collection_array(array_str: &str) -> serde_json::Value {
  let content = array_str
    .replace('[', "")
    .replace(']', "")
    .replace('"', "")
    .replace('\\', "");
  let mut collections = Vec::new();
  let mut resources = Vec::new();
  for split in content.split(',') {
    if split.is_empty() {
      continue;
    }
    if split.ends_with('/') {
      collections.push(split.to_string());
    } else {
      resources.push(split.to_string());
    }
  }
  collections.sort();
  resources.sort();
  collections.extend(resources);
  serde_json::Value::Array(collections.into_iter().map(serde_json::Value::String).collect())
}

fn bool_text(value: bool) -> String {
  if value { "true" } else { "false" }.to_string()
}

fn into_array(value: redis::Value) -> Vec<redis::Value> {
  match value {
    redis::Value::Array(values) => values,
    other => vec![other],
  }
}

fn value_bytes(value: &redis::Value) -> Option<Vec<u8>> {
  match value {
    redis::Value::BulkString(bytes) => Some(bytes.clone()),
    redis::Value::SimpleString(s) => Some(s.as_bytes().to_vec()),
    _ => None,
  }
}

fn value_string(value: &redis::Value) -> Option<String> {
  match value {
    redis::Value::BulkString(bytes) => Some(encode_binary(bytes)),
    redis::Value::SimpleString(s) => Some(s.clone()),
    redis::Value::Okay => Some("OK".to_string()),
    _ => None,
  }
}

fn is_present(value: &redis::Value) -> bool {
  !matches!(value, redis::Value::Nil)
}

fn first_string(values: &[redis::Value]) -> Option<String> {
  values.first().and_then(value_string)
}

fn first_integer(values: &[redis::Value]) -> Option<i64> {
  match values.first() {
    Some(redis::Value::Int(n)) => Some(*n),
    Some(redis::Value::BulkString(bytes)) => encode_binary(bytes).parse().ok(),
    _ => None,
  }
}

/// Decode a scalar reply that may arrive as a bulk string or status.
fn scalar_string(value: &redis::Value) -> Option<String> {
  match value {
    redis::Value::Array(values) => values.first().and_then(value_string),
    other => value_string(other),
  }
}
