//! Scripted mock backend shared by the integration tests

// not every test binary exercises every helper
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use acornstore::redis::{RedisBackend, RedisClientError, RedisResult};

/// One recorded `eval_script` invocation.
#[derive(Debug, Clone)]
pub struct RecordedCall {
  pub sha: String,
  pub keys: Vec<String>,
  pub args: Vec<String>,
}

/// Mock backend replaying queued replies and recording every call.
pub struct MockRedisBackend {
  eval_replies: Mutex<VecDeque<RedisResult<redis::Value>>>,
  pub calls: Mutex<Vec<RecordedCall>>,
  pub loaded_sources: Mutex<Vec<String>>,
  script_cached: Mutex<bool>,
  load_sha: Mutex<String>,
  info: Mutex<HashMap<String, String>>,
  zcount_reply: Mutex<i64>,
}

impl MockRedisBackend {
  pub fn new() -> Self {
    Self {
      eval_replies: Mutex::new(VecDeque::new()),
      calls: Mutex::new(Vec::new()),
      loaded_sources: Mutex::new(Vec::new()),
      // cached by default so the eager preload is a no-op in tests
      script_cached: Mutex::new(true),
      load_sha: Mutex::new("0000000000000000000000000000000000000000".to_string()),
      info: Mutex::new(HashMap::new()),
      zcount_reply: Mutex::new(0),
    }
  }

  pub fn queue(&self, reply: redis::Value) {
    self.eval_replies.lock().push_back(Ok(reply));
  }

  pub fn queue_script_missing(&self) {
    self
      .eval_replies
      .lock()
      .push_back(Err(RedisClientError::ScriptMissing));
  }

  pub fn queue_command_error(&self) {
    let err = redis::RedisError::from((redis::ErrorKind::ResponseError, "simulated failure"));
    self
      .eval_replies
      .lock()
      .push_back(Err(RedisClientError::Command(err)));
  }

  pub fn set_script_cached(&self, cached: bool) {
    *self.script_cached.lock() = cached;
  }

  pub fn set_load_sha(&self, sha: &str) {
    *self.load_sha.lock() = sha.to_string();
  }

  pub fn set_info(&self, pairs: &[(&str, &str)]) {
    let mut info = self.info.lock();
    info.clear();
    for (key, value) in pairs {
      info.insert(key.to_string(), value.to_string());
    }
  }

  pub fn set_zcount(&self, count: i64) {
    *self.zcount_reply.lock() = count;
  }

  pub fn last_call(&self) -> RecordedCall {
    self.calls.lock().last().expect("no eval calls recorded").clone()
  }

  pub fn eval_call_count(&self) -> usize {
    self.calls.lock().len()
  }
}

#[async_trait]
impl RedisBackend for MockRedisBackend {
  async fn eval_script(
    &self,
    sha: &str,
    keys: &[String],
    args: &[String],
  ) -> RedisResult<redis::Value> {
    self.calls.lock().push(RecordedCall {
      sha: sha.to_string(),
      keys: keys.to_vec(),
      args: args.to_vec(),
    });
    match self.eval_replies.lock().pop_front() {
      Some(reply) => reply,
      None => Ok(redis::Value::Array(vec![redis::Value::BulkString(
        b"OK".to_vec(),
      )])),
    }
  }

  async fn load_script(&self, source: &str) -> RedisResult<String> {
    self.loaded_sources.lock().push(source.to_string());
    Ok(self.load_sha.lock().clone())
  }

  async fn script_exists(&self, _sha: &str) -> RedisResult<bool> {
    Ok(*self.script_cached.lock())
  }

  async fn info_memory(&self) -> RedisResult<HashMap<String, String>> {
    Ok(self.info.lock().clone())
  }

  async fn zcount(&self, _key: &str, _min: i64, _max: i64) -> RedisResult<i64> {
    Ok(*self.zcount_reply.lock())
  }
}

/// A `["TYPE_RESOURCE", payload, etag]` reply, optionally compressed.
pub fn resource_reply(payload: &[u8], etag: &str, compressed: bool) -> redis::Value {
  let mut values = vec![
    redis::Value::BulkString(b"TYPE_RESOURCE".to_vec()),
    redis::Value::BulkString(payload.to_vec()),
    redis::Value::BulkString(etag.as_bytes().to_vec()),
  ];
  if compressed {
    values.push(redis::Value::BulkString(b"1".to_vec()));
  }
  redis::Value::Array(values)
}

/// A `["TYPE_COLLECTION", member...]` reply.
pub fn collection_reply(members: &[&str]) -> redis::Value {
  let mut values = vec![redis::Value::BulkString(b"TYPE_COLLECTION".to_vec())];
  for member in members {
    values.push(redis::Value::BulkString(member.as_bytes().to_vec()));
  }
  redis::Value::Array(values)
}

/// A `[status]` reply such as `["notFound"]`.
pub fn status_reply(status: &str) -> redis::Value {
  redis::Value::Array(vec![redis::Value::BulkString(status.as_bytes().to_vec())])
}

/// A `[count]` reply from the cleanup script.
pub fn count_reply(count: i64) -> redis::Value {
  redis::Value::Array(vec![redis::Value::Int(count)])
}

/// A scalar bulk string reply from the expand script.
pub fn bulk_reply(payload: &str) -> redis::Value {
  redis::Value::BulkString(payload.as_bytes().to_vec())
}
