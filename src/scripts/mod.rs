//! Registry for the server-side Lua scripts

use std::collections::HashMap;

use parking_lot::RwLock;
use sha1::{Digest, Sha1};
use tracing::Level;

use crate::redis::{RedisBackend, RedisClientError, RedisResult};

/// Marker substring of script lines stripped when trace logging is off.
const LOG_LINE_MARKER: &str = "redis.log(redis.LOG_NOTICE,";

/// Placeholder in the cleanup script replaced by the inlined delete script.
const DELSCRIPT_PLACEHOLDER: &str = "--%(delscript)";

/// Maximum number of reloads before an operation gives up on NOSCRIPT.
pub const MAX_SCRIPT_RETRIES: u32 = 10;

/// The five server-side scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptKind {
  Get,
  StorageExpand,
  Put,
  Delete,
  Cleanup,
}

impl ScriptKind {
  pub const ALL: [ScriptKind; 5] = [
    ScriptKind::Get,
    ScriptKind::StorageExpand,
    ScriptKind::Put,
    ScriptKind::Delete,
    ScriptKind::Cleanup,
  ];

  /// Embedded source, before log-line filtering and substitution.
  fn raw_source(&self) -> &'static str {
    match self {
      ScriptKind::Get => include_str!("get.lua"),
      ScriptKind::StorageExpand => include_str!("storage_expand.lua"),
      ScriptKind::Put => include_str!("put.lua"),
      ScriptKind::Delete => include_str!("del.lua"),
      ScriptKind::Cleanup => include_str!("cleanup.lua"),
    }
  }
}

impl std::fmt::Display for ScriptKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      ScriptKind::Get => "get",
      ScriptKind::StorageExpand => "storageExpand",
      ScriptKind::Put => "put",
      ScriptKind::Delete => "del",
      ScriptKind::Cleanup => "cleanup",
    };
    write!(f, "{}", name)
  }
}

/// Script execution error
#[derive(Debug)]
pub enum ScriptError {
  Backend(RedisClientError),
  ReloadExhausted { kind: ScriptKind, attempts: u32 },
}

impl std::fmt::Display for ScriptError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ScriptError::Backend(e) => write!(f, "{}", e),
      ScriptError::ReloadExhausted { kind, attempts } => write!(
        f,
        "script reload exhausted for '{}' after {} attempts",
        kind, attempts
      ),
    }
  }
}

impl std::error::Error for ScriptError {}

impl From<RedisClientError> for ScriptError {
  fn from(e: RedisClientError) -> Self {
    ScriptError::Backend(e)
  }
}

struct ScriptState {
  source: String,
  sha: String,
  log_output: bool,
}

impl ScriptState {
  fn compose(kind: ScriptKind, log_output: bool) -> Self {
    let source = compose_source(kind, log_output);
    let sha = sha1_hex(&source);
    Self {
      source,
      sha,
      log_output,
    }
  }
}

/// Read an embedded script, dropping backend-log lines unless requested.
fn filter_source(kind: ScriptKind, log_output: bool) -> String {
  let mut out = String::new();
  for line in kind.raw_source().lines() {
    if !log_output && line.contains(LOG_LINE_MARKER) {
      continue;
    }
    out.push_str(line);
    out.push('\n');
  }
  out
}

/// Compose the final source for a script kind.
///
/// The cleanup script cannot evalsha the delete script from inside the
/// backend, so the delete source is spliced into its placeholder with every
/// `return` commented out; the per-entry delete then falls through instead
/// of terminating the sweep.
pub fn compose_source(kind: ScriptKind, log_output: bool) -> String {
  if kind == ScriptKind::Cleanup {
    let delete = filter_source(ScriptKind::Delete, log_output).replace("return", "--return");
    filter_source(ScriptKind::Cleanup, log_output).replace(DELSCRIPT_PLACEHOLDER, &delete)
  } else {
    filter_source(kind, log_output)
  }
}

fn sha1_hex(source: &str) -> String {
  let mut hasher = Sha1::new();
  hasher.update(source.as_bytes());
  format!("{:x}", hasher.finalize())
}

/// Owns the five scripts and keeps them loadable on the backend.
///
/// Holds `{source, sha, log_output}` per script. Loads are not serialized:
/// concurrent callers may both observe a missing script and both reload,
/// which is harmless since loading is idempotent.
pub struct ScriptRegistry {
  scripts: RwLock<HashMap<ScriptKind, ScriptState>>,
}

impl ScriptRegistry {
  pub fn new() -> Self {
    let mut scripts = HashMap::new();
    for kind in ScriptKind::ALL {
      tracing::info!("composing script '{}' with log output: false", kind);
      scripts.insert(kind, ScriptState::compose(kind, false));
    }
    Self {
      scripts: RwLock::new(scripts),
    }
  }

  /// The content hash a script is currently invokable under.
  pub fn sha(&self, kind: ScriptKind) -> String {
    self.scripts.read()[&kind].sha.clone()
  }

  /// The composed source of a script.
  pub fn source(&self, kind: ScriptKind) -> String {
    self.scripts.read()[&kind].source.clone()
  }

  /// Eagerly register every script; failures are logged and deferred to
  /// the lazy load on first use.
  pub async fn preload(&self, backend: &dyn RedisBackend) {
    for kind in ScriptKind::ALL {
      if let Err(e) = self.ensure_loaded(kind, backend).await {
        tracing::warn!("preloading script '{}' failed: {}", kind, e);
      }
    }
  }

  /// Make sure the backend has the script cached, loading it on a miss.
  async fn ensure_loaded(&self, kind: ScriptKind, backend: &dyn RedisBackend) -> RedisResult<()> {
    let (sha, source) = {
      let scripts = self.scripts.read();
      let state = &scripts[&kind];
      (state.sha.clone(), state.source.clone())
    };

    if backend.script_exists(&sha).await? {
      tracing::debug!("script '{}' already cached under {}", kind, sha);
      return Ok(());
    }

    tracing::info!("loading script '{}'", kind);
    let backend_sha = backend.load_script(&source).await?;
    if backend_sha != sha {
      tracing::warn!(
        "locally computed sha {} for script '{}' does not match backend sha {}; using the backend's",
        sha,
        kind,
        backend_sha
      );
      self.scripts.write().get_mut(&kind).unwrap().sha = backend_sha;
    }
    Ok(())
  }

  /// Recompose a script when the trace-log state changed since it was
  /// last built, then make sure the new source is loaded.
  async fn reload_if_log_level_changed(
    &self,
    kind: ScriptKind,
    backend: &dyn RedisBackend,
    log_output: bool,
  ) -> RedisResult<()> {
    let changed = {
      let scripts = self.scripts.read();
      scripts[&kind].log_output != log_output
    };
    if !changed {
      return Ok(());
    }
    tracing::info!(
      "recomposing script '{}' with log output: {}",
      kind,
      log_output
    );
    self
      .scripts
      .write()
      .insert(kind, ScriptState::compose(kind, log_output));
    self.ensure_loaded(kind, backend).await
  }

  /// Run a script with the bounded NOSCRIPT recovery loop.
  pub async fn execute(
    &self,
    kind: ScriptKind,
    backend: &dyn RedisBackend,
    keys: &[String],
    args: &[String],
  ) -> Result<redis::Value, ScriptError> {
    self
      .reload_if_log_level_changed(kind, backend, tracing::enabled!(Level::TRACE))
      .await?;

    let mut attempts: u32 = 0;
    loop {
      let sha = self.sha(kind);
      match backend.eval_script(&sha, keys, args).await {
        Ok(value) => return Ok(value),
        Err(e) if e.is_script_missing() => {
          attempts += 1;
          tracing::warn!(
            "script '{}' not cached on backend, reload attempt {}",
            kind,
            attempts
          );
          if attempts > MAX_SCRIPT_RETRIES {
            tracing::error!("script '{}' reloaded more than {} times, giving up", kind, MAX_SCRIPT_RETRIES);
            return Err(ScriptError::ReloadExhausted { kind, attempts });
          }
          self.ensure_loaded(kind, backend).await?;
        }
        Err(e) => return Err(ScriptError::Backend(e)),
      }
    }
  }

  /// Run a script once by its current sha, without recovery. The cleanup
  /// sweep uses this and reloads out-of-band when the script is missing.
  pub async fn execute_once(
    &self,
    kind: ScriptKind,
    backend: &dyn RedisBackend,
    keys: &[String],
    args: &[String],
  ) -> RedisResult<redis::Value> {
    let sha = self.sha(kind);
    backend.eval_script(&sha, keys, args).await
  }

  /// Reload a script after an out-of-band miss.
  pub async fn reload(&self, kind: ScriptKind, backend: &dyn RedisBackend) -> RedisResult<()> {
    self.ensure_loaded(kind, backend).await
  }
}

impl Default for ScriptRegistry {
  fn default() -> Self {
    Self::new()
  }
}
