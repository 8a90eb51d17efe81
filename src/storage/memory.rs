//! Periodic Redis memory usage sampling

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::redis::RedisBackend;

const MAX_PERCENTAGE: f32 = 100.0;
const MIN_PERCENTAGE: f32 = 0.0;

/// Shared cell holding the most recent usage percentage, if it could be
/// determined.
pub type MemoryUsageCell = Arc<RwLock<Option<f32>>>;

/// Sample the backend's memory usage as a percentage of total system
/// memory, clamped to `[0, 100]`.
///
/// Returns `None` when the info section is missing, a property is absent
/// or unparseable, or total system memory is reported as zero. Failures
/// never propagate; callers keep their last known state semantics by
/// storing the `None`.
pub async fn calculate_current_memory_usage(backend: &dyn RedisBackend) -> Option<f32> {
  let memory = match backend.info_memory().await {
    Ok(section) => section,
    Err(e) => {
      tracing::error!("Unable to get memory information from redis: {}", e);
      return None;
    }
  };

  if memory.is_empty() {
    tracing::warn!("No 'memory' section received from redis. Unable to calculate the current memory usage");
    return None;
  }

  let total_system_memory = match parse_property(&memory, "total_system_memory") {
    Some(value) => value,
    None => return None,
  };
  if total_system_memory == 0 {
    tracing::warn!("'total_system_memory' value 0 received from redis. Unable to calculate the current memory usage");
    return None;
  }

  let used_memory = match parse_property(&memory, "used_memory") {
    Some(value) => value,
    None => return None,
  };

  let percentage =
    ((used_memory as f32 / total_system_memory as f32) * 100.0).clamp(MIN_PERCENTAGE, MAX_PERCENTAGE);
  tracing::info!("Current memory usage is {:.1}%", percentage);
  Some(percentage)
}

fn parse_property(section: &std::collections::HashMap<String, String>, property: &str) -> Option<i64> {
  match section.get(property).map(|v| v.parse::<i64>()) {
    Some(Ok(value)) => Some(value),
    _ => {
      tracing::warn!(
        "No or invalid '{}' value received from redis. Unable to calculate the current memory usage",
        property
      );
      None
    }
  }
}

/// Periodically refresh the shared memory usage cell.
pub async fn run_memory_usage_task(
  backend: Arc<dyn RedisBackend>,
  cell: MemoryUsageCell,
  interval_ms: u64,
) {
  loop {
    tokio::time::sleep(Duration::from_millis(interval_ms)).await;
    let usage = calculate_current_memory_usage(backend.as_ref()).await;
    *cell.write() = usage;
  }
}
