//! Lock modes gating writes and deletes

use serde::{Deserialize, Serialize};

/// How a write or delete interacts with resource locks.
///
/// The wire strings are compared verbatim by the server-side scripts and
/// must not change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
  /// Take no lock; respect existing ones
  #[default]
  Silent,
  /// Take a lock and fail conflicting writes
  Reject,
  /// Take the lock regardless of an existing one
  Override,
}

impl LockMode {
  /// The wire string the scripts compare against.
  pub fn text(&self) -> &'static str {
    match self {
      LockMode::Silent => "silent",
      LockMode::Reject => "reject",
      LockMode::Override => "override",
    }
  }
}

impl std::fmt::Display for LockMode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.text())
  }
}

impl std::str::FromStr for LockMode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "silent" => Ok(LockMode::Silent),
      "reject" => Ok(LockMode::Reject),
      "override" => Ok(LockMode::Override),
      _ => Err(format!("Unknown lock mode: {}", s)),
    }
  }
}
