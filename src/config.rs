use std::time::Duration;

use serde::Deserialize;

/// Plugin configuration, read from `plugins.web-bluetooth` in `tauri.conf.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
  /// Pick the first matching device without asking the user.
  pub autoselect: bool,
  /// How long an auto-select request may wait for a match.
  pub autoselect_timeout_ms: u64,
  pub adapter_index: usize,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      autoselect: false,
      autoselect_timeout_ms: 30_000,
      adapter_index: 0,
    }
  }
}

impl Config {
  pub fn autoselect_timeout(&self) -> Duration {
    Duration::from_millis(self.autoselect_timeout_ms.max(1))
  }
}
