use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

const SETTING_PREFIX: &str = "NODEFLOW_SETTING_";
const SECRET_PREFIX: &str = "NODEFLOW_SECRET_";

/// Settings and secrets shared by every node of a process tree.
#[derive(Clone, Default, Deserialize)]
pub struct Settings {
  #[serde(default)]
  values: HashMap<String, String>,
  #[serde(default)]
  secrets: HashMap<String, String>,
}

impl Settings {
  pub fn new() -> Self {
    Self::default()
  }

  /// Collect `NODEFLOW_SETTING_<NAME>` and `NODEFLOW_SECRET_<NAME>` from the
  /// environment. Names are lowercased.
  pub fn from_env() -> Self {
    Self::from_vars(std::env::vars())
  }

  fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
    let mut settings = Self::default();
    for (key, value) in vars {
      if let Some(name) = key.strip_prefix(SETTING_PREFIX) {
        settings.values.insert(name.to_lowercase(), value);
      } else if let Some(name) = key.strip_prefix(SECRET_PREFIX) {
        settings.secrets.insert(name.to_lowercase(), value);
      }
    }
    settings
  }

  pub fn with_value(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.values.insert(name.into(), value.into());
    self
  }

  pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.secrets.insert(name.into(), value.into());
    self
  }

  pub fn value(&self, name: &str) -> Option<&str> {
    self.values.get(name).map(String::as_str)
  }

  pub fn secret(&self, name: &str) -> Option<&str> {
    self.secrets.get(name).map(String::as_str)
  }
}

impl fmt::Debug for Settings {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut secrets: Vec<_> = self.secrets.keys().collect();
    secrets.sort();
    f.debug_struct("Settings")
      .field("values", &self.values)
      .field("secrets", &secrets)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_from_vars_splits_settings_and_secrets() {
    let settings = Settings::from_vars([
      ("NODEFLOW_SETTING_MODEL".to_string(), "small".to_string()),
      ("NODEFLOW_SECRET_API_KEY".to_string(), "hunter2".to_string()),
      ("HOME".to_string(), "/root".to_string()),
    ]);

    assert_eq!(settings.value("model"), Some("small"));
    assert_eq!(settings.secret("api_key"), Some("hunter2"));
    assert_eq!(settings.value("home"), None);
  }

  #[test]
  fn test_debug_redacts_secrets() {
    let settings = Settings::new().with_secret("token", "s3cr3t");
    let debug = format!("{settings:?}");
    assert!(debug.contains("token"));
    assert!(!debug.contains("s3cr3t"));
  }
}
