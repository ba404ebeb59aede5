//! Scheduler limits and timeouts.

use std::time::Duration;

const RUN_TIMEOUT_VAR: &str = "NODEFLOW_RUN_TIMEOUT_MS";
const USER_INPUT_TIMEOUT_VAR: &str = "NODEFLOW_USER_INPUT_TIMEOUT_MS";
const MAX_SUBGRAPH_DEPTH_VAR: &str = "NODEFLOW_MAX_SUBGRAPH_DEPTH";
const SPLIT_MAX_VAR: &str = "NODEFLOW_SPLIT_MAX";

pub const DEFAULT_MAX_SUBGRAPH_DEPTH: usize = 32;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
  #[error("invalid value '{value}' for {name}: {message}")]
  Invalid {
    name: String,
    value: String,
    message: String,
  },
}

/// Limits applied to a whole run, subgraphs included.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
  /// Abort the run when it takes longer than this.
  pub run_timeout: Option<Duration>,
  /// Give up on a `userInput` node that waits longer than this.
  pub user_input_timeout: Option<Duration>,
  /// How deeply subgraphs may nest. The root process is depth 0.
  pub max_subgraph_depth: usize,
  /// Branch cap for split-run nodes without their own `splitRunMax`.
  pub default_split_max: Option<usize>,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      run_timeout: None,
      user_input_timeout: None,
      max_subgraph_depth: DEFAULT_MAX_SUBGRAPH_DEPTH,
      default_split_max: None,
    }
  }
}

impl SchedulerConfig {
  /// Defaults overridden by `NODEFLOW_*` environment variables.
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::from_vars(std::env::vars())
  }

  fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self, ConfigError> {
    let mut config = Self::default();
    for (name, value) in vars {
      match name.as_str() {
        RUN_TIMEOUT_VAR => config.run_timeout = Some(Duration::from_millis(parse(&name, &value)?)),
        USER_INPUT_TIMEOUT_VAR => {
          config.user_input_timeout = Some(Duration::from_millis(parse(&name, &value)?))
        }
        MAX_SUBGRAPH_DEPTH_VAR => config.max_subgraph_depth = parse(&name, &value)?,
        SPLIT_MAX_VAR => config.default_split_max = Some(parse(&name, &value)?),
        _ => {}
      }
    }
    Ok(config)
  }

  pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
    self.run_timeout = Some(timeout);
    self
  }

  pub fn with_user_input_timeout(mut self, timeout: Duration) -> Self {
    self.user_input_timeout = Some(timeout);
    self
  }

  pub fn with_max_subgraph_depth(mut self, depth: usize) -> Self {
    self.max_subgraph_depth = depth;
    self
  }

  pub fn with_default_split_max(mut self, max: usize) -> Self {
    self.default_split_max = Some(max);
    self
  }
}

fn parse<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
  T: std::str::FromStr,
  T::Err: std::fmt::Display,
{
  value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
    name: name.to_string(),
    value: value.to_string(),
    message: e.to_string(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect()
  }

  #[test]
  fn test_defaults_without_vars() {
    let config = SchedulerConfig::from_vars(vars(&[("PATH", "/bin")])).unwrap();
    assert_eq!(config, SchedulerConfig::default());
    assert_eq!(config.max_subgraph_depth, 32);
  }

  #[test]
  fn test_reads_every_var() {
    let config = SchedulerConfig::from_vars(vars(&[
      (RUN_TIMEOUT_VAR, "1500"),
      (USER_INPUT_TIMEOUT_VAR, "250"),
      (MAX_SUBGRAPH_DEPTH_VAR, "4"),
      (SPLIT_MAX_VAR, "10"),
    ]))
    .unwrap();
    assert_eq!(config.run_timeout, Some(Duration::from_millis(1500)));
    assert_eq!(config.user_input_timeout, Some(Duration::from_millis(250)));
    assert_eq!(config.max_subgraph_depth, 4);
    assert_eq!(config.default_split_max, Some(10));
  }

  #[test]
  fn test_rejects_garbage() {
    let err = SchedulerConfig::from_vars(vars(&[(MAX_SUBGRAPH_DEPTH_VAR, "deep")])).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { ref name, .. } if name == MAX_SUBGRAPH_DEPTH_VAR));
  }
}
