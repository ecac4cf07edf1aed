//! Project configuration (`stackup.toml`).
//!
//! ```toml
//! default_region = "local"
//!
//! [wait]
//! timeout_secs = 1800
//!
//! [environments.dev]
//! region = "eu-west-1"
//! parameters_dir = "parameters"
//! stacks = [
//!   { name = "network", template = "templates/network.yaml" },
//!   { name = "storage", template = "templates/storage.yaml", sweep = ["object-store", "image-repository"] },
//! ]
//! ```
//!
//! Relative paths resolve against the directory holding the config file.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::control_plane::{ResourceKind, RetryPolicy, WaitPolicy};
use crate::platform::paths;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "STACKUP_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("invalid config: {0}")]
  Invalid(String),

  #[error("environment {0} is not declared in the config")]
  UnknownEnvironment(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
  pub default_region: String,
  pub control_plane: ControlPlaneConfig,
  pub wait: WaitConfig,
  pub retry: RetryConfig,
  /// Environment name -> declaration.
  pub environments: BTreeMap<String, EnvironmentConfig>,
  /// Directory relative paths resolve against.
  #[serde(skip)]
  pub root: PathBuf,
}

impl Default for ProjectConfig {
  fn default() -> Self {
    Self {
      default_region: "local".to_string(),
      control_plane: ControlPlaneConfig::default(),
      wait: WaitConfig::default(),
      retry: RetryConfig::default(),
      environments: BTreeMap::new(),
      root: PathBuf::from("."),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControlPlaneConfig {
  /// Where the local control plane keeps its per-region state.
  pub state_dir: Option<PathBuf>,
  /// Describe calls an operation stays in flight.
  pub settle_polls: u32,
}

impl Default for ControlPlaneConfig {
  fn default() -> Self {
    Self {
      state_dir: None,
      settle_polls: 1,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WaitConfig {
  pub timeout_secs: u64,
  pub initial_interval_ms: u64,
  pub max_interval_ms: u64,
}

impl Default for WaitConfig {
  fn default() -> Self {
    Self {
      timeout_secs: 1800,
      initial_interval_ms: 250,
      max_interval_ms: 5000,
    }
  }
}

impl WaitConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }

  pub fn policy(&self) -> WaitPolicy {
    WaitPolicy {
      initial_interval: Duration::from_millis(self.initial_interval_ms),
      max_interval: Duration::from_millis(self.max_interval_ms),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
  pub max_attempts: u32,
  pub initial_backoff_ms: u64,
  pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      initial_backoff_ms: 100,
      max_backoff_ms: 2000,
    }
  }
}

impl RetryConfig {
  pub fn policy(&self) -> RetryPolicy {
    RetryPolicy {
      max_attempts: self.max_attempts,
      initial_backoff: Duration::from_millis(self.initial_backoff_ms),
      max_backoff: Duration::from_millis(self.max_backoff_ms),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentConfig {
  /// Falls back to `default_region`.
  #[serde(default)]
  pub region: Option<String>,
  #[serde(default = "default_parameters_dir")]
  pub parameters_dir: PathBuf,
  /// Apply order. Teardown walks it backwards.
  pub stacks: Vec<StackDecl>,
}

fn default_parameters_dir() -> PathBuf {
  PathBuf::from("parameters")
}

/// One stack in an environment's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackDecl {
  pub name: String,
  pub template: PathBuf,
  /// Child resource kinds emptied before the stack is deleted.
  #[serde(default)]
  pub sweep: Vec<ResourceKind>,
}

/// A resolved environment: absolute paths, region decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
  pub name: String,
  pub region: String,
  pub parameters_dir: PathBuf,
  pub stacks: Vec<StackDecl>,
}

impl Environment {
  pub fn stack(&self, name: &str) -> Option<&StackDecl> {
    self.stacks.iter().find(|s| s.name == name)
  }

  /// Declarations before `name` in apply order; empty if `name` is not
  /// declared.
  pub fn upstream_of(&self, name: &str) -> &[StackDecl] {
    match self.stacks.iter().position(|s| s.name == name) {
      Some(index) => &self.stacks[..index],
      None => &[],
    }
  }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
  if path.is_absolute() {
    path.to_path_buf()
  } else {
    root.join(path)
  }
}

impl ProjectConfig {
  /// Load and validate a config file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let mut config: ProjectConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;

    config.root = match path.parent() {
      Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
      _ => PathBuf::from("."),
    };
    config.validate()?;

    debug!(path = %path.display(), environments = config.environments.len(), "loaded config");
    Ok(config)
  }

  /// Load a config file, or fall back to defaults when it does not exist.
  pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
    match Self::load(path) {
      Err(ConfigError::Read { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
        debug!(path = %path.display(), "no config file, using defaults");
        let mut config = Self::default();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
          config.root = parent.to_path_buf();
        }
        Ok(config)
      }
      other => other,
    }
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.default_region.trim().is_empty() {
      return Err(ConfigError::Invalid("default_region must not be empty".into()));
    }
    if self.wait.timeout_secs == 0 {
      return Err(ConfigError::Invalid("wait.timeout_secs must be greater than zero".into()));
    }
    if self.wait.initial_interval_ms == 0 || self.wait.max_interval_ms < self.wait.initial_interval_ms {
      return Err(ConfigError::Invalid(
        "wait intervals must be non-zero with max_interval_ms >= initial_interval_ms".into(),
      ));
    }
    if self.retry.max_attempts == 0 {
      return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
    }

    for (name, env) in &self.environments {
      if env.region.as_deref().is_some_and(|r| r.trim().is_empty()) {
        return Err(ConfigError::Invalid(format!("environment {name}: region must not be empty")));
      }
      if env.stacks.is_empty() {
        return Err(ConfigError::Invalid(format!("environment {name}: declares no stacks")));
      }
      let mut seen = BTreeSet::new();
      for stack in &env.stacks {
        if stack.name.trim().is_empty() {
          return Err(ConfigError::Invalid(format!("environment {name}: stack with empty name")));
        }
        if !seen.insert(stack.name.as_str()) {
          return Err(ConfigError::Invalid(format!(
            "environment {name}: stack {} declared twice",
            stack.name
          )));
        }
      }
    }
    Ok(())
  }

  /// A declared environment, with paths resolved.
  pub fn environment(&self, name: &str) -> Result<Environment, ConfigError> {
    let env = self
      .environments
      .get(name)
      .ok_or_else(|| ConfigError::UnknownEnvironment(name.to_string()))?;

    Ok(Environment {
      name: name.to_string(),
      region: env.region.clone().unwrap_or_else(|| self.default_region.clone()),
      parameters_dir: resolve(&self.root, &env.parameters_dir),
      stacks: env
        .stacks
        .iter()
        .map(|s| StackDecl {
          template: resolve(&self.root, &s.template),
          ..s.clone()
        })
        .collect(),
    })
  }

  /// A declared environment, or an ad-hoc one with no stack chain for
  /// single-stack commands.
  pub fn environment_or_adhoc(&self, name: &str) -> Environment {
    self.environment(name).unwrap_or_else(|_| Environment {
      name: name.to_string(),
      region: self.default_region.clone(),
      parameters_dir: resolve(&self.root, &default_parameters_dir()),
      stacks: Vec::new(),
    })
  }

  /// Directory of the local control plane state.
  pub fn state_dir(&self) -> PathBuf {
    match &self.control_plane.state_dir {
      Some(dir) => resolve(&self.root, dir),
      None => paths::control_plane_dir(),
    }
  }

  /// State file of the local control plane for a region.
  pub fn state_file(&self, region: &str) -> PathBuf {
    self.state_dir().join(format!("{region}.json"))
  }
}
