//! Template and parameter source.
//!
//! A template is an opaque body plus its content reference. The orchestrator
//! only needs the declared parameter names from the body; the control plane
//! interprets the rest.
//!
//! # Template document
//!
//! ```yaml
//! parameters: [EnvironmentName, VpcId]
//! resources:
//!   Artifacts:
//!     type: object-store
//!     properties: { versioned: true }
//!   Service:
//!     type: compute::service
//!     properties: { vpc: "${VpcId}" }
//! outputs:
//!   ArtifactsBucket: "${EnvironmentName}-artifacts"
//! ```
//!
//! # Parameter files
//!
//! Parameters live at `<parameters_dir>/<environment>/<stack>.json`, either
//! as a plain object or as a list of `ParameterKey`/`ParameterValue` pairs.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::DEFAULT_PARAMETER_KEY;
use crate::stack::{Outputs, Parameters};
use crate::util::hash::{TemplateRef, template_ref};

/// Errors raised while loading templates or parameters.
#[derive(Debug, Error)]
pub enum TemplateError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid template document: {0}")]
  Parse(#[from] serde_yaml::Error),

  #[error("invalid parameter file {path}: {source}")]
  ParameterFile {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

/// A template body and its content reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
  pub reference: TemplateRef,
  pub body: String,
}

impl Template {
  pub fn from_body(body: impl Into<String>) -> Self {
    let body = body.into();
    Self {
      reference: template_ref(&body),
      body,
    }
  }

  /// Read a template from disk.
  pub fn load(path: &Path) -> Result<Self, TemplateError> {
    let body = fs::read_to_string(path).map_err(|source| TemplateError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let template = Self::from_body(body);
    debug!(path = %path.display(), reference = %template.reference, "loaded template");
    Ok(template)
  }

  pub fn document(&self) -> Result<TemplateDocument, TemplateError> {
    TemplateDocument::parse(&self.body)
  }
}

/// Parsed template body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TemplateDocument {
  /// Declared parameter names.
  pub parameters: Vec<String>,
  /// Logical id -> resource declaration.
  pub resources: BTreeMap<String, ResourceDecl>,
  /// Output key -> value, `${Param}` placeholders allowed.
  pub outputs: BTreeMap<String, String>,
}

/// A single declared resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceDecl {
  #[serde(rename = "type")]
  pub resource_type: String,
  #[serde(default)]
  pub properties: BTreeMap<String, serde_json::Value>,
}

impl ResourceDecl {
  pub fn is_versioned(&self) -> bool {
    matches!(self.properties.get("versioned"), Some(serde_json::Value::Bool(true)))
  }

  /// Properties with every `${Param}` placeholder substituted.
  pub fn resolved_properties(&self, parameters: &Parameters) -> BTreeMap<String, serde_json::Value> {
    self
      .properties
      .iter()
      .map(|(key, value)| (key.clone(), substitute_value(value, parameters)))
      .collect()
  }
}

impl TemplateDocument {
  pub fn parse(body: &str) -> Result<Self, TemplateError> {
    if body.trim().is_empty() {
      return Ok(Self::default());
    }
    Ok(serde_yaml::from_str(body)?)
  }

  /// Declared parameters with no value in `parameters`.
  pub fn missing_parameters(&self, parameters: &Parameters) -> Vec<String> {
    self
      .parameters
      .iter()
      .filter(|name| !parameters.contains_key(*name))
      .cloned()
      .collect()
  }

  /// Outputs with placeholders resolved against `parameters`.
  pub fn resolved_outputs(&self, parameters: &Parameters) -> Outputs {
    self
      .outputs
      .iter()
      .map(|(key, value)| (key.clone(), substitute(value, parameters)))
      .collect()
  }
}

/// Replace `${Name}` placeholders with parameter values.
///
/// Unknown placeholders are left untouched so a typo stays visible in the
/// materialized value.
pub fn substitute(input: &str, parameters: &Parameters) -> String {
  let mut out = String::with_capacity(input.len());
  let mut rest = input;

  while let Some(start) = rest.find("${") {
    out.push_str(&rest[..start]);
    let after = &rest[start + 2..];
    match after.find('}') {
      Some(end) => {
        let name = &after[..end];
        match parameters.get(name) {
          Some(value) => out.push_str(value),
          None => {
            out.push_str("${");
            out.push_str(name);
            out.push('}');
          }
        }
        rest = &after[end + 1..];
      }
      None => {
        out.push_str(&rest[start..]);
        rest = "";
      }
    }
  }

  out.push_str(rest);
  out
}

fn substitute_value(value: &serde_json::Value, parameters: &Parameters) -> serde_json::Value {
  match value {
    serde_json::Value::String(s) => serde_json::Value::String(substitute(s, parameters)),
    serde_json::Value::Array(items) => {
      serde_json::Value::Array(items.iter().map(|v| substitute_value(v, parameters)).collect())
    }
    serde_json::Value::Object(map) => serde_json::Value::Object(
      map
        .iter()
        .map(|(k, v)| (k.clone(), substitute_value(v, parameters)))
        .collect(),
    ),
    other => other.clone(),
  }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ParameterFile {
  Map(BTreeMap<String, String>),
  List(Vec<ParameterEntry>),
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParameterEntry {
  parameter_key: String,
  parameter_value: String,
}

/// Path of the parameter file for a stack in an environment.
pub fn parameter_file_path(parameters_dir: &Path, environment: &str, stack: &str) -> PathBuf {
  parameters_dir.join(environment).join(format!("{stack}.json"))
}

/// Resolve a stack's parameters for an environment.
///
/// Falls back to `{ EnvironmentName: <environment> }` when no parameter file
/// exists.
pub fn resolve_parameters(parameters_dir: &Path, environment: &str, stack: &str) -> Result<Parameters, TemplateError> {
  let path = parameter_file_path(parameters_dir, environment, stack);

  let content = match fs::read_to_string(&path) {
    Ok(content) => content,
    Err(e) if e.kind() == io::ErrorKind::NotFound => {
      debug!(path = %path.display(), "no parameter file, using environment default");
      let mut parameters = Parameters::new();
      parameters.insert(DEFAULT_PARAMETER_KEY.to_string(), environment.to_string());
      return Ok(parameters);
    }
    Err(source) => return Err(TemplateError::Read { path, source }),
  };

  let file: ParameterFile =
    serde_json::from_str(&content).map_err(|source| TemplateError::ParameterFile { path: path.clone(), source })?;

  let parameters = match file {
    ParameterFile::Map(map) => map,
    ParameterFile::List(entries) => entries
      .into_iter()
      .map(|entry| (entry.parameter_key, entry.parameter_value))
      .collect(),
  };

  debug!(path = %path.display(), count = parameters.len(), "loaded parameter file");
  Ok(parameters)
}

/// Fill declared-but-unset parameters from upstream outputs, by name.
///
/// Returns the keys that were filled.
pub fn fill_from_upstream(parameters: &mut Parameters, declared: &[String], upstream: &Outputs) -> Vec<String> {
  let mut filled = Vec::new();
  for name in declared {
    if parameters.contains_key(name) {
      continue;
    }
    if let Some(value) = upstream.get(name) {
      parameters.insert(name.clone(), value.clone());
      filled.push(name.clone());
    }
  }
  filled
}
