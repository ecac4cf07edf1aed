//! Content hashing for template references.
//!
//! A template reference is a truncated SHA-256 of the template body. Two
//! templates with identical bytes always share a reference, which lets the
//! control plane and the orchestrator compare definitions cheaply.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::consts::TEMPLATE_REF_LEN;

/// Opaque identifier of a template's content.
///
/// The reference is a lowercase hexadecimal string of
/// [`TEMPLATE_REF_LEN`] characters, e.g. `"a1b2c3d4e5f6789012ab"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TemplateRef(pub String);

impl std::fmt::Display for TemplateRef {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Full 64-character SHA-256 of arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(data);
  format!("{:x}", hasher.finalize())
}

/// Compute the template reference for a template body.
pub fn template_ref(body: &str) -> TemplateRef {
  let full = hash_bytes(body.as_bytes());
  TemplateRef(full[..TEMPLATE_REF_LEN].to_string())
}
