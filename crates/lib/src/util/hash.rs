//! Content hashing for rule identity.
//!
//! Rules are identified by a truncated SHA-256 of their JSON form, so two
//! registrations of the same rule map to the same [`RuleId`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::consts::RULE_ID_PREFIX_LEN;

pub type HashError = serde_json::Error;

/// A content-addressed rule identifier.
///
/// The id is a 20-character lowercase hex prefix of the SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleId(pub String);

impl std::fmt::Display for RuleId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

pub trait Hashable: Serialize {
  fn compute_hash(&self) -> Result<RuleId, HashError> {
    let serialized = serde_json::to_string(self)?;
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    let full = hex::encode(hasher.finalize());
    Ok(RuleId(full[..RULE_ID_PREFIX_LEN].to_string()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Serialize)]
  struct Thing {
    name: &'static str,
  }

  impl Hashable for Thing {}

  #[test]
  fn hash_is_deterministic_and_truncated() {
    let a = Thing { name: "x" }.compute_hash().unwrap();
    let b = Thing { name: "x" }.compute_hash().unwrap();
    assert_eq!(a, b);
    assert_eq!(a.0.len(), RULE_ID_PREFIX_LEN);
    assert!(a.0.chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn hash_changes_with_content() {
    let a = Thing { name: "x" }.compute_hash().unwrap();
    let b = Thing { name: "y" }.compute_hash().unwrap();
    assert_ne!(a, b);
  }
}
