//! Stage fingerprints: stable hashes of inputs plus relevant config

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// A stable cache key for one stage invocation
///
/// Two invocations with identical inputs and identical stage config hash to
/// the same fingerprint; changing any recognized option changes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    stage: &'static str,
    digest: String,
}

impl Fingerprint {
    /// Hash the stage name together with its serialized inputs and config
    pub fn compute<I: Serialize, C: Serialize>(
        stage: &'static str,
        inputs: &I,
        config: &C,
    ) -> Result<Self> {
        // serde_json maps are ordered, so serialization is deterministic
        let inputs = serde_json::to_vec(inputs)
            .map_err(|e| Error::Cache(format!("fingerprint inputs: {e}")))?;
        let config = serde_json::to_vec(config)
            .map_err(|e| Error::Cache(format!("fingerprint config: {e}")))?;

        let mut hasher = Sha256::new();
        hasher.update(stage.as_bytes());
        hasher.update([0u8]);
        hasher.update(&inputs);
        hasher.update([0u8]);
        hasher.update(&config);

        Ok(Self {
            stage,
            digest: hex::encode(hasher.finalize()),
        })
    }

    /// Stage this fingerprint belongs to
    pub fn stage(&self) -> &'static str {
        self.stage
    }

    /// Full cache key, prefixed by stage for scoped invalidation
    pub fn key(&self) -> String {
        format!("{}:{}", self.stage, self.digest)
    }

    /// Short form for log lines
    pub fn short(&self) -> &str {
        &self.digest[..12]
    }
}
