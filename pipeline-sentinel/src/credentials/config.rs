//! Credential tracking configuration
//!
//! Loaded from the `[credentials]` section of sentinel.toml.
//!
//! ```toml
//! [credentials]
//! warning_days = 14
//!
//! [credentials.rotation_days]
//! modal_token = 30
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::record::CredentialType;
use crate::clock::MAX_INTERVAL_SECS;

/// Credential tracking configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Days before expiry at which rotation is due (default: 14)
    #[serde(default = "default_warning_days")]
    pub warning_days: u32,

    /// Rotation interval overrides; unlisted kinds use their built-in interval
    #[serde(default)]
    pub rotation_days: BTreeMap<CredentialType, u32>,

    /// Seconds after which an abandoned rotation lease may be taken over (default: 300)
    #[serde(default = "default_rotation_lease_secs")]
    pub rotation_lease_secs: u64,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            warning_days: default_warning_days(),
            rotation_days: BTreeMap::new(),
            rotation_lease_secs: default_rotation_lease_secs(),
        }
    }
}

impl CredentialsConfig {
    /// Rotation interval for a credential kind
    pub fn rotation_days_for(&self, credential_type: CredentialType) -> u32 {
        self.rotation_days
            .get(&credential_type)
            .copied()
            .unwrap_or_else(|| credential_type.default_rotation_days())
    }

    /// Validate the configuration, returning an error message if invalid
    pub fn validate(&self) -> Result<(), String> {
        if let Some((kind, _)) = self.rotation_days.iter().find(|(_, days)| **days == 0) {
            return Err(format!("rotation_days.{kind} must be greater than 0"));
        }
        if self.rotation_lease_secs == 0 || self.rotation_lease_secs > MAX_INTERVAL_SECS {
            return Err(format!("rotation_lease_secs must be between 1 and {MAX_INTERVAL_SECS}"));
        }
        Ok(())
    }
}

fn default_warning_days() -> u32 {
    14
}

fn default_rotation_lease_secs() -> u64 {
    300
}
