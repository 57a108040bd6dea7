//! Credential kinds and their persisted metadata
//!
//! Only non-secret metadata is stored: the secret itself never leaves the
//! caller, and `key_prefix` keeps at most its first 8 characters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Known credential kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    SupabaseServiceRole,
    SupabaseAnon,
    ModalToken,
    GithubPat,
}

impl CredentialType {
    /// Every known kind
    pub const ALL: [CredentialType; 4] = [
        Self::SupabaseServiceRole,
        Self::SupabaseAnon,
        Self::ModalToken,
        Self::GithubPat,
    ];

    /// Stable key, also the store key
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SupabaseServiceRole => "supabase_service_role",
            Self::SupabaseAnon => "supabase_anon",
            Self::ModalToken => "modal_token",
            Self::GithubPat => "github_pat",
        }
    }

    /// Rotation interval when none is configured
    pub fn default_rotation_days(&self) -> u32 {
        match self {
            Self::ModalToken => 60,
            _ => 90,
        }
    }

    /// Format check for a new secret of this kind
    pub fn check_format(&self, secret: &str) -> Result<(), String> {
        let secret = secret.trim();
        match self {
            Self::SupabaseServiceRole | Self::SupabaseAnon => {
                if !secret.starts_with("eyJ") {
                    return Err("expected a JWT (eyJ...)".to_string());
                }
                if secret.len() < 100 {
                    return Err(format!("too short for a Supabase key ({} chars)", secret.len()));
                }
            }
            Self::ModalToken => {
                if secret.len() <= 20 {
                    return Err(format!("too short for a Modal token ({} chars)", secret.len()));
                }
            }
            Self::GithubPat => {
                if secret.is_empty() {
                    return Err("empty token".to_string());
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::UnknownCredential(s.to_string()))
    }
}

/// Non-secret identification fragment of a secret
pub fn key_prefix(secret: &str) -> String {
    if secret.chars().count() > 8 {
        format!("{}...", secret.chars().take(8).collect::<String>())
    } else {
        "***".to_string()
    }
}

/// Persisted metadata of one credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub credential_type: CredentialType,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_rotated: Option<DateTime<Utc>>,
    /// Successful rotations; only ever increases
    pub rotation_count: u64,
    pub is_active: bool,
    /// Empty until the first rotation
    #[serde(default)]
    pub key_prefix: String,
    pub updated_at: DateTime<Utc>,
    /// Lease held by an in-flight rotation
    #[serde(default)]
    pub rotation_started_at: Option<DateTime<Utc>>,
}

impl CredentialRecord {
    /// Baseline record for a credential that was never rotated
    pub fn new(credential_type: CredentialType, created_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            credential_type,
            created_at,
            expires_at: None,
            last_rotated: None,
            rotation_count: 0,
            is_active: true,
            key_prefix: String::new(),
            updated_at: now,
            rotation_started_at: None,
        }
    }

    /// Whole days until expiry, rounded away from zero; `None` without an expiry
    pub fn days_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires_at.map(|expires| days_away_from_zero((expires - now).num_seconds()))
    }

    /// Whether the expiry has passed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }
}

fn days_away_from_zero(seconds: i64) -> i64 {
    const DAY: i64 = 86_400;
    if seconds >= 0 {
        (seconds + DAY - 1) / DAY
    } else {
        -((-seconds + DAY - 1) / DAY)
    }
}

/// Derived rotation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialStatus {
    #[serde(rename = "EXPIRED")]
    Expired,
    #[serde(rename = "EXPIRING_SOON")]
    ExpiringSoon,
    #[serde(rename = "OK")]
    Ok,
    /// Not registered or no expiry set
    #[serde(rename = "N/A")]
    NotApplicable,
}

impl CredentialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expired => "EXPIRED",
            Self::ExpiringSoon => "EXPIRING_SOON",
            Self::Ok => "OK",
            Self::NotApplicable => "N/A",
        }
    }
}

impl fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a successful rotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationResult {
    pub credential_type: CredentialType,
    pub rotation_count: u64,
    pub previous_key_prefix: Option<String>,
    pub key_prefix: String,
    pub rotated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// One row of the rotation status projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialStatusReport {
    pub credential_type: CredentialType,
    pub status: CredentialStatus,
    pub needs_rotation: bool,
    pub days_until_expiry: Option<i64>,
    pub last_rotated: Option<DateTime<Utc>>,
    pub rotation_count: u64,
    pub is_active: bool,
}
