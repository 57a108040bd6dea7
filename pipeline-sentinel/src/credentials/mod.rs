//! Credential expiry and rotation tracking
//!
//! Keeps non-secret metadata for the credentials the pipeline depends on,
//! reports when rotation is due, gates use of expired credentials and
//! serialises rotations per credential kind across processes.

pub mod config;
pub mod record;
pub mod tracker;

pub use config::CredentialsConfig;
pub use record::{
    key_prefix, CredentialRecord, CredentialStatus, CredentialStatusReport, CredentialType, RotationResult,
};
pub use tracker::{CredentialTracker, ROTATION_WORKFLOW};
