//! Type-safe audit event identifiers
//!
//! Event ids follow the TypeID format `evt_<base32-encoded-uuidv7>`. UUIDv7 is
//! time-sortable, so lexical order of ids matches write order within a process.

use mti::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Globally unique identifier of an audit event.
///
/// ```rust
/// use pipeline_sentinel::ids::EventId;
/// use std::str::FromStr;
///
/// let id = EventId::new();
/// assert!(id.as_str().starts_with("evt_"));
///
/// let parsed = EventId::from_str(id.as_str()).unwrap();
/// assert_eq!(parsed, id);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(MagicTypeId);

impl EventId {
    /// The prefix used for event ids
    pub const PREFIX: &'static str = "evt";

    /// Creates a new event id with a UUIDv7.
    #[must_use]
    pub fn new() -> Self {
        Self(Self::PREFIX.create_type_id::<V7>())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns the prefix portion of the id.
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.0.prefix().as_str()
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = EventIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mti = MagicTypeId::from_str(s).map_err(EventIdError::Parse)?;

        if mti.prefix().as_str() != Self::PREFIX {
            return Err(EventIdError::InvalidPrefix {
                expected: Self::PREFIX.to_string(),
                actual: mti.prefix().as_str().to_string(),
            });
        }

        Ok(Self(mti))
    }
}

impl AsRef<str> for EventId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl From<EventId> for String {
    fn from(id: EventId) -> Self {
        id.0.to_string()
    }
}

impl Serialize for EventId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Error type for event id parsing.
#[derive(Debug, thiserror::Error)]
pub enum EventIdError {
    /// The id could not be parsed as a valid TypeID.
    #[error("failed to parse event ID: {0}")]
    Parse(#[from] MagicTypeIdError),

    /// The prefix was not the expected value.
    #[error("invalid prefix: expected '{expected}', got '{actual}'")]
    InvalidPrefix {
        /// The expected prefix.
        expected: String,
        /// The actual prefix found.
        actual: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_id_new() {
        let id = EventId::new();
        assert_eq!(id.prefix(), "evt");
        // prefix (3) + underscore (1) + suffix (26)
        assert_eq!(id.as_str().len(), 30);
    }

    #[test]
    fn test_event_id_rejects_foreign_prefix() {
        match EventId::from_str("req_01h455vb4pex5vsknk084sn02q") {
            Err(EventIdError::InvalidPrefix { expected, actual }) => {
                assert_eq!(expected, "evt");
                assert_eq!(actual, "req");
            }
            other => panic!("expected InvalidPrefix, got {other:?}"),
        }
        assert!(EventId::from_str("evt_invalid").is_err());
    }

    #[test]
    fn test_event_id_serde_as_plain_string() {
        let id = EventId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
        let back: EventId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_event_ids_are_time_ordered() {
        let a = EventId::new();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = EventId::new();
        assert!(a < b);
    }
}
