//! Identifiers used across the threat model
//!
//! Server-issued identifiers are opaque strings. Only [`HolderId`] is ever
//! minted locally (one per editing session).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier
            #[inline]
            #[must_use]
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Borrow the raw identifier
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self::new(raw)
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }
    };
}

string_id! {
    /// Threat model identifier
    ModelId
}

string_id! {
    /// Attack tree identifier (scoped to a model)
    TreeId
}

string_id! {
    /// Correlation id carried by interrupt events and their acks
    CorrelationId
}

string_id! {
    /// Identity of a lock holder (user or session)
    HolderId
}

string_id! {
    /// Opaque server version stamp; only equality is meaningful
    VersionStamp
}

impl HolderId {
    /// Mint a fresh holder identity for this session
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = ModelId::new("tm-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"tm-42\"");

        let back: ModelId = serde_json::from_str("\"tm-42\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn generated_holders_differ() {
        assert_ne!(HolderId::generate(), HolderId::generate());
    }

    #[test]
    fn version_stamps_compare_by_value() {
        assert_eq!(VersionStamp::from("v1"), VersionStamp::new("v1".to_string()));
        assert_ne!(VersionStamp::from("v1"), VersionStamp::from("v2"));
    }
}
