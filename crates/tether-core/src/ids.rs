//! Branded ID newtypes for type safety.
//!
//! The two identifier kinds in the protocol are distinct newtype wrappers
//! around `String`, so a request correlation id can never be passed where a
//! session id is expected.
//!
//! [`RequestId`] is UUID v4: correlation ids must be unguessable among
//! in-flight requests, and v4 carries 122 bits of randomness. [`SessionId`]
//! is UUID v7 (time-ordered), which keeps server logs sorted by connect
//! time.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $gen:path) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID.
            #[must_use]
            pub fn new() -> Self {
                Self($gen().to_string())
            }

            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Correlation identifier for an in-flight request (UUID v4).
    RequestId, Uuid::new_v4
}

branded_id! {
    /// Identifier for one live persistent connection (UUID v7, time-ordered).
    SessionId, Uuid::now_v7
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_new_is_uuid_v4() {
        let id = RequestId::new();
        let parsed = Uuid::parse_str(id.as_str()).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::Random));
    }

    #[test]
    fn session_id_new_is_uuid_v7() {
        let id = SessionId::new();
        let parsed = Uuid::parse_str(id.as_str()).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn ids_are_unique() {
        let a = RequestId::new();
        let b = RequestId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn from_string() {
        let id = RequestId::from_string("r1".to_owned());
        assert_eq!(id.as_str(), "r1");
    }

    #[test]
    fn from_str_ref() {
        let id = SessionId::from("abc-123");
        assert_eq!(id.as_str(), "abc-123");
    }

    #[test]
    fn deref_to_str() {
        let id = RequestId::from("r2");
        assert!(id.starts_with('r'));
    }

    #[test]
    fn display_matches_inner() {
        let id = SessionId::from("s-9");
        assert_eq!(format!("{id}"), "s-9");
    }

    #[test]
    fn serde_is_transparent() {
        let id = RequestId::from("r3");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"r3\"");
        let back: RequestId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
