//! NewType wrappers for strong typing throughout the engine.
//!
//! These types prevent accidental mixing of semantically different strings
//! (e.g., passing a task type where a module id is expected).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Unique module identifier as declared in `manifest.yaml` (e.g., "command_executor").
    ///
    /// Ids are globally unique among discovered manifests and order
    /// lexicographically, which the router uses to break priority ties.
    ModuleId
);

newtype_string!(
    /// Declared task type tag (e.g., "generation", "analysis").
    ///
    /// Matched against the capability tags of executor manifests.
    TaskType
);

newtype_string!(
    /// Engine-assigned task identifier (a UUID v4 in string form).
    TaskId
);

newtype_string!(
    /// Key into the factory catalog naming the implementation a manifest binds to
    /// (e.g., "builtin:command").
    EntryPoint
);

impl TaskId {
    /// Generate a fresh random task id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}
