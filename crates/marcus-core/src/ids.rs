use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! opaque_id {
    ($name:ident) => {
        /// Opaque identifier. Board-native IDs (arbitrary strings) and
        /// generated UUIDs are both valid values; Marcus never parses or
        /// interprets the contents.
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }
    };
}

opaque_id!(TaskId);
opaque_id!(ProjectId);
opaque_id!(AgentId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_do_not_compare_across_types_but_hold_equal_strings() {
        let task = TaskId::new("x1");
        let agent = AgentId::new("x1");
        assert_eq!(task.as_str(), agent.as_str());
    }

    #[test]
    fn generate_produces_distinct_ids() {
        assert_ne!(TaskId::generate(), TaskId::generate());
    }

    #[test]
    fn display_matches_as_str() {
        let id = ProjectId::new("proj-42");
        assert_eq!(id.to_string(), "proj-42");
    }
}
