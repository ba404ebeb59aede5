use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
  ($(#[$meta:meta])* $name:ident) => {
    $(#[$meta])*
    #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct $name(String);

    impl $name {
      pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
      }

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
      fn from(value: &str) -> Self {
        Self(value.to_string())
      }
    }

    impl From<String> for $name {
      fn from(value: String) -> Self {
        Self(value)
      }
    }

    impl Borrow<str> for $name {
      fn borrow(&self) -> &str {
        &self.0
      }
    }

    impl PartialEq<str> for $name {
      fn eq(&self, other: &str) -> bool {
        self.0 == other
      }
    }

    impl PartialEq<&str> for $name {
      fn eq(&self, other: &&str) -> bool {
        self.0 == *other
      }
    }
  };
}

string_id!(
  /// Identifies a node within its graph.
  NodeId
);
string_id!(
  /// Identifies a port within its node.
  PortId
);
string_id!(
  /// Identifies a graph within its project.
  GraphId
);
