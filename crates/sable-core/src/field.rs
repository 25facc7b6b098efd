//! Tri-state optional field for outbound request bodies.
//!
//! PATCH-style endpoints distinguish between "leave unchanged" (the key is
//! absent) and "clear" (the key is present with `null`). [`Field`] makes
//! that distinction explicit:
//!
//! ```
//! use serde::Serialize;
//! use sable_core::Field;
//!
//! #[derive(Serialize)]
//! struct ModifyChannel {
//!     #[serde(skip_serializing_if = "Field::is_unset")]
//!     name: Field<String>,
//!     #[serde(skip_serializing_if = "Field::is_unset")]
//!     topic: Field<String>,
//! }
//!
//! let body = ModifyChannel { name: Field::Unset, topic: Field::Null };
//! assert_eq!(serde_json::to_string(&body).unwrap(), r#"{"topic":null}"#);
//! ```
//!
//! Deserializing a struct field marked `#[serde(default)]` yields
//! [`Field::Unset`] when the key is missing, [`Field::Null`] for `null`
//! and [`Field::Value`] otherwise.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A value that may be unspecified, explicitly null, or present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field<T> {
    /// Not specified; omitted from the wire payload.
    Unset,
    /// Explicitly cleared; sent as `null`.
    Null,
    /// A concrete value.
    Value(T),
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Self::Unset
    }
}

impl<T> Field<T> {
    /// Returns `true` if the field was not specified.
    #[must_use]
    pub const fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    /// Returns `true` if the field is explicitly null.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns `true` if the field carries a value.
    #[must_use]
    pub const fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    /// Borrow the inner value, if any.
    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        match self {
            Self::Value(v) => Some(v),
            Self::Unset | Self::Null => None,
        }
    }

    /// Convert `&Field<T>` to `Field<&T>`.
    #[must_use]
    pub const fn as_ref(&self) -> Field<&T> {
        match self {
            Self::Unset => Field::Unset,
            Self::Null => Field::Null,
            Self::Value(v) => Field::Value(v),
        }
    }

    /// Map the inner value, preserving `Unset` and `Null`.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Field<U> {
        match self {
            Self::Unset => Field::Unset,
            Self::Null => Field::Null,
            Self::Value(v) => Field::Value(f(v)),
        }
    }

    /// Collapse into nested options: `None` for unset, `Some(None)` for null.
    #[must_use]
    pub fn into_option(self) -> Option<Option<T>> {
        match self {
            Self::Unset => None,
            Self::Null => Some(None),
            Self::Value(v) => Some(Some(v)),
        }
    }

    /// Lift an `Option`, treating `None` as an explicit null.
    #[must_use]
    pub fn from_nullable(value: Option<T>) -> Self {
        value.map_or(Self::Null, Self::Value)
    }

    /// Lift an `Option`, treating `None` as unspecified.
    #[must_use]
    pub fn from_optional(value: Option<T>) -> Self {
        value.map_or(Self::Unset, Self::Value)
    }
}

impl<T> From<T> for Field<T> {
    fn from(value: T) -> Self {
        Self::Value(value)
    }
}

impl<T: Serialize> Serialize for Field<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            // Only reachable without `skip_serializing_if`; null is the
            // closest wire encoding.
            Self::Unset | Self::Null => serializer.serialize_none(),
            Self::Value(v) => v.serialize(serializer),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Field<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<T>::deserialize(deserializer).map(Self::from_nullable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Patch {
        #[serde(default, skip_serializing_if = "Field::is_unset")]
        nick: Field<String>,
        #[serde(default, skip_serializing_if = "Field::is_unset")]
        position: Field<u32>,
    }

    #[test]
    fn unset_fields_are_omitted() {
        let patch = Patch {
            nick: Field::Unset,
            position: Field::Unset,
        };
        assert_eq!(serde_json::to_string(&patch).unwrap(), "{}");
    }

    #[test]
    fn null_and_value_are_sent() {
        let patch = Patch {
            nick: Field::Null,
            position: Field::Value(3),
        };
        assert_eq!(
            serde_json::to_string(&patch).unwrap(),
            r#"{"nick":null,"position":3}"#
        );
    }

    #[test]
    fn deserialize_distinguishes_all_three_states() {
        let patch: Patch = serde_json::from_str(r#"{"nick":null}"#).unwrap();
        assert_eq!(patch.nick, Field::Null);
        assert_eq!(patch.position, Field::Unset);

        let patch: Patch = serde_json::from_str(r#"{"nick":"sable","position":1}"#).unwrap();
        assert_eq!(patch.nick, Field::Value("sable".into()));
        assert_eq!(patch.position, Field::Value(1));
    }

    #[test]
    fn option_conversions() {
        assert_eq!(Field::from_nullable(None::<u8>), Field::Null);
        assert_eq!(Field::from_optional(None::<u8>), Field::Unset);
        assert_eq!(Field::from(7u8).into_option(), Some(Some(7)));
        assert_eq!(Field::<u8>::Null.into_option(), Some(None));
        assert_eq!(Field::<u8>::Unset.into_option(), None);
    }

    #[test]
    fn map_preserves_state() {
        assert_eq!(Field::Value(2).map(|v: i32| v.to_string()), Field::Value("2".to_string()));
        assert_eq!(Field::<i32>::Null.map(|v| v.to_string()), Field::Null);
        assert_eq!(Field::<i32>::Unset.as_ref().value(), None);
    }
}
