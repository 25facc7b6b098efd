//! JSON body builder for partial updates.
//!
//! [`PatchBody`] collects named [`Field`]s into a JSON object: unset fields
//! are left out, null fields are sent as `null`.

use sable_core::Field;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::RestResult;

/// A JSON object assembled from tri-state fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PatchBody {
    fields: Map<String, Value>,
}

impl PatchBody {
    /// An empty body.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field. `Field::Unset` is skipped.
    ///
    /// # Errors
    ///
    /// Returns [`RestError::Serialization`](crate::RestError::Serialization)
    /// if the value cannot be serialized.
    pub fn field<T: Serialize>(mut self, name: &str, value: Field<T>) -> RestResult<Self> {
        match value {
            Field::Unset => {},
            Field::Null => {
                self.fields.insert(name.to_string(), Value::Null);
            },
            Field::Value(v) => {
                self.fields.insert(name.to_string(), serde_json::to_value(v)?);
            },
        }
        Ok(self)
    }

    /// Returns `true` if no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
