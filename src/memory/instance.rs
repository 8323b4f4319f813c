//! Heap Instances
//!
//! The heap never inspects user objects directly. It only needs a class
//! name and a snapshot of field values to derive an address and to list
//! objects for inspection.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Capability interface for anything that can live on the simulated heap.
pub trait Instance: Debug {
    /// Name of the class the object was constructed from.
    fn class_name(&self) -> &str;

    /// Current field values, used for hashing and inspection.
    fn field_snapshot(&self) -> Value;
}

/// Plain object with a class name and JSON fields.
///
/// This is what scenario bundles register for every declared service.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ObjectInstance {
    pub class_name: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl ObjectInstance {
    /// Creates an object with no fields.
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            fields: Map::new(),
        }
    }

    /// Sets a field value.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

impl Instance for ObjectInstance {
    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn field_snapshot(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}
