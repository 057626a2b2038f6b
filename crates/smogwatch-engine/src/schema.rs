//! Event schema definitions

use serde::{Deserialize, Serialize};
use smogwatch_core::{Error, EventRecord, FieldType, Result};
use std::collections::BTreeMap;

/// Named event type with typed fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSchema {
    /// Event type name
    pub name: String,

    /// Field name → declared type
    pub fields: BTreeMap<String, FieldType>,
}

impl EventSchema {
    /// Create a schema with no fields
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Add a field
    pub fn with_field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(name.into(), field_type);
        self
    }

    /// Declared type of a field
    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.fields.get(name).copied()
    }

    /// Check that `record` carries every declared field with a compatible value
    pub fn validate(&self, record: &EventRecord) -> Result<()> {
        for (field, field_type) in &self.fields {
            match record.get(field) {
                None => {
                    return Err(Error::event(format!(
                        "{} is missing field '{}'",
                        self.name, field
                    )))
                }
                Some(value) if !field_type.accepts(value) => {
                    return Err(Error::event(format!(
                        "{}.{} expects {:?}, got {:?}",
                        self.name, field, field_type, value
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}
