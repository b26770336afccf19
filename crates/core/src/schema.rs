//! Table schema: a depth-first list of fields
//!
//! Each field has a stable integer id. Nested fields point at their parent
//! through `parent_id`; top-level fields use [`ROOT_PARENT_ID`]. Field ids are
//! what data files and indices refer to, so renames and reorders never
//! invalidate them.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Parent id of a top-level field
pub const ROOT_PARENT_ID: i32 = -1;

/// One column (or nested child) of the table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Stable field id, unique within the schema
    pub id: i32,
    /// Parent field id, or [`ROOT_PARENT_ID`]
    pub parent_id: i32,
    /// Field name
    pub name: String,
    /// Logical type name understood by the file format (e.g. "int64", "struct")
    pub logical_type: String,
    /// Whether the field may hold nulls
    pub nullable: bool,
}

impl Field {
    /// Create a nullable top-level field
    pub fn new(id: i32, name: impl Into<String>, logical_type: impl Into<String>) -> Self {
        Field {
            id,
            parent_id: ROOT_PARENT_ID,
            name: name.into(),
            logical_type: logical_type.into(),
            nullable: true,
        }
    }

    /// Set the parent field (builder pattern)
    pub fn with_parent(mut self, parent_id: i32) -> Self {
        self.parent_id = parent_id;
        self
    }

    /// Set nullability (builder pattern)
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// True if this field has no parent
    pub fn is_top_level(&self) -> bool {
        self.parent_id == ROOT_PARENT_ID
    }
}

/// Ordered list of fields plus free-form metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Fields in depth-first order
    pub fields: Vec<Field>,
    /// Schema-level metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Schema {
    /// Create and validate a schema
    pub fn new(fields: Vec<Field>) -> Result<Self> {
        let schema = Schema {
            fields,
            metadata: BTreeMap::new(),
        };
        schema.validate()?;
        Ok(schema)
    }

    /// Check id uniqueness and depth-first parent ordering.
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for field in &self.fields {
            if field.id < 0 {
                return Err(Error::invalid_input(format!(
                    "field '{}' has negative id {}",
                    field.name, field.id
                )));
            }
            if field.parent_id != ROOT_PARENT_ID && !seen.contains(&field.parent_id) {
                return Err(Error::invalid_input(format!(
                    "field '{}' references parent {} which does not precede it",
                    field.name, field.parent_id
                )));
            }
            if !seen.insert(field.id) {
                return Err(Error::invalid_input(format!(
                    "duplicate field id {}",
                    field.id
                )));
            }
        }
        Ok(())
    }

    /// Largest field id, or `None` for an empty schema
    pub fn max_field_id(&self) -> Option<i32> {
        self.fields.iter().map(|f| f.id).max()
    }

    /// Look up a field by id
    pub fn field(&self, id: i32) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Look up a top-level field by name
    pub fn field_by_name(&self, name: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|f| f.is_top_level() && f.name == name)
    }

    /// True if the schema contains the field id
    pub fn contains(&self, id: i32) -> bool {
        self.field(id).is_some()
    }

    /// All field ids
    pub fn field_ids(&self) -> BTreeSet<i32> {
        self.fields.iter().map(|f| f.id).collect()
    }

    /// Number of fields, including nested ones
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if there are no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Keep only the given fields and their ancestors, preserving order.
    pub fn project(&self, ids: &BTreeSet<i32>) -> Schema {
        let mut keep: BTreeSet<i32> = BTreeSet::new();
        for &id in ids {
            let mut cursor = self.field(id);
            while let Some(field) = cursor {
                if !keep.insert(field.id) {
                    break;
                }
                cursor = if field.is_top_level() {
                    None
                } else {
                    self.field(field.parent_id)
                };
            }
        }
        Schema {
            fields: self
                .fields
                .iter()
                .filter(|f| keep.contains(&f.id))
                .cloned()
                .collect(),
            metadata: self.metadata.clone(),
        }
    }

    /// Field ids present in `self` but absent from `other`
    pub fn removed_in(&self, other: &Schema) -> BTreeSet<i32> {
        let remaining = other.field_ids();
        self.field_ids()
            .into_iter()
            .filter(|id| !remaining.contains(id))
            .collect()
    }
}
