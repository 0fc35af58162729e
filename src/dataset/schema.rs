//! Schema extraction from a loaded table.
//!
//! The descriptor is the single schema artifact shared by the translator
//! (rendered into the prompt) and the executor/synthesizer.

use crate::error::{QueryError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;

/// Abstract column type, independent of the engine's native type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    String,
    Integer,
    Float,
    Boolean,
    Datetime,
    Other,
}

impl SemanticType {
    /// Map a polars dtype onto the semantic enum. Never fails: anything
    /// unrecognised becomes [`SemanticType::Other`].
    pub fn from_dtype(dtype: &DataType) -> Self {
        if dtype.is_bool() {
            Self::Boolean
        } else if dtype.is_integer() {
            Self::Integer
        } else if dtype.is_float() || dtype.is_decimal() {
            Self::Float
        } else if dtype.is_temporal() {
            Self::Datetime
        } else if matches!(dtype, DataType::String) {
            Self::String
        } else {
            Self::Other
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Datetime => "datetime",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for SemanticType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaField {
    pub name: String,
    pub semantic_type: SemanticType,
    /// Engine type name, e.g. `str`, `i64`, `list[str]`.
    pub native_type: String,
}

/// Ordered column list of a loaded table.
///
/// Column order matches the physical order of the table and names are unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    fields: Vec<SchemaField>,
}

impl SchemaDescriptor {
    /// Build a descriptor from explicit fields.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Schema`] when `fields` is empty or contains
    /// duplicate names.
    pub fn new(fields: Vec<SchemaField>) -> Result<Self> {
        if fields.is_empty() {
            return Err(QueryError::Schema("table has no columns".to_owned()));
        }
        let mut seen = HashSet::with_capacity(fields.len());
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(QueryError::Schema(format!(
                    "duplicate column name: {}",
                    field.name
                )));
            }
        }
        Ok(Self { fields })
    }

    /// Inspect a loaded frame and derive its schema.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Schema`] when the frame has zero columns.
    pub fn extract(frame: &DataFrame) -> Result<Self> {
        let fields = frame
            .schema()
            .iter()
            .map(|(name, dtype)| SchemaField {
                name: name.to_string(),
                semantic_type: SemanticType::from_dtype(dtype),
                native_type: dtype.to_string(),
            })
            .collect();
        Self::new(fields)
    }

    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Case-insensitive column lookup.
    pub fn find(&self, name: &str) -> Option<&SchemaField> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// One `- name: semantic (native)` line per column, for prompts.
    pub fn render_for_prompt(&self) -> String {
        let mut out = String::new();
        for field in &self.fields {
            let _ = writeln!(
                out,
                "- {}: {} ({})",
                field.name, field.semantic_type, field.native_type
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pizza_frame() -> DataFrame {
        df!(
            "title" => &["Smith Street Pizza", "Gravesend Pizza"],
            "totalScore" => &[4.8, 4.6],
            "reviewsCount" => &[120i64, 80],
            "permanentlyClosed" => &[false, true]
        )
        .expect("valid frame")
    }

    #[test]
    fn test_extract_preserves_order_and_types() -> Result<()> {
        let schema = SchemaDescriptor::extract(&pizza_frame())?;
        let names: Vec<&str> = schema.column_names().collect();
        assert_eq!(
            names,
            ["title", "totalScore", "reviewsCount", "permanentlyClosed"]
        );

        let types: Vec<SemanticType> = schema.fields().iter().map(|f| f.semantic_type).collect();
        assert_eq!(
            types,
            [
                SemanticType::String,
                SemanticType::Float,
                SemanticType::Integer,
                SemanticType::Boolean
            ]
        );
        Ok(())
    }

    #[test]
    fn test_extract_empty_frame_fails() {
        let err = SchemaDescriptor::extract(&DataFrame::empty()).expect_err("no columns");
        assert!(matches!(err, QueryError::Schema(_)));
    }

    #[test]
    fn test_unmapped_types_fall_back_to_other() {
        let list_type = DataType::List(Box::new(DataType::String));
        assert_eq!(SemanticType::from_dtype(&list_type), SemanticType::Other);
        assert_eq!(SemanticType::from_dtype(&DataType::Null), SemanticType::Other);
        assert_eq!(
            SemanticType::from_dtype(&DataType::Datetime(TimeUnit::Milliseconds, None)),
            SemanticType::Datetime
        );
        assert_eq!(SemanticType::from_dtype(&DataType::UInt8), SemanticType::Integer);
    }

    #[test]
    fn test_floats_and_decimals_are_float() {
        assert_eq!(SemanticType::from_dtype(&DataType::Float32), SemanticType::Float);
        assert_eq!(SemanticType::from_dtype(&DataType::Float64), SemanticType::Float);
        assert_eq!(
            SemanticType::from_dtype(&DataType::Decimal(Some(10), Some(2))),
            SemanticType::Float
        );
        assert_eq!(SemanticType::from_dtype(&DataType::Int64), SemanticType::Integer);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let field = SchemaField {
            name: "a".to_owned(),
            semantic_type: SemanticType::String,
            native_type: "str".to_owned(),
        };
        let err = SchemaDescriptor::new(vec![field.clone(), field]).expect_err("duplicate");
        assert!(err.to_string().contains("duplicate column name: a"));
    }

    #[test]
    fn test_render_for_prompt() -> Result<()> {
        let schema = SchemaDescriptor::extract(&pizza_frame())?;
        let rendered = schema.render_for_prompt();
        assert!(rendered.contains("- title: string (str)"));
        assert!(rendered.contains("- reviewsCount: integer (i64)"));
        assert_eq!(rendered.lines().count(), 4);
        Ok(())
    }

    #[test]
    fn test_find_is_case_insensitive() -> Result<()> {
        let schema = SchemaDescriptor::extract(&pizza_frame())?;
        assert!(schema.find("TOTALSCORE").is_some());
        assert!(schema.find("phone").is_none());
        Ok(())
    }
}
