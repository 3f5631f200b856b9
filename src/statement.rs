//! Prepared statement descriptors.

use crate::protocol::backend::query::FieldDescription;
use crate::protocol::types::{FormatCode, Oid, preferred_format};

/// One result column of a statement or portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Data type OID
    pub type_oid: Oid,
    /// Wire format the driver will receive this column in
    pub format: FormatCode,
}

impl Column {
    /// Build a column from a RowDescription field, keeping the format the
    /// server reported (text for simple queries, whatever Bind requested for
    /// portals).
    pub fn from_field(field: &FieldDescription) -> Self {
        Self {
            name: field.name.clone(),
            type_oid: field.type_oid,
            format: field.format,
        }
    }

    /// Build a column from a statement Describe, annotated with the format
    /// a later Bind should request for this type.
    pub fn with_preferred_format(field: &FieldDescription) -> Self {
        Self {
            name: field.name.clone(),
            type_oid: field.type_oid,
            format: preferred_format(field.type_oid),
        }
    }
}

/// A prepared statement: its server-side name plus the metadata needed to
/// bind parameters and decode result rows.
#[derive(Debug, Clone, Default)]
pub struct Statement {
    /// Statement name; empty for the unnamed statement
    pub name: String,
    /// Parameter type OIDs, in placeholder order
    pub param_types: Vec<Oid>,
    /// Result columns; empty for statements returning no rows
    pub columns: Vec<Column>,
}

impl Statement {
    /// Per-column result formats for a Bind message.
    pub fn result_formats(&self) -> Vec<FormatCode> {
        self.columns.iter().map(|c| c.format).collect()
    }
}
