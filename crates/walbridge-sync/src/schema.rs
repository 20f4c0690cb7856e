//! Schema discovery from store metadata.

use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use log::debug;
use std::sync::Arc;

use crate::{BridgeError, BridgeResult, StoreColumn, TableStore};

/// Name of the store's hidden row identity column.
pub const ROW_ID_COLUMN: &str = "_rowid";

/// Zone applied to every timestamp column.
pub const TIMESTAMP_ZONE: &str = "UTC";

/// The portable type set columns are mapped onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// Microsecond timestamp in [`TIMESTAMP_ZONE`].
    Timestamp,
    Int64,
    Int32,
    Int16,
    Int8,
    Float64,
    Float32,
    Boolean,
    String,
}

impl ColumnType {
    /// Map a store-reported type name. Unrecognized types become strings.
    pub fn from_store_type(data_type: &str) -> Self {
        match data_type.trim().to_ascii_uppercase().as_str() {
            "TIMESTAMP" | "TIMESTAMP_NS" | "TIMESTAMPTZ" | "TIMESTAMP WITHOUT TIME ZONE"
            | "DATE" => ColumnType::Timestamp,
            "DOUBLE" | "DOUBLE PRECISION" => ColumnType::Float64,
            "FLOAT" | "REAL" => ColumnType::Float32,
            "INT" | "INTEGER" => ColumnType::Int32,
            "LONG" | "BIGINT" => ColumnType::Int64,
            "SHORT" | "SMALLINT" => ColumnType::Int16,
            "BYTE" | "TINYINT" => ColumnType::Int8,
            "BOOLEAN" | "BOOL" => ColumnType::Boolean,
            _ => ColumnType::String,
        }
    }

    pub fn to_arrow(self) -> DataType {
        match self {
            ColumnType::Timestamp => {
                DataType::Timestamp(TimeUnit::Microsecond, Some(TIMESTAMP_ZONE.into()))
            }
            ColumnType::Int64 => DataType::Int64,
            ColumnType::Int32 => DataType::Int32,
            ColumnType::Int16 => DataType::Int16,
            ColumnType::Int8 => DataType::Int8,
            ColumnType::Float64 => DataType::Float64,
            ColumnType::Float32 => DataType::Float32,
            ColumnType::Boolean => DataType::Boolean,
            ColumnType::String => DataType::Utf8,
        }
    }
}

/// Unit of the epoch integers a store returns for a timestamp column.
/// Timestamps given as text carry their own precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EpochUnit {
    Millis,
    Micros,
    Nanos,
}

impl EpochUnit {
    pub fn from_store_type(data_type: &str) -> Self {
        match data_type.trim().to_ascii_uppercase().as_str() {
            "DATE" => EpochUnit::Millis,
            "TIMESTAMP_NS" => EpochUnit::Nanos,
            _ => EpochUnit::Micros,
        }
    }

    /// Convert an epoch integer in this unit to microseconds.
    pub fn to_micros(self, value: i64) -> Option<i64> {
        match self {
            EpochUnit::Millis => value.checked_mul(1_000),
            EpochUnit::Micros => Some(value),
            EpochUnit::Nanos => Some(value.div_euclid(1_000)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    /// Only meaningful for [`ColumnType::Timestamp`].
    pub epoch_unit: EpochUnit,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            epoch_unit: EpochUnit::Micros,
        }
    }

    pub fn from_store(name: impl Into<String>, data_type: &str) -> Self {
        Self {
            name: name.into(),
            column_type: ColumnType::from_store_type(data_type),
            epoch_unit: EpochUnit::from_store_type(data_type),
        }
    }
}

/// Ordered, uniquely named columns of a table, without the row identity column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    columns: Vec<ColumnDef>,
    has_row_id: bool,
}

impl TableSchema {
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Whether the store exposes the hidden row identity for this table.
    pub fn has_row_id(&self) -> bool {
        self.has_row_id
    }

    pub fn to_arrow(&self) -> SchemaRef {
        Arc::new(Schema::new(
            self.columns
                .iter()
                .map(|c| Field::new(&c.name, c.column_type.to_arrow(), true))
                .collect::<Vec<_>>(),
        ))
    }

    /// Build a schema from raw store columns, dropping the row identity and
    /// duplicate names (first occurrence wins).
    pub fn from_store_columns(table: &str, raw: &[StoreColumn]) -> BridgeResult<Self> {
        let mut columns: Vec<ColumnDef> = Vec::with_capacity(raw.len());
        let mut has_row_id = false;
        for col in raw {
            if col.name.eq_ignore_ascii_case(ROW_ID_COLUMN) {
                has_row_id = true;
                continue;
            }
            if columns.iter().any(|c| c.name == col.name) {
                debug!("Skipping duplicate column '{}' in table '{}'", col.name, table);
                continue;
            }
            columns.push(ColumnDef::from_store(col.name.clone(), &col.data_type));
        }
        if columns.is_empty() {
            return Err(BridgeError::schema(table, "table not found or has no columns"));
        }
        Ok(Self {
            columns,
            has_row_id,
        })
    }
}

/// Reject names that could not be a plain table or column identifier.
pub fn validate_identifier(table: &str, name: &str) -> BridgeResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(BridgeError::schema(
            table,
            format!("invalid identifier '{}'", name),
        ))
    }
}

/// Resolves a table's portable schema from store metadata.
pub struct SchemaResolver<S: TableStore> {
    store: Arc<S>,
}

impl<S: TableStore> SchemaResolver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, table: &str) -> BridgeResult<TableSchema> {
        validate_identifier(table, table)?;
        let raw = self.store.describe_columns(table).await?;
        let schema = TableSchema::from_store_columns(table, &raw)?;
        debug!(
            "Resolved schema for '{}': {} columns (row id: {})",
            table,
            schema.len(),
            schema.has_row_id()
        );
        Ok(schema)
    }
}

impl<S: TableStore> Clone for SchemaResolver<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}
