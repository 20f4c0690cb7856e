//! Paged column reads over stores without OFFSET/LIMIT.
//!
//! The pager turns a 0-based `(offset, max_rows)` request into a 1-based
//! half-open window `(offset, offset + max_rows]` over either a dense
//! `ROW_NUMBER()` sequence or the persistent row identity. Both select the
//! same rows as long as the ordering column is a strict total order with ties
//! broken by insertion, which holds for append-only tables written in
//! timestamp order.

use arrow::array::{
    ArrayRef, BooleanArray, Float32Array, Float64Array, Int16Array, Int32Array, Int64Array,
    Int8Array, StringArray, TimestampMicrosecondArray,
};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDateTime};
use log::debug;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use crate::schema::{validate_identifier, TIMESTAMP_ZONE};
use crate::{
    BridgeError, BridgeResult, ColumnDef, ColumnType, EpochUnit, PagerConfig, PagingStrategy,
    RowWindow, TableSchema, TableStore,
};

const NAIVE_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

pub struct ColumnPager<S: TableStore> {
    store: Arc<S>,
    config: PagerConfig,
}

impl<S: TableStore> ColumnPager<S> {
    pub fn new(store: Arc<S>, config: PagerConfig) -> BridgeResult<Self> {
        validate_identifier("*", &config.order_by)?;
        if config.page_size == 0 {
            return Err(BridgeError::Config("page size must be positive".to_string()));
        }
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &PagerConfig {
        &self.config
    }

    /// Window selecting rows `[offset, offset + max_rows)` of the table.
    pub fn window_for(
        &self,
        schema: &TableSchema,
        offset: u64,
        max_rows: usize,
    ) -> BridgeResult<RowWindow> {
        let after = offset;
        let upto = offset.saturating_add(max_rows as u64);
        let use_row_id = match self.config.strategy {
            PagingStrategy::RowNumber => false,
            PagingStrategy::RowId if !schema.has_row_id() => {
                return Err(BridgeError::Config(
                    "row-id paging requested but the table has no row identity".to_string(),
                ))
            }
            PagingStrategy::RowId => true,
            PagingStrategy::Auto => schema.has_row_id(),
        };
        Ok(if use_row_id {
            RowWindow::RowId { after, upto }
        } else {
            RowWindow::RowNumber {
                order_by: self.config.order_by.clone(),
                after,
                upto,
            }
        })
    }

    /// Fetch up to `max_rows` values of `column` starting at 0-based `offset`.
    /// `max_rows` is clamped to the configured page size.
    pub async fn fetch(
        &self,
        table: &str,
        schema: &TableSchema,
        column: &str,
        offset: u64,
        max_rows: usize,
    ) -> BridgeResult<RecordBatch> {
        let def = schema
            .column(column)
            .ok_or_else(|| BridgeError::schema(table, format!("unknown column '{}'", column)))?;
        validate_identifier(table, column)?;

        let max_rows = max_rows.min(self.config.page_size);
        if max_rows == 0 {
            return build_batch(def, &[]);
        }

        let window = self.window_for(schema, offset, max_rows)?;
        let started = Instant::now();
        let values = self.store.select_column(table, column, &window).await?;
        debug!(
            "Fetched {}.{} offset={} max_rows={} -> {} rows in {:?}",
            table,
            column,
            offset,
            max_rows,
            values.len(),
            started.elapsed()
        );
        if values.len() > max_rows {
            return Err(BridgeError::Query(format!(
                "store returned {} rows for a window of {}",
                values.len(),
                max_rows
            )));
        }
        build_batch(def, &values)
    }
}

impl<S: TableStore> Clone for ColumnPager<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
        }
    }
}

/// Build a single-column batch for `def` from raw result values.
pub fn build_batch(def: &ColumnDef, values: &[Value]) -> BridgeResult<RecordBatch> {
    let column = def.name.as_str();
    let column_type = def.column_type;
    let decode_err = |message: String| BridgeError::Decode {
        column: column.to_string(),
        message,
    };

    let array: ArrayRef = match column_type {
        ColumnType::Timestamp => {
            let micros = values
                .iter()
                .map(|v| timestamp_micros(v, def.epoch_unit).map_err(&decode_err))
                .collect::<BridgeResult<Vec<_>>>()?;
            Arc::new(TimestampMicrosecondArray::from(micros).with_timezone(TIMESTAMP_ZONE))
        }
        ColumnType::Int64 => Arc::new(Int64Array::from(integers::<i64>(values, &decode_err)?)),
        ColumnType::Int32 => Arc::new(Int32Array::from(integers::<i32>(values, &decode_err)?)),
        ColumnType::Int16 => Arc::new(Int16Array::from(integers::<i16>(values, &decode_err)?)),
        ColumnType::Int8 => Arc::new(Int8Array::from(integers::<i8>(values, &decode_err)?)),
        ColumnType::Float64 => Arc::new(Float64Array::from(floats(values, &decode_err)?)),
        ColumnType::Float32 => Arc::new(Float32Array::from(
            floats(values, &decode_err)?
                .into_iter()
                .map(|v| v.map(|f| f as f32))
                .collect::<Vec<_>>(),
        )),
        ColumnType::Boolean => {
            let bools = values
                .iter()
                .map(|v| match v {
                    Value::Null => Ok(None),
                    Value::Bool(b) => Ok(Some(*b)),
                    other => Err(decode_err(format!("expected boolean, got {}", other))),
                })
                .collect::<BridgeResult<Vec<_>>>()?;
            Arc::new(BooleanArray::from(bools))
        }
        ColumnType::String => {
            let strings: Vec<Option<String>> = values
                .iter()
                .map(|v| match v {
                    Value::Null => None,
                    Value::String(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                })
                .collect();
            Arc::new(StringArray::from(strings))
        }
    };

    let schema = Arc::new(Schema::new(vec![Field::new(
        column,
        column_type.to_arrow(),
        true,
    )]));
    RecordBatch::try_new(schema, vec![array]).map_err(|e| decode_err(e.to_string()))
}

fn integers<T>(
    values: &[Value],
    decode_err: &impl Fn(String) -> BridgeError,
) -> BridgeResult<Vec<Option<T>>>
where
    T: TryFrom<i64>,
{
    values
        .iter()
        .map(|v| {
            let wide = match v {
                Value::Null => return Ok(None),
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            }
            .ok_or_else(|| decode_err(format!("expected integer, got {}", v)))?;
            T::try_from(wide)
                .map(Some)
                .map_err(|_| decode_err(format!("integer {} out of range", wide)))
        })
        .collect()
}

fn floats(
    values: &[Value],
    decode_err: &impl Fn(String) -> BridgeError,
) -> BridgeResult<Vec<Option<f64>>> {
    values
        .iter()
        .map(|v| match v {
            Value::Null => Ok(None),
            Value::Number(n) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| decode_err(format!("expected float, got {}", n))),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| decode_err(format!("expected float, got '{}'", s))),
            other => Err(decode_err(format!("expected float, got {}", other))),
        })
        .collect()
}

/// Microseconds since the epoch. Numbers are epoch integers in `unit`; text
/// without zone information is taken as UTC.
pub fn timestamp_micros(value: &Value, unit: EpochUnit) -> Result<Option<i64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_i64()
            .and_then(|v| unit.to_micros(v))
            .map(Some)
            .ok_or_else(|| format!("expected epoch {:?} integer, got {}", unit, n)),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(Some(dt.timestamp_micros()));
            }
            NAIVE_TIMESTAMP_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|naive| Some(naive.and_utc().timestamp_micros()))
                .ok_or_else(|| format!("unparseable timestamp '{}'", s))
        }
        other => Err(format!("expected timestamp, got {}", other)),
    }
}
