//! # Line Protocol Encoding
//!
//! One event becomes one line:
//!
//! ```text
//! table,tag1=v1,tag2=v2 field1=v1,field2=v2 timestamp_ns\n
//! ```
//!
//! Names (table, tag keys, field keys) are validated rather than escaped and
//! must not contain separators. Tag values have spaces, commas and `=`
//! backslash-escaped. String fields are double-quoted with `"` and `\`
//! escaped and line breaks written as `\n`. Integers carry an `i` suffix,
//! floats always contain a decimal point, booleans are `t`/`f`. Without a
//! timestamp the store assigns the arrival time.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::{LineError, LineResult};

/// Table receiving [`LineEvent::trade`] lines.
pub const TRADES_TABLE: &str = "trades";
/// Table receiving [`LineEvent::orderbook`] lines.
pub const ORDERBOOKS_TABLE: &str = "orderbooks";
/// Table receiving [`LineEvent::orderbook_compact`] lines.
pub const ORDERBOOKS_COMPACT_TABLE: &str = "orderbooks_compact";

const SEPARATORS: &[char] = &[',', ' ', '=', '\n', '\r', '"', '\\'];

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Str(String),
}

impl FieldValue {
    /// Numbers without a fractional part become integers.
    pub fn from_json(name: &str, value: &Value) -> LineResult<Self> {
        match value {
            Value::Bool(b) => Ok(FieldValue::Bool(*b)),
            Value::String(s) => Ok(FieldValue::Str(s.clone())),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(FieldValue::Int(i)),
                None => n
                    .as_f64()
                    .map(FieldValue::Float)
                    .ok_or_else(|| LineError::UnsupportedValue(name.to_string())),
            },
            _ => Err(LineError::UnsupportedValue(name.to_string())),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

/// One row destined for the store.
#[derive(Debug, Clone, PartialEq)]
pub struct LineEvent {
    table: String,
    tags: Vec<(String, String)>,
    fields: Vec<(String, FieldValue)>,
    timestamp_ns: Option<i64>,
}

impl LineEvent {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            tags: Vec::new(),
            fields: Vec::new(),
            timestamp_ns: None,
        }
    }

    pub fn tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((name.into(), value.into()));
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// Designated timestamp in nanoseconds since the epoch.
    pub fn at(mut self, timestamp_ns: i64) -> Self {
        self.timestamp_ns = Some(timestamp_ns);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn tags(&self) -> &[(String, String)] {
        &self.tags
    }

    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    pub fn timestamp_ns(&self) -> Option<i64> {
        self.timestamp_ns
    }

    /// Encode as one newline-terminated protocol line.
    pub fn to_line(&self) -> LineResult<String> {
        if self.table.is_empty() {
            return Err(LineError::EmptyTable);
        }
        check_name("table", &self.table)?;
        if self.fields.is_empty() {
            return Err(LineError::NoFields(self.table.clone()));
        }

        let mut line = String::with_capacity(64);
        line.push_str(&self.table);
        for (name, value) in &self.tags {
            check_name("tag", name)?;
            if value.contains(&['\n', '\r'][..]) {
                return Err(LineError::InvalidTagValue(name.clone()));
            }
            line.push(',');
            line.push_str(name);
            line.push('=');
            escape_tag_value(&mut line, value);
        }
        for (i, (name, value)) in self.fields.iter().enumerate() {
            check_name("field", name)?;
            line.push(if i == 0 { ' ' } else { ',' });
            line.push_str(name);
            line.push('=');
            write_field_value(&mut line, name, value)?;
        }
        if let Some(ts) = self.timestamp_ns {
            let _ = write!(line, " {}", ts);
        }
        line.push('\n');
        Ok(line)
    }

    /// A trade print for the `trades` table.
    pub fn trade(trade: &Trade) -> Self {
        let mut event = LineEvent::new(TRADES_TABLE)
            .tag("exchange", trade.exchange.as_str())
            .tag("symbol", trade.symbol.as_str())
            .tag("side", trade.side.as_str())
            .tag("type", trade.kind.as_deref().unwrap_or("unknown"))
            .field("price", trade.price)
            .field("amount", trade.amount);
        if let Some(id) = &trade.trade_id {
            event = event.field("trade_id", id.as_str());
        }
        event.at(trade.timestamp_ns)
    }

    /// An order book snapshot with one price and size column per level, for
    /// the `orderbooks` table.
    pub fn orderbook(book: &OrderBookSnapshot, depth: usize) -> Self {
        let mut event = LineEvent::new(ORDERBOOKS_TABLE)
            .tag("exchange", book.exchange.as_str())
            .tag("symbol", book.symbol.as_str());
        for (i, (price, size)) in book.bids.iter().take(depth).enumerate() {
            event = event
                .field(format!("bid_{}_price", i), *price)
                .field(format!("bid_{}_size", i), *size);
        }
        for (i, (price, size)) in book.asks.iter().take(depth).enumerate() {
            event = event
                .field(format!("ask_{}_price", i), *price)
                .field(format!("ask_{}_size", i), *size);
        }
        event.at(book.timestamp_ns)
    }

    /// An order book snapshot with bids and asks stored as JSON arrays of
    /// `[price, size]`, for the `orderbooks_compact` table. `None` keeps every level.
    pub fn orderbook_compact(book: &OrderBookSnapshot, depth: Option<usize>) -> Self {
        let levels = |side: &[(f64, f64)]| {
            let take = depth.unwrap_or(side.len());
            let pairs: Vec<[f64; 2]> = side.iter().take(take).map(|(p, s)| [*p, *s]).collect();
            serde_json::to_string(&pairs).unwrap_or_else(|_| "[]".to_string())
        };
        LineEvent::new(ORDERBOOKS_COMPACT_TABLE)
            .tag("exchange", book.exchange.as_str())
            .tag("symbol", book.symbol.as_str())
            .field("bids", levels(&book.bids))
            .field("asks", levels(&book.asks))
            .at(book.timestamp_ns)
    }
}

/// Event time in nanoseconds from fractional epoch seconds, falling back to
/// the receipt time when the exchange gave none.
pub fn nanos_from_secs(timestamp: Option<f64>, receipt_timestamp: f64) -> i64 {
    let secs = timestamp.unwrap_or(receipt_timestamp);
    (secs * 1_000_000_000.0) as i64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub exchange: String,
    pub symbol: String,
    pub side: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub price: f64,
    pub amount: f64,
    #[serde(default)]
    pub trade_id: Option<String>,
    pub timestamp_ns: i64,
}

/// Price levels best-first.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub exchange: String,
    pub symbol: String,
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
    pub timestamp_ns: i64,
}

/// Event as read from JSON input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub table: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub fields: serde_json::Map<String, Value>,
    #[serde(default)]
    pub timestamp_ns: Option<i64>,
}

impl TryFrom<EventRecord> for LineEvent {
    type Error = LineError;

    fn try_from(record: EventRecord) -> LineResult<Self> {
        let mut event = LineEvent::new(record.table);
        for (name, value) in record.tags {
            event = event.tag(name, value);
        }
        for (name, value) in &record.fields {
            let value = FieldValue::from_json(name, value)?;
            event = event.field(name.as_str(), value);
        }
        if let Some(ts) = record.timestamp_ns {
            event = event.at(ts);
        }
        Ok(event)
    }
}

fn check_name(kind: &'static str, name: &str) -> LineResult<()> {
    if name.is_empty() || name.contains(SEPARATORS) {
        return Err(LineError::InvalidName {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

fn escape_tag_value(out: &mut String, value: &str) {
    for c in value.chars() {
        if matches!(c, ' ' | ',' | '=' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
}

fn write_field_value(out: &mut String, name: &str, value: &FieldValue) -> LineResult<()> {
    match value {
        FieldValue::Float(v) => {
            if !v.is_finite() {
                return Err(LineError::NonFinite(name.to_string()));
            }
            let text = v.to_string();
            out.push_str(&text);
            if !text.contains('.') {
                out.push_str(".0");
            }
        }
        FieldValue::Int(v) => {
            let _ = write!(out, "{}i", v);
        }
        FieldValue::Bool(v) => out.push(if *v { 't' } else { 'f' }),
        FieldValue::Str(s) => {
            out.push('"');
            for c in s.chars() {
                match c {
                    '"' => out.push_str("\\\""),
                    '\\' => out.push_str("\\\\"),
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    c => out.push(c),
                }
            }
            out.push('"');
        }
    }
    Ok(())
}
