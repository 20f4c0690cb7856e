//! In-memory adapters for end-to-end testing
//!
//! [`StoreConnector`] is a line protocol connector whose "server" is a
//! [`MockTableStore`]: every received batch is parsed and committed as one
//! transaction per table, the way the real store commits a batch through its
//! write-ahead log. Tables are created on first write with a `timestamp`
//! column followed by tags and fields in order of appearance.

use async_trait::async_trait;
use log::debug;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use walbridge_ingest::{Connector, IngestError, IngestResult, LineSink};
use walbridge_sync::MockTableStore;

/// One decoded protocol line.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    pub table: String,
    pub tags: Vec<(String, String)>,
    pub fields: Vec<(String, Value)>,
    pub timestamp_ns: Option<i64>,
}

impl ParsedLine {
    fn store_type(value: &Value) -> &'static str {
        match value {
            Value::Bool(_) => "BOOLEAN",
            Value::Number(n) if n.is_i64() => "LONG",
            Value::Number(_) => "DOUBLE",
            _ => "STRING",
        }
    }
}

/// Split on `sep` outside quotes, honoring backslash escapes.
fn split_unescaped(s: &str, sep: char, quotes: bool) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    let mut in_quotes = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' if quotes => in_quotes = !in_quotes,
            c if c == sep && !in_quotes => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn parse_field(raw: &str) -> Result<Value, String> {
    if let Some(quoted) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        return Ok(Value::String(unescape(quoted)));
    }
    match raw {
        "t" | "true" => return Ok(Value::Bool(true)),
        "f" | "false" => return Ok(Value::Bool(false)),
        _ => {}
    }
    if let Some(int) = raw.strip_suffix('i') {
        return int
            .parse::<i64>()
            .map(|v| json!(v))
            .map_err(|e| format!("bad integer '{}': {}", raw, e));
    }
    raw.parse::<f64>()
        .map(|v| json!(v))
        .map_err(|e| format!("bad float '{}': {}", raw, e))
}

/// Decode one line (without its trailing newline).
pub fn parse_line(line: &str) -> Result<ParsedLine, String> {
    let sections = split_unescaped(line, ' ', true);
    if sections.len() < 2 || sections.len() > 3 {
        return Err(format!("malformed line: {}", line));
    }

    let mut head = split_unescaped(sections[0], ',', false).into_iter();
    let table = unescape(head.next().unwrap_or_default());
    let tags = head
        .map(|tag| {
            let kv = split_unescaped(tag, '=', false);
            match kv.as_slice() {
                [k, v] => Ok((unescape(k), unescape(v))),
                _ => Err(format!("malformed tag '{}'", tag)),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    let fields = split_unescaped(sections[1], ',', true)
        .into_iter()
        .map(|field| {
            let (k, v) = field
                .split_once('=')
                .ok_or_else(|| format!("malformed field '{}'", field))?;
            Ok((k.to_string(), parse_field(v)?))
        })
        .collect::<Result<Vec<_>, String>>()?;

    let timestamp_ns = match sections.get(2) {
        Some(ts) => Some(
            ts.parse::<i64>()
                .map_err(|e| format!("bad timestamp '{}': {}", ts, e))?,
        ),
        None => None,
    };

    Ok(ParsedLine {
        table,
        tags,
        fields,
        timestamp_ns,
    })
}

#[derive(Default)]
struct Layouts {
    columns: HashMap<String, Vec<String>>,
}

/// Connector that lands every line in a [`MockTableStore`].
#[derive(Clone)]
pub struct StoreConnector {
    store: MockTableStore,
    layouts: Arc<Mutex<Layouts>>,
}

impl StoreConnector {
    pub fn new(store: MockTableStore) -> Self {
        Self {
            store,
            layouts: Arc::new(Mutex::new(Layouts::default())),
        }
    }

    pub fn store(&self) -> &MockTableStore {
        &self.store
    }

    fn row_for(&self, line: &ParsedLine) -> Vec<Value> {
        let mut layouts = self.layouts.lock().unwrap_or_else(PoisonError::into_inner);
        let columns = layouts.columns.entry(line.table.clone()).or_insert_with(|| {
            if let Some(existing) = self.store.column_names(&line.table) {
                return existing;
            }
            let mut layout: Vec<(String, &str)> = vec![("timestamp".to_string(), "TIMESTAMP")];
            layout.extend(line.tags.iter().map(|(k, _)| (k.clone(), "SYMBOL")));
            layout.extend(
                line.fields
                    .iter()
                    .map(|(k, v)| (k.clone(), ParsedLine::store_type(v))),
            );
            let borrowed: Vec<(&str, &str)> = layout.iter().map(|(n, t)| (n.as_str(), *t)).collect();
            self.store.create_table(&line.table, &borrowed);
            layout.into_iter().map(|(n, _)| n).collect()
        });

        columns
            .iter()
            .map(|column| {
                if column == "timestamp" {
                    return line
                        .timestamp_ns
                        .map(|ns| json!(ns / 1_000))
                        .unwrap_or(Value::Null);
                }
                if let Some((_, v)) = line.tags.iter().find(|(k, _)| k == column) {
                    return Value::String(v.clone());
                }
                line.fields
                    .iter()
                    .find(|(k, _)| k == column)
                    .map(|(_, v)| v.clone())
                    .unwrap_or(Value::Null)
            })
            .collect()
    }
}

pub struct StoreSink {
    connector: StoreConnector,
}

#[async_trait]
impl Connector for StoreConnector {
    type Sink = StoreSink;

    async fn connect(&self) -> IngestResult<StoreSink> {
        Ok(StoreSink {
            connector: self.clone(),
        })
    }

    fn describe(&self) -> String {
        "in-memory store".to_string()
    }
}

#[async_trait]
impl LineSink for StoreSink {
    async fn send(&mut self, payload: &[u8]) -> IngestResult<()> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| IngestError::Transmission(format!("payload is not UTF-8: {}", e)))?;
        let mut by_table: Vec<(String, Vec<Vec<Value>>)> = Vec::new();
        for raw in text.lines().filter(|l| !l.is_empty()) {
            let line = parse_line(raw).map_err(IngestError::Transmission)?;
            let row = self.connector.row_for(&line);
            match by_table.iter_mut().find(|(t, _)| *t == line.table) {
                Some((_, rows)) => rows.push(row),
                None => by_table.push((line.table, vec![row])),
            }
        }
        for (table, rows) in by_table {
            let count = rows.len();
            let txn = self.connector.store.append(&table, rows);
            debug!("Committed {} rows to '{}' as txn {}", count, table, txn);
        }
        Ok(())
    }
}
