//! Forward-only row cursor over the gateway's streamed query result.
//!
//! Wire layout:
//! ```text
//! {
//!   "status": "OK",
//!   "column_types": ["INTEGER", "VARCHAR"],
//!   "query_rows": [
//!     { "row_1": [ { "customer_id": "1" }, { "name": "Smith" } ] },
//!     { "row_2": [ ... ] }
//!   ],
//!   "row_count": 2
//! }
//! ```
//! Only one row is materialized at a time. A column may legitimately be called
//! `row_count` or `row_N`; only the key found directly in the top-level object
//! (depth 1, outside `query_rows`) is treated as the trailing count.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::Stream;
use tracing::debug;

use crate::error::{AceQLError, AceQLResult, ProtocolError};
use crate::protocol::envelope::STATUS_OK;
use crate::protocol::json_pull::{JsonPullParser, JsonToken};

/// Cell value the gateway uses for SQL NULL.
pub const NULL_MARKER: &str = "NULL";

/// Column names of a result, built once from the first row and shared by every row.
#[derive(Debug, Default)]
pub struct ColumnIndex {
    names: Vec<String>,
    by_name: HashMap<String, usize>,
}

impl ColumnIndex {
    fn new(names: Vec<String>) -> Self {
        let mut by_name = HashMap::with_capacity(names.len());
        for (i, n) in names.iter().enumerate() {
            by_name.entry(n.clone()).or_insert(i);
        }
        Self { names, by_name }
    }

    pub fn len(&self) -> usize { self.names.len() }
    pub fn is_empty(&self) -> bool { self.names.is_empty() }
    pub fn name(&self, ordinal: usize) -> Option<&str> { self.names.get(ordinal).map(String::as_str) }

    /// Exact match first, then case-insensitive.
    pub fn ordinal(&self, name: &str) -> Option<usize> {
        if let Some(i) = self.by_name.get(name) { return Some(*i); }
        self.names.iter().position(|n| n.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone)]
pub struct Row {
    number: u64,
    values: Vec<Option<String>>,
    columns: Arc<ColumnIndex>,
}

impl Row {
    /// 1-based row number as sent by the gateway.
    pub fn number(&self) -> u64 { self.number }
    pub fn len(&self) -> usize { self.values.len() }
    pub fn is_empty(&self) -> bool { self.values.is_empty() }
    pub fn columns(&self) -> &ColumnIndex { &self.columns }

    pub fn value(&self, ordinal: usize) -> AceQLResult<Option<&str>> {
        self.values
            .get(ordinal)
            .map(|v| v.as_deref())
            .ok_or_else(|| AceQLError::argument(format!("column ordinal {} out of range (0..{})", ordinal, self.values.len())))
    }

    pub fn value_by_name(&self, name: &str) -> AceQLResult<Option<&str>> {
        let i = self
            .columns
            .ordinal(name)
            .ok_or_else(|| AceQLError::argument(format!("no column named '{}'", name)))?;
        self.value(i)
    }

    pub fn is_null(&self, ordinal: usize) -> AceQLResult<bool> { Ok(self.value(ordinal)?.is_none()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    InRows,
    Trailer,
    Done,
}

pub struct RowParser<S, B> {
    json: JsonPullParser<S, B>,
    column_types: Vec<String>,
    columns: Option<Arc<ColumnIndex>>,
    phase: Phase,
    cursor: u64,
    row_count: Option<u64>,
}

impl<S, B> RowParser<S, B>
where
    S: Stream<Item = AceQLResult<B>> + Unpin,
    B: AsRef<[u8]>,
{
    /// Reads the header (status, column types) up to the first row.
    /// A `FAIL` status in the stream is returned as a [`ProtocolError`].
    pub async fn open(source: S, http_status: u16) -> AceQLResult<Self> {
        let mut json = JsonPullParser::new(source);
        match json.next_token().await? {
            Some(JsonToken::StartObject) => {}
            Some(other) => return Err(malformed(format!("result must be a JSON object, found {:?}", other), http_status)),
            None => return Err(malformed("empty result body".to_string(), http_status)),
        }

        let mut status: Option<String> = None;
        let mut error_type: i32 = 0;
        let mut error_message: Option<String> = None;
        let mut stack_trace: Option<String> = None;
        let mut column_types: Vec<String> = Vec::new();
        let mut row_count: Option<u64> = None;
        let mut phase = Phase::Done;

        loop {
            match json.require_token().await? {
                JsonToken::Key(k) => match k.as_str() {
                    "status" => status = json.read_scalar().await?,
                    "error_type" => error_type = json.read_scalar().await?.and_then(|s| s.parse().ok()).unwrap_or(0),
                    "error_message" => error_message = json.read_scalar().await?,
                    "stack_trace" => stack_trace = json.read_scalar().await?,
                    "row_count" => row_count = parse_count(json.read_scalar().await?),
                    "column_types" => column_types = read_string_array(&mut json).await?,
                    "query_rows" => {
                        match json.require_token().await? {
                            JsonToken::StartArray => {}
                            other => return Err(malformed(format!("query_rows must be an array, found {:?}", other), http_status)),
                        }
                        phase = Phase::InRows;
                        break;
                    }
                    _ => json.skip_value().await?,
                },
                JsonToken::EndObject => break,
                other => return Err(malformed(format!("unexpected token in result header: {:?}", other), http_status)),
            }
        }

        if let Some(st) = status.as_deref() {
            if st != STATUS_OK {
                let p = ProtocolError::new(error_type, error_message.unwrap_or_else(|| format!("result stream reported status {}", st)))
                    .with_stack_trace(stack_trace)
                    .with_http_status(http_status);
                return Err(AceQLError::Protocol(p));
            }
        }
        debug!(target: "aceql::rows", "result header: {} column types, rows_follow={}", column_types.len(), phase == Phase::InRows);

        Ok(Self { json, column_types, columns: None, phase, cursor: 0, row_count })
    }

    /// Column type names in column order, as declared by the gateway.
    pub fn column_types(&self) -> &[String] { &self.column_types }

    /// Column names; known once the first row has been read.
    pub fn columns(&self) -> Option<&Arc<ColumnIndex>> { self.columns.as_ref() }

    /// Trailing `row_count`; known once the cursor has passed the last row.
    pub fn row_count(&self) -> Option<u64> { self.row_count }

    /// Number of the last row returned.
    pub fn cursor(&self) -> u64 { self.cursor }

    pub fn is_exhausted(&self) -> bool { self.phase != Phase::InRows }

    /// Advance to row `n` (1-based) and return it, or `None` when the result has
    /// no such row. Rows between the cursor and `n` are skipped without being built.
    pub async fn read_row(&mut self, n: u64) -> AceQLResult<Option<Row>> {
        if n == 0 || n <= self.cursor {
            return Err(AceQLError::argument(format!(
                "row cursor is forward-only: cannot read row {} after row {}",
                n, self.cursor
            )));
        }
        let wanted = format!("row_{}", n);
        while self.phase == Phase::InRows {
            match self.json.require_token().await? {
                JsonToken::EndArray => {
                    self.phase = Phase::Trailer;
                    self.read_trailer().await?;
                }
                JsonToken::StartObject => {
                    let mut found: Option<Row> = None;
                    loop {
                        match self.json.require_token().await? {
                            JsonToken::Key(k) if found.is_none() && k == wanted => {
                                found = Some(self.read_row_cells(n).await?);
                            }
                            JsonToken::Key(k) => {
                                if let Some(num) = k.strip_prefix("row_").and_then(|s| s.parse::<u64>().ok()) {
                                    if num > n {
                                        return Err(malformed(format!("row {} missing, found {}", n, k), 200));
                                    }
                                }
                                self.json.skip_value().await?;
                            }
                            JsonToken::EndObject => break,
                            other => return Err(malformed(format!("unexpected token in row wrapper: {:?}", other), 200)),
                        }
                    }
                    if let Some(row) = found {
                        self.cursor = n;
                        return Ok(Some(row));
                    }
                }
                other => return Err(malformed(format!("unexpected token in query_rows: {:?}", other), 200)),
            }
        }
        Ok(None)
    }

    /// Next row after the cursor.
    pub async fn next_row(&mut self) -> AceQLResult<Option<Row>> {
        let n = self.cursor + 1;
        self.read_row(n).await
    }

    async fn read_row_cells(&mut self, n: u64) -> AceQLResult<Row> {
        match self.json.require_token().await? {
            JsonToken::StartArray => {}
            other => return Err(malformed(format!("row_{} must be an array, found {:?}", n, other), 200)),
        }
        let build_names = self.columns.is_none();
        let mut names: Vec<String> = Vec::new();
        let mut values: Vec<Option<String>> = Vec::with_capacity(self.columns.as_ref().map(|c| c.len()).unwrap_or(8));
        loop {
            match self.json.require_token().await? {
                JsonToken::EndArray => break,
                JsonToken::StartObject => loop {
                    match self.json.require_token().await? {
                        JsonToken::Key(name) => {
                            let v = cell_value(self.json.require_token().await?)?;
                            if build_names { names.push(name); }
                            values.push(v);
                        }
                        JsonToken::EndObject => break,
                        other => return Err(malformed(format!("unexpected token in cell: {:?}", other), 200)),
                    }
                },
                other => return Err(malformed(format!("unexpected token in row_{}: {:?}", n, other), 200)),
            }
        }
        if build_names {
            self.columns = Some(Arc::new(ColumnIndex::new(names)));
        }
        let columns = self.columns.clone().unwrap_or_default();
        Ok(Row { number: n, values, columns })
    }

    async fn read_trailer(&mut self) -> AceQLResult<()> {
        loop {
            match self.json.require_token().await? {
                JsonToken::Key(k) if k == "row_count" && self.json.depth() == 1 => {
                    self.row_count = parse_count(self.json.read_scalar().await?);
                }
                JsonToken::Key(_) => self.json.skip_value().await?,
                JsonToken::EndObject => break,
                other => return Err(malformed(format!("unexpected token after query_rows: {:?}", other), 200)),
            }
        }
        self.phase = Phase::Done;
        if self.row_count.is_none() {
            self.row_count = Some(self.cursor);
        }
        debug!(target: "aceql::rows", "result exhausted: row_count={:?}", self.row_count);
        Ok(())
    }
}

/// Single forward pass returning only the top-level `row_count`.
pub struct RowCounter;

impl RowCounter {
    pub async fn count<S, B>(source: S) -> AceQLResult<u64>
    where
        S: Stream<Item = AceQLResult<B>> + Unpin,
        B: AsRef<[u8]>,
    {
        let mut json = JsonPullParser::new(source);
        let mut status: Option<String> = None;
        let mut error_type: i32 = 0;
        let mut error_message: Option<String> = None;
        let mut rows_seen: u64 = 0;
        while let Some(tok) = json.next_token().await? {
            match tok {
                JsonToken::Key(k) if json.depth() == 1 => match k.as_str() {
                    "row_count" => {
                        if let Some(n) = parse_count(json.read_scalar().await?) {
                            return Ok(n);
                        }
                    }
                    "status" => status = json.read_scalar().await?,
                    "error_type" => error_type = json.read_scalar().await?.and_then(|s| s.parse().ok()).unwrap_or(0),
                    "error_message" => error_message = json.read_scalar().await?,
                    _ => {}
                },
                // row wrappers sit at depth 3: object > query_rows > wrapper
                JsonToken::Key(k) if json.depth() == 3 && k.starts_with("row_") => rows_seen += 1,
                _ => {}
            }
        }
        if let Some(st) = status.as_deref() {
            if st != STATUS_OK {
                return Err(AceQLError::Protocol(ProtocolError::new(
                    error_type,
                    error_message.unwrap_or_else(|| format!("result stream reported status {}", st)),
                )));
            }
        }
        Ok(rows_seen)
    }
}

fn cell_value(tok: JsonToken) -> AceQLResult<Option<String>> {
    match tok {
        JsonToken::Str(s) if s == NULL_MARKER => Ok(None),
        JsonToken::Null => Ok(None),
        t if t.is_scalar() => Ok(t.scalar_text()),
        other => Err(malformed(format!("cell value must be a scalar, found {:?}", other), 200)),
    }
}

async fn read_string_array<S, B>(json: &mut JsonPullParser<S, B>) -> AceQLResult<Vec<String>>
where
    S: Stream<Item = AceQLResult<B>> + Unpin,
    B: AsRef<[u8]>,
{
    match json.require_token().await? {
        JsonToken::StartArray => {}
        other => return Err(malformed(format!("expected array, found {:?}", other), 200)),
    }
    let mut out = Vec::new();
    loop {
        match json.require_token().await? {
            JsonToken::EndArray => return Ok(out),
            t if t.is_scalar() => out.push(t.scalar_text().unwrap_or_default()),
            other => return Err(malformed(format!("expected string in array, found {:?}", other), 200)),
        }
    }
}

fn parse_count(v: Option<String>) -> Option<u64> {
    v.and_then(|s| s.trim().parse::<u64>().ok())
}

fn malformed(msg: String, http_status: u16) -> AceQLError {
    AceQLError::Protocol(ProtocolError::new(0, format!("malformed result stream: {}", msg)).with_http_status(http_status))
}

#[cfg(test)]
mod tests;
