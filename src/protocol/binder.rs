//! Statement parameter binding.
//!
//! Named `@placeholders` are resolved against the command's parameter collection,
//! numbered by first appearance in the SQL text and rewritten to `?`. The result is
//! the ordered list of form fields the gateway expects plus the BLOB streams that
//! must be uploaded before the statement is posted.

use std::collections::HashSet;

use chrono::{NaiveTime, Timelike};
use tracing::debug;

use crate::error::{AceQLError, AceQLResult};
use crate::protocol::parameters::{AceQLParameterCollection, BlobStream, ParameterValue};

/// Characters that end an SQL token when scanning for placeholders.
const SEPARATORS: &[char] = &[
    '(', ')', ';', '+', '-', '/', '*', '=', '\'', '"', '?', '!', ':', '#', '&', '<', '>', '{', '}', '[', ']', '|', '%', ',',
];

fn is_separator(c: char) -> bool { c.is_whitespace() || SEPARATORS.contains(&c) }

/// Stream waiting to be uploaded under `blob_id` before the statement runs.
#[derive(Debug)]
pub struct PendingBlob {
    pub blob_id: String,
    pub parameter: String,
    pub stream: BlobStream,
}

impl PendingBlob {
    pub fn length(&self) -> u64 { self.stream.length() }
}

/// OUT/INOUT parameter and the 1-based index it was sent under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutParameter {
    pub index: usize,
    pub name: String,
}

#[derive(Debug)]
pub struct BoundStatement {
    /// SQL with every placeholder replaced by `?`.
    pub sql: String,
    /// Placeholder names in positional order.
    pub placeholders: Vec<String>,
    /// `param_type_i` / `param_value_i` / direction fields, in index order.
    pub parameter_fields: Vec<(String, String)>,
    pub blobs: Vec<PendingBlob>,
    pub out_parameters: Vec<OutParameter>,
}

impl BoundStatement {
    pub fn is_prepared(&self) -> bool { !self.placeholders.is_empty() }

    /// Complete form body: `sql`, `prepared_statement`, then the parameter fields.
    pub fn form_fields(&self) -> Vec<(String, String)> {
        let mut fields = Vec::with_capacity(self.parameter_fields.len() + 2);
        fields.push(("sql".to_string(), self.sql.clone()));
        fields.push(("prepared_statement".to_string(), self.is_prepared().to_string()));
        fields.extend(self.parameter_fields.iter().cloned());
        fields
    }

    /// Sum of the declared lengths of every pending blob.
    pub fn total_blob_length(&self) -> u64 { self.blobs.iter().map(PendingBlob::length).sum() }
}

/// Placeholder names in first-appearance order and the SQL rewritten with `?`.
pub fn scan_placeholders(sql: &str) -> AceQLResult<(Vec<String>, String)> {
    let mut names: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut rewritten = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut token_start = true;

    while let Some(c) = chars.next() {
        if is_separator(c) {
            rewritten.push(c);
            token_start = true;
            continue;
        }
        if c == '@' && token_start {
            let mut name = String::from("@");
            while let Some(&n) = chars.peek() {
                if is_separator(n) { break; }
                name.push(n);
                chars.next();
            }
            if name.len() > 1 {
                if !seen.insert(name.clone()) {
                    return Err(AceQLError::binding(format!("duplicate parameter in SQL command: {}", name)));
                }
                names.push(name);
                rewritten.push('?');
            } else {
                rewritten.push('@');
            }
            token_start = false;
            continue;
        }
        rewritten.push(c);
        token_start = false;
    }
    Ok((names, rewritten))
}

/// Bind `params` to `sql`. BLOB streams are moved out of the collection, so a
/// second bind of the same collection fails for those parameters.
pub fn bind_statement(sql: &str, params: &mut AceQLParameterCollection) -> AceQLResult<BoundStatement> {
    let (placeholders, rewritten) = scan_placeholders(sql)?;

    if let Some(missing) = placeholders.iter().find(|p| params.get(p).is_none()) {
        return Err(AceQLError::binding(format!("missing parameter value: {}", missing)));
    }
    for p in params.iter() {
        if !placeholders.iter().any(|ph| ph == p.name()) {
            debug!(target: "aceql::binder", "parameter {} is not referenced in the SQL and is ignored", p.name());
        }
    }

    let mut fields: Vec<(String, String)> = Vec::new();
    let mut blobs: Vec<PendingBlob> = Vec::new();
    let mut outs: Vec<OutParameter> = Vec::new();

    for (i, name) in placeholders.iter().enumerate() {
        let index = i + 1;
        let param = params
            .get_mut(name)
            .ok_or_else(|| AceQLError::binding(format!("missing parameter value: {}", name)))?;
        let direction = param.direction();
        let (type_tag, value) = match param.value_mut() {
            ParameterValue::Blob(stream) => {
                let reader = stream
                    .take_reader()
                    .ok_or_else(|| AceQLError::binding(format!("BLOB stream of parameter {} was already consumed", name)))?;
                let length = stream.length();
                let blob_id = new_blob_id();
                blobs.push(PendingBlob { blob_id: blob_id.clone(), parameter: name.clone(), stream: BlobStream::from_boxed(reader, length) });
                ("BLOB".to_string(), blob_id)
            }
            other => encode_scalar(other),
        };
        fields.push((format!("param_type_{}", index), type_tag));
        fields.push((format!("param_value_{}", index), value));
        if direction.returns_value() {
            fields.push((format!("param_direction_{}", index), direction.wire_name().to_string()));
            fields.push((format!("out_param_name_{}", index), name.trim_start_matches('@').to_string()));
            outs.push(OutParameter { index, name: name.clone() });
        }
    }

    debug!(target: "aceql::binder", "bound {} parameter(s), {} blob(s)", placeholders.len(), blobs.len());
    Ok(BoundStatement { sql: rewritten, placeholders, parameter_fields: fields, blobs, out_parameters: outs })
}

/// Wire type tag and text value of a non-BLOB parameter.
pub fn encode_scalar(value: &ParameterValue) -> (String, String) {
    let t = value.sql_type().wire_name().to_string();
    match value {
        ParameterValue::Null(sql_type) => (sql_type.null_tag(), "NULL".to_string()),
        ParameterValue::String(s) => (t, s.clone()),
        ParameterValue::TinyInt(v) => (t, v.to_string()),
        ParameterValue::SmallInt(v) => (t, v.to_string()),
        ParameterValue::Integer(v) => (t, v.to_string()),
        ParameterValue::BigInt(v) => (t, v.to_string()),
        ParameterValue::Real(v) => (t, format_float(*v as f64, v.to_string())),
        ParameterValue::Double(v) => (t, format_float(*v, v.to_string())),
        ParameterValue::Bool(v) => (t, v.to_string()),
        ParameterValue::Timestamp(ts) => (t, ts.timestamp_millis().to_string()),
        ParameterValue::Date(d) => (t, d.and_time(NaiveTime::MIN).and_utc().timestamp_millis().to_string()),
        ParameterValue::Time(tm) => (t, time_millis(tm).to_string()),
        ParameterValue::Blob(_) => (t, String::new()),
    }
}

fn format_float(v: f64, shown: String) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else {
        shown
    }
}

/// Milliseconds of a time of day on 1970-01-01 UTC.
fn time_millis(t: &NaiveTime) -> i64 {
    let ms = (t.nanosecond() / 1_000_000).min(999) as i64;
    t.num_seconds_from_midnight() as i64 * 1000 + ms
}

pub fn new_blob_id() -> String { format!("{}.blob", uuid::Uuid::new_v4().simple()) }
