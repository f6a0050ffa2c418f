pub mod outputformatter;

use std::time::Instant;

use serde::Serialize;

use crate::connection::AceQLDataReader;
use crate::error::AceQLResult;
use crate::session::IsolationLevel;

pub use outputformatter::{json_output_forced, print_result_table, render_table};

/// Fully materialized query result, for display.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub column_types: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
    pub elapsed_ms: Option<u64>,
}

impl ResultTable {
    /// Drain `reader` into memory. `started` is when the statement was sent.
    pub async fn collect(mut reader: AceQLDataReader<'_>, started: Instant) -> AceQLResult<Self> {
        let mut table = ResultTable::default();
        while reader.read().await? {
            if table.columns.is_empty() {
                table.columns = (0..reader.field_count()).map(|i| reader.get_name(i).map(str::to_string)).collect::<AceQLResult<_>>()?;
            }
            let row = (0..reader.field_count())
                .map(|i| reader.get_value(i).map(|v| v.map(str::to_string)))
                .collect::<AceQLResult<Vec<_>>>()?;
            table.rows.push(row);
        }
        table.column_types = (0..reader.field_count())
            .filter_map(|i| reader.get_data_type_name(i).ok().map(str::to_string))
            .collect();
        table.elapsed_ms = Some(started.elapsed().as_millis() as u64);
        Ok(table)
    }

    /// Rows as JSON objects keyed by column name.
    pub fn to_json(&self) -> serde_json::Value {
        let rows: Vec<serde_json::Value> = self
            .rows
            .iter()
            .map(|r| {
                let obj: serde_json::Map<String, serde_json::Value> = self
                    .columns
                    .iter()
                    .zip(r.iter())
                    .map(|(c, v)| (c.clone(), v.clone().map(serde_json::Value::String).unwrap_or(serde_json::Value::Null)))
                    .collect();
                serde_json::Value::Object(obj)
            })
            .collect();
        serde_json::json!({ "columns": self.columns, "column_types": self.column_types, "rows": rows, "elapsed_ms": self.elapsed_ms })
    }
}

/// One line of interactive input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Begin(Option<IsolationLevel>),
    Commit,
    Rollback,
    Status,
    Version,
    Help,
    Quit,
    Query(String),
    Update(String),
    Empty,
}

impl ReplCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let trimmed = line.trim().trim_end_matches(';').trim();
        if trimmed.is_empty() {
            return Ok(ReplCommand::Empty);
        }
        let lower = trimmed.to_ascii_lowercase();
        let mut words = lower.split_whitespace();
        let first = words.next().unwrap_or_default();
        let cmd = match first {
            "quit" | "exit" | "\\q" => ReplCommand::Quit,
            "help" | "\\?" => ReplCommand::Help,
            "status" => ReplCommand::Status,
            "version" => ReplCommand::Version,
            "commit" => ReplCommand::Commit,
            "rollback" => ReplCommand::Rollback,
            "begin" => {
                let rest: Vec<&str> = words.filter(|w| *w != "transaction" && *w != "isolation" && *w != "level").collect();
                if rest.is_empty() {
                    ReplCommand::Begin(None)
                } else {
                    let level = rest.join(" ").parse::<IsolationLevel>().map_err(|e| e.to_string())?;
                    ReplCommand::Begin(Some(level))
                }
            }
            "select" | "with" | "show" | "values" | "explain" => ReplCommand::Query(trimmed.to_string()),
            _ => ReplCommand::Update(trimmed.to_string()),
        };
        Ok(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_transaction_commands() {
        assert_eq!(ReplCommand::parse("BEGIN;").unwrap(), ReplCommand::Begin(None));
        assert_eq!(
            ReplCommand::parse("begin transaction isolation level read committed").unwrap(),
            ReplCommand::Begin(Some(IsolationLevel::ReadCommitted))
        );
        assert!(ReplCommand::parse("begin sideways").is_err());
        assert_eq!(ReplCommand::parse(" commit ").unwrap(), ReplCommand::Commit);
        assert_eq!(ReplCommand::parse("exit").unwrap(), ReplCommand::Quit);
        assert_eq!(ReplCommand::parse("   ").unwrap(), ReplCommand::Empty);
    }

    #[test]
    fn classifies_sql() {
        assert_eq!(ReplCommand::parse("SELECT 1;").unwrap(), ReplCommand::Query("SELECT 1".into()));
        assert_eq!(ReplCommand::parse("delete from t").unwrap(), ReplCommand::Update("delete from t".into()));
    }

    #[test]
    fn json_rows_keyed_by_column() {
        let t = ResultTable {
            columns: vec!["a".into(), "b".into()],
            column_types: vec![],
            rows: vec![vec![Some("1".into()), None]],
            elapsed_ms: None,
        };
        let v = t.to_json();
        assert_eq!(v["rows"][0]["a"], "1");
        assert!(v["rows"][0]["b"].is_null());
    }
}
