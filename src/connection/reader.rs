//! Forward-only typed access to a streamed query result.

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::connection::command::ByteStream;
use crate::connection::AceQLConnection;
use crate::error::{AceQLError, AceQLResult};
use crate::protocol::row_parser::{Row, RowParser};
use crate::session::blob::{self, BlobReader};
use crate::session::transaction::TransactionSequencer;

/// Holds the connection lock until the last row is read, a read fails, or the
/// reader is closed. Dropping the reader drops the HTTP body, which aborts the transfer.
pub struct AceQLDataReader<'c> {
    conn: &'c AceQLConnection,
    parser: RowParser<ByteStream, Bytes>,
    current: Option<Row>,
    guard: Option<OwnedMutexGuard<TransactionSequencer>>,
}

impl<'c> AceQLDataReader<'c> {
    pub(crate) fn new(
        conn: &'c AceQLConnection,
        parser: RowParser<ByteStream, Bytes>,
        guard: OwnedMutexGuard<TransactionSequencer>,
    ) -> Self {
        Self { conn, parser, current: None, guard: Some(guard) }
    }

    /// Advance to the next row. `false` once the result is exhausted.
    pub async fn read(&mut self) -> AceQLResult<bool> {
        match self.parser.next_row().await {
            Ok(row) => {
                self.current = row;
                if self.current.is_none() {
                    self.release();
                }
                Ok(self.current.is_some())
            }
            Err(e) => {
                self.current = None;
                self.release();
                Err(e)
            }
        }
    }

    /// True while the reader still holds the connection.
    pub fn is_open(&self) -> bool { self.guard.is_some() }

    pub fn field_count(&self) -> usize {
        match &self.current {
            Some(row) => row.len(),
            None => self.parser.columns().map(|c| c.len()).unwrap_or(self.parser.column_types().len()),
        }
    }

    pub fn get_name(&self, ordinal: usize) -> AceQLResult<&str> {
        self.parser
            .columns()
            .and_then(|c| c.name(ordinal))
            .ok_or_else(|| AceQLError::argument(format!("no column at ordinal {}", ordinal)))
    }

    pub fn get_ordinal(&self, name: &str) -> AceQLResult<usize> {
        self.parser
            .columns()
            .and_then(|c| c.ordinal(name))
            .ok_or_else(|| AceQLError::argument(format!("no column named '{}'", name)))
    }

    /// SQL type name as reported by the gateway (`INTEGER`, `VARCHAR`, ...).
    pub fn get_data_type_name(&self, ordinal: usize) -> AceQLResult<&str> {
        self.parser
            .column_types()
            .get(ordinal)
            .map(String::as_str)
            .ok_or_else(|| AceQLError::argument(format!("no column type at ordinal {}", ordinal)))
    }

    pub fn is_db_null(&self, ordinal: usize) -> AceQLResult<bool> { self.row()?.is_null(ordinal) }

    /// Raw cell text; `None` for SQL NULL.
    pub fn get_value(&self, ordinal: usize) -> AceQLResult<Option<&str>> { self.row()?.value(ordinal) }

    pub fn get_string(&self, ordinal: usize) -> AceQLResult<Option<String>> {
        Ok(self.get_value(ordinal)?.map(str::to_string))
    }

    pub fn get_i32(&self, ordinal: usize) -> AceQLResult<Option<i32>> { self.parse_cell(ordinal, "i32") }

    pub fn get_i64(&self, ordinal: usize) -> AceQLResult<Option<i64>> { self.parse_cell(ordinal, "i64") }

    pub fn get_f64(&self, ordinal: usize) -> AceQLResult<Option<f64>> { self.parse_cell(ordinal, "f64") }

    pub fn get_bool(&self, ordinal: usize) -> AceQLResult<Option<bool>> {
        match self.get_value(ordinal)? {
            None => Ok(None),
            Some(v) => match v.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Ok(Some(true)),
                "false" | "f" | "0" => Ok(Some(false)),
                _ => Err(conversion_error(v, "bool", ordinal)),
            },
        }
    }

    /// Date/time cells arrive as epoch milliseconds; textual forms are accepted too.
    pub fn get_date_time(&self, ordinal: usize) -> AceQLResult<Option<DateTime<Utc>>> {
        match self.get_value(ordinal)? {
            None => Ok(None),
            Some(v) => parse_date_time(v).map(Some).ok_or_else(|| conversion_error(v, "DateTime<Utc>", ordinal)),
        }
    }

    /// Download the BLOB whose id is the cell value.
    pub async fn get_blob_stream(&self, ordinal: usize) -> AceQLResult<Option<BlobReader>> {
        let blob_id = match self.get_value(ordinal)? {
            None => return Ok(None),
            Some(id) => id.to_string(),
        };
        // a current row means the connection lock is still held by this reader
        blob::download(self.conn.transport(), &blob_id).await.map(Some)
    }

    /// Total row count, known once every row has been read.
    pub fn row_count(&self) -> Option<u64> { self.parser.row_count() }

    pub fn close(mut self) { self.release(); }

    fn release(&mut self) {
        if self.guard.take().is_some() {
            debug!(target: "aceql::rows", "result finished; connection released");
        }
    }

    fn row(&self) -> AceQLResult<&Row> {
        self.current.as_ref().ok_or_else(|| AceQLError::argument("no current row; call read() first"))
    }

    fn parse_cell<T: std::str::FromStr>(&self, ordinal: usize, type_name: &str) -> AceQLResult<Option<T>> {
        match self.get_value(ordinal)? {
            None => Ok(None),
            Some(v) => v.trim().parse::<T>().map(Some).map_err(|_| conversion_error(v, type_name, ordinal)),
        }
    }
}

fn conversion_error(value: &str, type_name: &str, ordinal: usize) -> AceQLError {
    AceQLError::argument(format!("cannot convert '{}' at ordinal {} to {}", value, ordinal, type_name))
}

fn parse_date_time(v: &str) -> Option<DateTime<Utc>> {
    let v = v.trim();
    if let Ok(ms) = v.parse::<i64>() {
        return DateTime::<Utc>::from_timestamp_millis(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(v) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(v, fmt) {
            return Some(dt.and_utc());
        }
    }
    NaiveDate::parse_from_str(v, "%Y-%m-%d").ok().map(|d| d.and_time(NaiveTime::MIN).and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn date_time_from_epoch_millis() {
        let dt = parse_date_time("1700000000123").unwrap();
        assert_eq!(dt.timestamp_millis(), 1_700_000_000_123);
    }

    #[test]
    fn date_time_from_text() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap();
        assert_eq!(parse_date_time("2024-03-01 10:30:00"), Some(expected));
        assert_eq!(parse_date_time("2024-03-01T10:30:00Z"), Some(expected));
        assert_eq!(parse_date_time("2024-03-01").unwrap().timestamp(), Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap().timestamp());
        assert!(parse_date_time("yesterday").is_none());
    }
}
