use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connection::reader::AceQLDataReader;
use crate::connection::AceQLConnection;
use crate::error::{AceQLError, AceQLResult};
use crate::protocol::action;
use crate::protocol::binder::{bind_statement, BoundStatement};
use crate::protocol::envelope::ResultEnvelope;
use crate::protocol::parameters::AceQLParameterCollection;
use crate::protocol::row_parser::RowParser;
use crate::session::blob::{self, ProgressIndicator, UploadProgress};

pub(crate) type ByteStream = BoxStream<'static, AceQLResult<Bytes>>;

const SQL_LOG_LIMIT: usize = 200;

/// SQL text plus its bound parameters, executed on one connection.
pub struct AceQLCommand<'c> {
    conn: &'c AceQLConnection,
    sql: String,
    parameters: AceQLParameterCollection,
    progress: Option<ProgressIndicator>,
    cancel: CancellationToken,
}

impl<'c> AceQLCommand<'c> {
    pub fn new(conn: &'c AceQLConnection, sql: impl Into<String>) -> Self {
        Self {
            conn,
            sql: sql.into(),
            parameters: AceQLParameterCollection::new(),
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn sql(&self) -> &str { &self.sql }

    pub fn set_sql(&mut self, sql: impl Into<String>) { self.sql = sql.into(); }

    pub fn parameters(&self) -> &AceQLParameterCollection { &self.parameters }

    pub fn parameters_mut(&mut self) -> &mut AceQLParameterCollection { &mut self.parameters }

    /// Report BLOB upload progress of this command into `indicator`.
    pub fn with_progress(mut self, indicator: ProgressIndicator) -> Self {
        self.progress = Some(indicator);
        self
    }

    /// Abort in-flight BLOB uploads when `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run an INSERT/UPDATE/DELETE (or a procedure call) and return the affected row count.
    /// OUT parameter values are written back into the parameter collection.
    pub async fn execute_update(&mut self) -> AceQLResult<i64> {
        let mut bound = bind_statement(&self.sql, &mut self.parameters)?;
        log_sql(action::EXECUTE_UPDATE, &bound.sql);

        let _guard = self.conn.op_lock().lock().await;
        self.upload_blobs(&mut bound).await?;
        let transport = self.conn.transport();
        let envelope = transport.post_expect_ok(action::EXECUTE_UPDATE, &bound.form_fields()).await?;

        for out in &bound.out_parameters {
            if let Some(value) = envelope.out_parameter(&out.name) {
                let value = value.map(str::to_string);
                if let Some(p) = self.parameters.get_mut(&out.name) {
                    p.set_out_value(value);
                }
            }
        }
        Ok(envelope.get_i64("row_count")?.unwrap_or(0))
    }

    /// Run a SELECT and return a forward-only reader over the streamed rows.
    /// Other operations on the connection wait until the reader is finished.
    pub async fn execute_query(&mut self) -> AceQLResult<AceQLDataReader<'c>> {
        let mut bound = bind_statement(&self.sql, &mut self.parameters)?;
        log_sql(action::EXECUTE_QUERY, &bound.sql);

        let guard = self.conn.lock_owned().await;
        self.upload_blobs(&mut bound).await?;
        let transport = self.conn.transport();
        let mut fields = bound.form_fields();
        fields.push(("gzip_result".to_string(), "false".to_string()));
        fields.push(("pretty_printing".to_string(), transport.options().pretty_printing().to_string()));
        fields.push(("column_types".to_string(), "true".to_string()));

        let resp = transport.post(action::EXECUTE_QUERY, &fields).await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ResultEnvelope::parse(&text, status.as_u16()).into_error());
        }
        let body: ByteStream = resp.bytes_stream().map(|r| r.map_err(AceQLError::from)).boxed();
        let parser = RowParser::open(body, status.as_u16()).await?;
        Ok(AceQLDataReader::new(self.conn, parser, guard))
    }

    async fn upload_blobs(&self, bound: &mut BoundStatement) -> AceQLResult<()> {
        if bound.blobs.is_empty() {
            return Ok(());
        }
        let progress = self.progress.clone().map(|p| UploadProgress::new(p, bound.total_blob_length()));
        for pending in bound.blobs.drain(..) {
            debug!(target: "aceql::blob", "parameter {} -> {}", pending.parameter, pending.blob_id);
            blob::upload(self.conn.transport(), &pending.blob_id, pending.stream, progress.as_ref(), &self.cancel).await?;
        }
        if let Some(p) = &progress {
            p.complete();
        }
        Ok(())
    }
}

fn log_sql(act: &str, sql: &str) {
    if sql.chars().count() > SQL_LOG_LIMIT {
        let head: String = sql.chars().take(SQL_LOG_LIMIT).collect();
        debug!(target: "aceql::transport", "{}: {}...", act, head);
    } else {
        debug!(target: "aceql::transport", "{}: {}", act, sql);
    }
}
