//! Public client facade: a connection owns one gateway session.
//!
//! ```no_run
//! # async fn demo() -> aceql_client::AceQLResult<()> {
//! use aceql_client::AceQLConnection;
//!
//! let conn = AceQLConnection::open(
//!     "Server=http://localhost:9090/aceql;Database=sampledb;Username=user1;Password=password1",
//! ).await?;
//! let mut cmd = conn.create_command("SELECT customer_id, name FROM customer WHERE customer_id > @id");
//! cmd.parameters_mut().add_with_value("@id", 10)?;
//! let mut reader = cmd.execute_query().await?;
//! while reader.read().await? {
//!     println!("{:?} {:?}", reader.get_i64(0)?, reader.get_string(1)?);
//! }
//! conn.close().await;
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod reader;

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::config::ConnectionOptions;
use crate::error::{AceQLError, AceQLResult, ProtocolError};
use crate::protocol::action;
use crate::session::blob::{self, BlobReader};
use crate::session::store::{InMemorySessionStore, SessionStore};
use crate::session::transaction::{IsolationLevel, TransactionSequencer, TransactionState};
use crate::session::transport::SessionTransport;

pub use command::AceQLCommand;
pub use reader::AceQLDataReader;

pub struct AceQLConnection {
    transport: Arc<SessionTransport>,
    /// Serializes logical operations and owns the transaction state.
    /// An open data reader holds it until its result is finished.
    op_lock: Arc<Mutex<TransactionSequencer>>,
}

impl AceQLConnection {
    pub async fn open(connection_string: &str) -> AceQLResult<Self> {
        let options = ConnectionOptions::parse(connection_string)?;
        Self::open_with(options, Arc::new(InMemorySessionStore::new())).await
    }

    /// Open with explicit options and a session store that may be shared between connections.
    pub async fn open_with(options: ConnectionOptions, store: Arc<dyn SessionStore>) -> AceQLResult<Self> {
        let transport = SessionTransport::open(options, store).await?;
        Ok(Self { transport: Arc::new(transport), op_lock: Arc::new(Mutex::new(TransactionSequencer::new())) })
    }

    pub fn options(&self) -> &ConnectionOptions { self.transport.options() }
    pub fn session_id(&self) -> &str { self.transport.session_id() }
    pub fn is_closed(&self) -> bool { self.transport.is_closed() }
    pub(crate) fn transport(&self) -> &SessionTransport { &self.transport }
    pub(crate) fn op_lock(&self) -> &Mutex<TransactionSequencer> { &self.op_lock }
    pub(crate) async fn lock_owned(&self) -> OwnedMutexGuard<TransactionSequencer> { self.op_lock.clone().lock_owned().await }

    pub fn create_command(&self, sql: impl Into<String>) -> AceQLCommand<'_> { AceQLCommand::new(self, sql) }

    pub async fn transaction_state(&self) -> TransactionState { self.op_lock.lock().await.state() }

    pub async fn begin_transaction(&self, level: Option<IsolationLevel>) -> AceQLResult<()> {
        let mut tx = self.op_lock.lock().await;
        tx.begin(&self.transport, level).await
    }

    pub async fn commit(&self) -> AceQLResult<()> {
        let mut tx = self.op_lock.lock().await;
        tx.commit(&self.transport).await
    }

    pub async fn rollback(&self) -> AceQLResult<()> {
        let mut tx = self.op_lock.lock().await;
        tx.rollback(&self.transport).await
    }

    /// `false` starts a transaction; `true` commits the active one, if any.
    pub async fn set_auto_commit(&self, auto_commit: bool) -> AceQLResult<()> {
        let mut tx = self.op_lock.lock().await;
        match (auto_commit, tx.is_active()) {
            (false, false) => tx.begin(&self.transport, None).await,
            (true, true) => tx.commit(&self.transport).await,
            _ => Ok(()),
        }
    }

    pub async fn get_auto_commit(&self) -> AceQLResult<bool> {
        let value = self.session_value(action::GET_AUTO_COMMIT, None).await?;
        parse_flag(action::GET_AUTO_COMMIT, &value)
    }

    pub async fn set_read_only(&self, read_only: bool) -> AceQLResult<()> {
        let _guard = self.op_lock.lock().await;
        let flag = if read_only { "true" } else { "false" };
        self.transport.call_api_expect_ok(action::SET_READ_ONLY, Some(flag)).await?;
        Ok(())
    }

    pub async fn is_read_only(&self) -> AceQLResult<bool> {
        let value = self.session_value(action::IS_READ_ONLY, None).await?;
        parse_flag(action::IS_READ_ONLY, &value)
    }

    /// Isolation level as reported by the gateway, e.g. `read_committed`.
    pub async fn get_transaction_isolation_level(&self) -> AceQLResult<String> {
        self.session_value(action::GET_TRANSACTION_ISOLATION_LEVEL, None).await
    }

    pub async fn get_server_version(&self) -> AceQLResult<String> {
        self.session_value(action::GET_VERSION, None).await
    }

    pub async fn get_blob_length(&self, blob_id: &str) -> AceQLResult<i64> {
        let _guard = self.op_lock.lock().await;
        blob::get_length(&self.transport, blob_id).await
    }

    pub async fn download_blob(&self, blob_id: &str) -> AceQLResult<BlobReader> {
        let _guard = self.op_lock.lock().await;
        blob::download(&self.transport, blob_id).await
    }

    /// Best-effort disconnect; errors are logged, never returned.
    pub async fn close(&self) {
        let _guard = self.op_lock.lock().await;
        self.transport.close().await;
    }

    async fn session_value(&self, act: &str, param: Option<&str>) -> AceQLResult<String> {
        let _guard = self.op_lock.lock().await;
        let envelope = self.transport.call_api_expect_ok(act, param).await?;
        match envelope.get_value("result")? {
            Some(v) => Ok(v.to_string()),
            None => Err(AceQLError::Protocol(
                ProtocolError::new(0, format!("{} response has no result", act)).with_http_status(envelope.http_status()),
            )),
        }
    }
}

impl Drop for AceQLConnection {
    fn drop(&mut self) {
        if self.transport.is_closed() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let transport = self.transport.clone();
                handle.spawn(async move { transport.close().await });
            }
            Err(_) => debug!(target: "aceql::transport", "connection dropped outside a runtime; session {} left open", self.transport.session_id()),
        }
    }
}

fn parse_flag(act: &str, value: &str) -> AceQLResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(AceQLError::Protocol(ProtocolError::new(0, format!("{} returned a non-boolean result '{}'", act, other)))),
    }
}
