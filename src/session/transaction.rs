//! Client-side transaction state and the gateway calls that drive it.
//!
//! ```text
//! NoTransaction --begin--> Active --commit/rollback--> NoTransaction
//! ```
//! A failed commit leaves the state `Active` so the caller can still roll back.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use tracing::{debug, info, warn};

use crate::error::{AceQLError, AceQLResult};
use crate::protocol::action;
use crate::session::transport::SessionTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    #[default]
    NoTransaction,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn wire_name(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "read_uncommitted",
            IsolationLevel::ReadCommitted => "read_committed",
            IsolationLevel::RepeatableRead => "repeatable_read",
            IsolationLevel::Serializable => "serializable",
        }
    }
}

impl Display for IsolationLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.wire_name()) }
}

impl FromStr for IsolationLevel {
    type Err = AceQLError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "read_uncommitted" => Ok(IsolationLevel::ReadUncommitted),
            "read_committed" => Ok(IsolationLevel::ReadCommitted),
            "repeatable_read" => Ok(IsolationLevel::RepeatableRead),
            "serializable" => Ok(IsolationLevel::Serializable),
            other => Err(AceQLError::argument(format!("unknown isolation level '{}'", other))),
        }
    }
}

/// One gateway call of a transition: action plus optional path parameter.
pub type Step = (&'static str, Option<&'static str>);

#[derive(Debug, Default)]
pub struct TransactionSequencer {
    state: TransactionState,
}

impl TransactionSequencer {
    pub fn new() -> Self { Self::default() }

    pub fn state(&self) -> TransactionState { self.state }

    pub fn is_active(&self) -> bool { self.state == TransactionState::Active }

    /// Calls a `begin` issues, or a state error when a transaction is already active.
    pub fn begin_steps(&self, level: Option<IsolationLevel>) -> AceQLResult<Vec<Step>> {
        if self.is_active() {
            return Err(AceQLError::state("a transaction is already active"));
        }
        let mut steps = Vec::with_capacity(2);
        if let Some(level) = level {
            steps.push((action::SET_TRANSACTION_ISOLATION_LEVEL, Some(level.wire_name())));
        }
        steps.push((action::SET_AUTO_COMMIT, Some("false")));
        Ok(steps)
    }

    /// Calls that end the active transaction with `end_action` (commit or rollback).
    pub fn end_steps(&self, end_action: &'static str) -> AceQLResult<[Step; 2]> {
        if !self.is_active() {
            return Err(AceQLError::state(format!("cannot {} without an active transaction", end_action)));
        }
        Ok([(end_action, None), (action::SET_AUTO_COMMIT, Some("true"))])
    }

    pub async fn begin(&mut self, transport: &SessionTransport, level: Option<IsolationLevel>) -> AceQLResult<()> {
        for (act, param) in self.begin_steps(level)? {
            transport.call_api_expect_ok(act, param).await?;
        }
        self.state = TransactionState::Active;
        info!(target: "aceql::tx", "transaction started{}", level.map(|l| format!(" ({})", l)).unwrap_or_default());
        Ok(())
    }

    pub async fn commit(&mut self, transport: &SessionTransport) -> AceQLResult<()> {
        self.end(transport, action::COMMIT).await
    }

    pub async fn rollback(&mut self, transport: &SessionTransport) -> AceQLResult<()> {
        self.end(transport, action::ROLLBACK).await
    }

    async fn end(&mut self, transport: &SessionTransport, end_action: &'static str) -> AceQLResult<()> {
        let [(act, param), (restore, restore_param)] = self.end_steps(end_action)?;
        transport.call_api_expect_ok(act, param).await?;
        // the transaction is over once the gateway accepted commit/rollback
        self.state = TransactionState::NoTransaction;
        info!(target: "aceql::tx", "transaction ended: {}", end_action);
        // commit/rollback already applied; a failed restore is only logged
        match transport.call_api_expect_ok(restore, restore_param).await {
            Ok(_) => debug!(target: "aceql::tx", "auto-commit restored"),
            Err(e) => warn!(target: "aceql::tx", "{} succeeded but auto-commit was not restored: {}", end_action, e),
        }
        Ok(())
    }
}
