//! Unified client error model.
//! Local failures (configuration, binding, unsupported types, state machine misuse)
//! are detected before any I/O. Everything that touches the gateway, including the
//! HTTP call itself failing, is normalized into [`ProtocolError`].

use std::fmt::{Display, Formatter};

use thiserror::Error;

/// Failure reported by the gateway (envelope `status` != "OK") or by the transport
/// underneath it. Transport failures carry `code == 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    pub code: i32,
    pub message: String,
    pub remote_stack_trace: Option<String>,
    pub http_status: Option<u16>,
}

impl ProtocolError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), remote_stack_trace: None, http_status: None }
    }

    /// Transport-level failure (network, TLS, proxy, broken body stream).
    pub fn transport(message: impl Into<String>) -> Self { Self::new(0, message) }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_stack_trace(mut self, trace: Option<String>) -> Self {
        self.remote_stack_trace = trace;
        self
    }
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(status) = self.http_status {
            write!(f, " (HTTP {})", status)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum AceQLError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("binding error: {0}")]
    Binding(String),
    #[error("unsupported parameter type {type_name} for value {value}")]
    UnsupportedType { value: String, type_name: String },
    #[error("protocol error: {0}")]
    Protocol(ProtocolError),
    #[error("state error: {0}")]
    State(String),
    #[error("invalid argument: {0}")]
    Argument(String),
    #[error("operation cancelled: {0}")]
    Cancelled(String),
}

impl AceQLError {
    pub fn configuration<S: Into<String>>(msg: S) -> Self { AceQLError::Configuration(msg.into()) }
    pub fn binding<S: Into<String>>(msg: S) -> Self { AceQLError::Binding(msg.into()) }
    pub fn state<S: Into<String>>(msg: S) -> Self { AceQLError::State(msg.into()) }
    pub fn argument<S: Into<String>>(msg: S) -> Self { AceQLError::Argument(msg.into()) }
    pub fn cancelled<S: Into<String>>(msg: S) -> Self { AceQLError::Cancelled(msg.into()) }
    pub fn transport<S: Into<String>>(msg: S) -> Self { AceQLError::Protocol(ProtocolError::transport(msg)) }
    pub fn unsupported_type<V: Into<String>, T: Into<String>>(value: V, type_name: T) -> Self {
        AceQLError::UnsupportedType { value: value.into(), type_name: type_name.into() }
    }

    pub fn code_str(&self) -> &'static str {
        match self {
            AceQLError::Configuration(_) => "configuration_error",
            AceQLError::Binding(_) => "binding_error",
            AceQLError::UnsupportedType { .. } => "unsupported_type_error",
            AceQLError::Protocol(_) => "protocol_error",
            AceQLError::State(_) => "state_error",
            AceQLError::Argument(_) => "argument_error",
            AceQLError::Cancelled(_) => "cancelled",
        }
    }

    /// True for failures detected before any request was sent.
    pub fn is_local(&self) -> bool {
        !matches!(self, AceQLError::Protocol(_) | AceQLError::Cancelled(_))
    }

    pub fn as_protocol(&self) -> Option<&ProtocolError> {
        match self {
            AceQLError::Protocol(p) => Some(p),
            _ => None,
        }
    }
}

pub type AceQLResult<T> = Result<T, AceQLError>;

impl From<ProtocolError> for AceQLError {
    fn from(err: ProtocolError) -> Self { AceQLError::Protocol(err) }
}

impl From<reqwest::Error> for AceQLError {
    fn from(err: reqwest::Error) -> Self {
        let mut p = ProtocolError::transport(err.to_string());
        if let Some(status) = err.status() {
            p = p.with_http_status(status.as_u16());
        }
        AceQLError::Protocol(p)
    }
}

impl From<std::io::Error> for AceQLError {
    fn from(err: std::io::Error) -> Self { AceQLError::transport(err.to_string()) }
}
