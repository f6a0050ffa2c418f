//! AceQL wire protocol: result envelopes, streamed row results and statement binding.

pub mod binder;
pub mod envelope;
pub mod json_pull;
pub mod parameters;
pub mod row_parser;

/// Value sent as `client_version` on login.
pub const CLIENT_VERSION: &str = concat!("aceql-client-rust/", env!("CARGO_PKG_VERSION"));

/// Session actions, appended to the session base URL.
pub mod action {
    pub const EXECUTE_UPDATE: &str = "execute_update";
    pub const EXECUTE_QUERY: &str = "execute_query";
    pub const BLOB_UPLOAD: &str = "blob_upload";
    pub const BLOB_DOWNLOAD: &str = "blob_download";
    pub const GET_BLOB_LENGTH: &str = "get_blob_length";
    pub const DISCONNECT: &str = "disconnect";
    pub const GET_VERSION: &str = "get_version";
    pub const SET_AUTO_COMMIT: &str = "set_auto_commit";
    pub const GET_AUTO_COMMIT: &str = "get_auto_commit";
    pub const COMMIT: &str = "commit";
    pub const ROLLBACK: &str = "rollback";
    pub const SET_READ_ONLY: &str = "set_read_only";
    pub const IS_READ_ONLY: &str = "is_read_only";
    pub const SET_TRANSACTION_ISOLATION_LEVEL: &str = "set_transaction_isolation_level";
    pub const GET_TRANSACTION_ISOLATION_LEVEL: &str = "get_transaction_isolation_level";
}
