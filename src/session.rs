//! Gateway session: HTTP transport, session cache, BLOB transfer and transaction state.

pub mod blob;
pub mod store;
pub mod transaction;
pub mod transport;

pub use blob::{BlobReader, ProgressIndicator, UploadProgress};
pub use store::{InMemorySessionStore, SessionIds, SessionKey, SessionStore};
pub use transaction::{IsolationLevel, TransactionSequencer, TransactionState};
pub use transport::SessionTransport;
