//! Connection lifecycle: the transport abstraction, its alloy WebSocket implementation and the
//! manager that replaces the connection with exponential backoff when it fails.
//!
//! # How it works
//!
//! [`ConnectionManager`] holds exactly one [`Connection`] at a time, tagged with a generation
//! number. Whoever observes a failure (usually a subscription stream that ended) calls
//! [`ConnectionManager::report_failure`] with the generation it was using. The first report
//! against the live generation starts a single backoff cycle; everything else is ignored until
//! the cycle finishes. A successful reconnect broadcasts [`ConnectionEvent::Renewed`] so
//! dependents can rebuild their subscriptions against the new connection.

mod backoff;
mod manager;
mod provider;
mod transport;

pub use backoff::{BackoffPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY};
pub use manager::{ConnectionEvent, ConnectionManager, ConnectionState, DEFAULT_EVENT_CAPACITY};
pub use provider::{
    AlloyConnection, DEFAULT_BLOCK_BUFFER_CAPACITY, DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_RETRIES,
    DEFAULT_MIN_DELAY, WsConnector,
};
pub use transport::{BlockStream, Connection, Connector, LogStream, ReleasingStream};
