//! In-memory fakes for driving watchers without a node.
//!
//! Available in unit tests and, through the `test-utils` feature, to integration tests.

pub mod macros;

mod fixtures;
mod handlers;
mod mock;

pub use fixtures::{
    block, erc20_transfer_log, erc721_transfer_log, rpc_log, transfer_batch_log,
    transfer_single_log,
};
pub use handlers::{RecordingHandler, RecordingNotifier};
pub use mock::{MockConnection, MockConnector, TokenProfile};
