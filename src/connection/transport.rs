use std::{
    pin::Pin,
    task::{Context, Poll},
};

use alloy::rpc::types::{Filter, Log};
use tokio_stream::Stream;

use crate::{
    WatcherError,
    abi::IMulticall3::{Call3, Result as CallResult},
    types::BlockActivity,
};

/// Stream of new blocks with their transaction lists. Ends when the transport is lost.
pub type BlockStream = Pin<Box<dyn Stream<Item = BlockActivity> + Send>>;

/// Stream of individual log notifications. Ends when the transport is lost.
pub type LogStream = Pin<Box<dyn Stream<Item = Log> + Send>>;

/// A live streaming connection to a node.
///
/// Implementations are cheap handles (typically wrapping an `Arc`) and are replaced wholesale by
/// the [`ConnectionManager`](crate::ConnectionManager) on reconnect, never mutated in place.
pub trait Connection: Clone + Send + Sync + 'static {
    /// Subscribe to new blocks including full transaction bodies.
    fn subscribe_blocks(&self) -> impl Future<Output = Result<BlockStream, WatcherError>> + Send;

    /// Subscribe to logs matching `filter`.
    fn subscribe_logs(
        &self,
        filter: Filter,
    ) -> impl Future<Output = Result<LogStream, WatcherError>> + Send;

    /// Fetch the already mined logs matching `filter`, honouring its block range.
    fn get_logs(
        &self,
        filter: Filter,
    ) -> impl Future<Output = Result<Vec<Log>, WatcherError>> + Send;

    /// Execute a Multicall3 `aggregate3` read in a single round trip.
    ///
    /// The returned vector has one entry per call, in order.
    fn aggregate(
        &self,
        calls: Vec<Call3>,
    ) -> impl Future<Output = Result<Vec<CallResult>, WatcherError>> + Send;
}

/// Factory for fresh [`Connection`]s.
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    /// Open a new connection to the node.
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, WatcherError>> + Send;
}

/// A stream that runs a release action once it is dropped.
///
/// Connections wrap their node-side subscriptions in it so that dropping the stream, on
/// cancellation or removal, also ends the subscription on the node.
pub struct ReleasingStream<S> {
    inner: S,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl<S> ReleasingStream<S> {
    pub fn new(inner: S, release: impl FnOnce() + Send + 'static) -> Self {
        Self { inner, release: Some(Box::new(release)) }
    }
}

impl<S: Stream + Unpin> Stream for ReleasingStream<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<S> Drop for ReleasingStream<S> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}
