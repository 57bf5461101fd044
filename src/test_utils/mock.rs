use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use alloy::{
    primitives::Address,
    rpc::types::{Filter, Log},
    sol_types::{SolCall, SolValue},
    transports::{RpcError, TransportErrorKind},
};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    WatcherError,
    abi::{
        ERC721_INTERFACE_ID, ERC1155_INTERFACE_ID,
        IERC20Metadata::{decimalsCall, nameCall, symbolCall},
        IERC165::supportsInterfaceCall,
        IMulticall3::{Call3, Result as CallResult},
    },
    connection::{BlockStream, Connection, Connector, LogStream, ReleasingStream},
    metadata::BatchReader,
    types::BlockActivity,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn backend_gone() -> WatcherError {
    RpcError::Transport(TransportErrorKind::BackendGone).into()
}

/// What a scripted contract answers to the metadata detection calls.
///
/// Fields left `None` make the corresponding call revert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenProfile {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub decimals: Option<u8>,
    pub erc721: bool,
    pub erc1155: bool,
}

impl TokenProfile {
    #[must_use]
    pub fn fungible(name: &str, symbol: &str, decimals: u8) -> Self {
        Self {
            name: Some(name.to_owned()),
            symbol: Some(symbol.to_owned()),
            decimals: Some(decimals),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn non_fungible(name: &str, symbol: &str) -> Self {
        Self {
            name: Some(name.to_owned()),
            symbol: Some(symbol.to_owned()),
            erc721: true,
            ..Self::default()
        }
    }

    /// An ERC-1155 contract without any of the optional metadata getters.
    #[must_use]
    pub fn multi_token() -> Self {
        Self { erc1155: true, ..Self::default() }
    }

    fn answer(&self, call_data: &[u8]) -> Option<Vec<u8>> {
        let selector: [u8; 4] = call_data.get(..4)?.try_into().ok()?;
        match selector {
            supportsInterfaceCall::SELECTOR => {
                let call = supportsInterfaceCall::abi_decode(call_data).ok()?;
                let supported = (call.interfaceId == ERC721_INTERFACE_ID && self.erc721) ||
                    (call.interfaceId == ERC1155_INTERFACE_ID && self.erc1155);
                Some(supported.abi_encode())
            }
            nameCall::SELECTOR => self.name.as_ref().map(SolValue::abi_encode),
            symbolCall::SELECTOR => self.symbol.as_ref().map(SolValue::abi_encode),
            decimalsCall::SELECTOR => self.decimals.map(|decimals| <alloy::sol_types::sol_data::Uint<8> as alloy::sol_types::SolType>::abi_encode(&decimals)),
            _ => None,
        }
    }
}

#[derive(Default)]
struct State {
    block_senders: Vec<mpsc::UnboundedSender<BlockActivity>>,
    log_senders: Vec<(Filter, mpsc::UnboundedSender<Log>)>,
    log_filters: Vec<Filter>,
    log_queries: Vec<Filter>,
    block_subscriptions: usize,
    log_subscriptions: usize,
    released_subscriptions: usize,
    fail_subscriptions: bool,
    fail_aggregate: bool,
    aggregate_delay: Option<Duration>,
    aggregate_count: usize,
    aggregated_calls: usize,
}

/// In-memory [`Connection`] whose streams are fed by the test.
///
/// Clones share state. Token profiles and the mined log history are shared with every other
/// connection created by the same [`MockConnector`].
#[derive(Clone, Default)]
pub struct MockConnection {
    state: Arc<Mutex<State>>,
    tokens: Arc<Mutex<HashMap<Address, TokenProfile>>>,
    history: Arc<Mutex<Vec<Log>>>,
}

impl std::fmt::Debug for MockConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("MockConnection")
            .field("block_subscriptions", &state.block_subscriptions)
            .field("log_subscriptions", &state.log_subscriptions)
            .finish_non_exhaustive()
    }
}

impl MockConnection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_chain(
        tokens: Arc<Mutex<HashMap<Address, TokenProfile>>>,
        history: Arc<Mutex<Vec<Log>>>,
    ) -> Self {
        Self { state: Arc::default(), tokens, history }
    }

    pub fn set_token(&self, address: Address, profile: TokenProfile) {
        lock(&self.tokens).insert(address, profile);
    }

    /// Makes every following subscription attempt fail.
    pub fn fail_subscriptions(&self, fail: bool) {
        lock(&self.state).fail_subscriptions = fail;
    }

    pub fn fail_aggregate(&self, fail: bool) {
        lock(&self.state).fail_aggregate = fail;
    }

    /// Delays every multicall response by `delay`.
    pub fn set_aggregate_delay(&self, delay: Duration) {
        lock(&self.state).aggregate_delay = Some(delay);
    }

    #[must_use]
    pub fn aggregate_count(&self) -> usize {
        lock(&self.state).aggregate_count
    }

    /// Sub-calls received across all multicalls.
    #[must_use]
    pub fn aggregated_calls(&self) -> usize {
        lock(&self.state).aggregated_calls
    }

    #[must_use]
    pub fn block_subscriptions(&self) -> usize {
        lock(&self.state).block_subscriptions
    }

    #[must_use]
    pub fn log_subscriptions(&self) -> usize {
        lock(&self.state).log_subscriptions
    }

    /// Filters of every log subscription opened so far, in order.
    #[must_use]
    pub fn log_filters(&self) -> Vec<Filter> {
        lock(&self.state).log_filters.clone()
    }

    /// Delivers `block` to every open block stream.
    pub fn emit_block(&self, block: BlockActivity) {
        let mut state = lock(&self.state);
        state.block_senders.retain(|sender| sender.send(block.clone()).is_ok());
    }

    /// Adds `log` to the mined history without streaming it.
    pub fn record_log(&self, log: Log) {
        lock(&self.history).push(log);
    }

    /// Filters passed to `get_logs`, in call order.
    #[must_use]
    pub fn log_queries(&self) -> Vec<Filter> {
        lock(&self.state).log_queries.clone()
    }

    /// Streams dropped by their consumer, i.e. subscriptions ended on the node side.
    #[must_use]
    pub fn released_subscriptions(&self) -> usize {
        lock(&self.state).released_subscriptions
    }

    /// Mines `log` and delivers it to every open log stream whose filter matches it.
    pub fn emit_log(&self, log: Log) {
        self.record_log(log.clone());
        let mut state = lock(&self.state);
        state.log_senders.retain(|(filter, sender)| {
            if !filter_matches(filter, &log) {
                return !sender.is_closed();
            }
            sender.send(log.clone()).is_ok()
        });
    }

    /// Ends every open stream, as a dropped socket would.
    pub fn drop_streams(&self) {
        let mut state = lock(&self.state);
        state.block_senders.clear();
        state.log_senders.clear();
    }

    fn releasing<S>(&self, stream: S) -> ReleasingStream<S> {
        let state = Arc::clone(&self.state);
        ReleasingStream::new(stream, move || lock(&state).released_subscriptions += 1)
    }

    async fn run_aggregate(&self, calls: &[Call3]) -> Result<Vec<CallResult>, WatcherError> {
        let (fail, delay) = {
            let mut state = lock(&self.state);
            state.aggregate_count += 1;
            state.aggregated_calls += calls.len();
            (state.fail_aggregate, state.aggregate_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(backend_gone());
        }

        let tokens = lock(&self.tokens);
        Ok(calls
            .iter()
            .map(|call| {
                match tokens.get(&call.target).and_then(|profile| profile.answer(&call.callData)) {
                    Some(data) => CallResult { success: true, returnData: data.into() },
                    None => CallResult { success: false, returnData: Default::default() },
                }
            })
            .collect())
    }
}

fn in_block_range(filter: &Filter, log: &Log) -> bool {
    let Some(number) = log.block_number else {
        return false;
    };
    filter.get_from_block().is_none_or(|from| number >= from) &&
        filter.get_to_block().is_none_or(|to| number <= to)
}

fn filter_matches(filter: &Filter, log: &Log) -> bool {
    if !filter.address.matches(&log.address()) {
        return false;
    }
    filter.topics.iter().enumerate().all(|(index, topic)| {
        topic.is_empty() || log.topics().get(index).is_some_and(|value| topic.matches(value))
    })
}

impl Connection for MockConnection {
    async fn subscribe_blocks(&self) -> Result<BlockStream, WatcherError> {
        let mut state = lock(&self.state);
        if state.fail_subscriptions {
            return Err(backend_gone());
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        state.block_senders.push(sender);
        state.block_subscriptions += 1;
        Ok(Box::pin(self.releasing(UnboundedReceiverStream::new(receiver))))
    }

    async fn subscribe_logs(&self, filter: Filter) -> Result<LogStream, WatcherError> {
        let mut state = lock(&self.state);
        if state.fail_subscriptions {
            return Err(backend_gone());
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        state.log_filters.push(filter.clone());
        state.log_senders.push((filter, sender));
        state.log_subscriptions += 1;
        Ok(Box::pin(self.releasing(UnboundedReceiverStream::new(receiver))))
    }

    async fn get_logs(&self, filter: Filter) -> Result<Vec<Log>, WatcherError> {
        {
            let mut state = lock(&self.state);
            if state.fail_subscriptions {
                return Err(backend_gone());
            }
            state.log_queries.push(filter.clone());
        }
        Ok(lock(&self.history)
            .iter()
            .filter(|log| filter_matches(&filter, log) && in_block_range(&filter, log))
            .cloned()
            .collect())
    }

    async fn aggregate(&self, calls: Vec<Call3>) -> Result<Vec<CallResult>, WatcherError> {
        self.run_aggregate(&calls).await
    }
}

#[async_trait]
impl BatchReader for MockConnection {
    async fn aggregate(&self, calls: Vec<Call3>) -> Result<Vec<CallResult>, WatcherError> {
        self.run_aggregate(&calls).await
    }
}

#[derive(Default)]
struct ConnectorState {
    connect_count: usize,
    fail_all: bool,
    fail_next: usize,
    connections: Vec<MockConnection>,
}

/// [`Connector`] handing out fresh [`MockConnection`]s, with scriptable failures.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
    tokens: Arc<Mutex<HashMap<Address, TokenProfile>>>,
    history: Arc<Mutex<Vec<Log>>>,
}

impl std::fmt::Debug for MockConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnector")
            .field("connect_count", &lock(&self.state).connect_count)
            .finish_non_exhaustive()
    }
}

impl MockConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connect attempts, successful or not.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        lock(&self.state).connect_count
    }

    /// Makes every following connect attempt fail until reset.
    pub fn fail_connects(&self, fail: bool) {
        lock(&self.state).fail_all = fail;
    }

    /// Makes the next `count` connect attempts fail.
    pub fn fail_next_connects(&self, count: usize) {
        lock(&self.state).fail_next = count;
    }

    /// Registers a token on every past and future connection.
    pub fn set_token(&self, address: Address, profile: TokenProfile) {
        lock(&self.tokens).insert(address, profile);
    }

    /// Adds `log` to the mined history seen by every connection, without streaming it.
    pub fn record_log(&self, log: Log) {
        lock(&self.history).push(log);
    }

    #[must_use]
    pub fn connections(&self) -> Vec<MockConnection> {
        lock(&self.state).connections.clone()
    }

    /// The most recently created connection.
    ///
    /// # Panics
    ///
    /// If no connection was ever established.
    #[must_use]
    pub fn latest(&self) -> MockConnection {
        lock(&self.state).connections.last().cloned().expect("no connection established")
    }
}

impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self) -> Result<MockConnection, WatcherError> {
        let mut state = lock(&self.state);
        state.connect_count += 1;
        if state.fail_all {
            return Err(backend_gone());
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(backend_gone());
        }
        let connection =
            MockConnection::with_chain(Arc::clone(&self.tokens), Arc::clone(&self.history));
        state.connections.push(connection.clone());
        Ok(connection)
    }
}
