use std::time::Duration;

use alloy::{
    consensus::{BlockHeader, Transaction as _},
    eips::BlockNumberOrTag,
    network::{BlockResponse, TransactionResponse},
    primitives::{Address, B256, Bytes},
    providers::{Provider, ProviderBuilder, RootProvider},
    rpc::types::{Block, BlockTransactions, Filter, Log, TransactionRequest},
    sol_types::SolCall,
    transports::{RpcError, TransportErrorKind},
};
use backon::{ExponentialBuilder, Retryable};
use tokio::{sync::mpsc, time::timeout};
use tokio_stream::{StreamExt, wrappers::ReceiverStream};

use crate::{
    WatcherError,
    abi::{
        IMulticall3::{Call3, Result as CallResult, aggregate3Call},
        MULTICALL3_ADDRESS,
    },
    connection::{BlockStream, Connection, Connector, LogStream, ReleasingStream},
    types::{BlockActivity, BlockTransaction, TransactionActivity},
};

/// Default timeout of a single RPC call, retries included.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
/// Default maximum number of retries per RPC call.
pub const DEFAULT_MAX_RETRIES: usize = 3;
/// Default base delay between RPC retries.
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_secs(1);
/// Default number of fetched blocks buffered per block subscription.
pub const DEFAULT_BLOCK_BUFFER_CAPACITY: usize = 64;

/// Opens alloy WebSocket connections to a node.
///
/// ```rust,no_run
/// use chain_watcher::{BackoffPolicy, ConnectionManager, WsConnector};
/// use std::time::Duration;
///
/// # async fn example() -> anyhow::Result<()> {
/// let connector = WsConnector::new("wss://eth.example.org").call_timeout(Duration::from_secs(10));
/// let manager = ConnectionManager::connect(connector, BackoffPolicy::default()).await?;
/// # Ok(()) }
/// ```
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    call_timeout: Duration,
    max_retries: usize,
    min_delay: Duration,
    multicall_address: Address,
    block_buffer_capacity: usize,
}

impl WsConnector {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            min_delay: DEFAULT_MIN_DELAY,
            multicall_address: MULTICALL3_ADDRESS,
            block_buffer_capacity: DEFAULT_BLOCK_BUFFER_CAPACITY,
        }
    }

    /// Set the total timeout of a single RPC call, including its retries.
    #[must_use]
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    #[must_use]
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base delay for exponential backoff retries.
    #[must_use]
    pub fn min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self
    }

    /// Use a Multicall3 deployment other than the canonical one.
    #[must_use]
    pub fn multicall_address(mut self, address: Address) -> Self {
        self.multicall_address = address;
        self
    }

    #[must_use]
    pub fn block_buffer_capacity(mut self, capacity: usize) -> Self {
        self.block_buffer_capacity = capacity;
        self
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    type Connection = AlloyConnection;

    async fn connect(&self) -> Result<AlloyConnection, WatcherError> {
        info!(call_timeout_ms = self.call_timeout.as_millis(), "Opening WebSocket connection");

        let provider = timeout(self.call_timeout, ProviderBuilder::new().connect(&self.url))
            .await
            .map_err(WatcherError::from)?
            .map_err(WatcherError::from)?;

        Ok(AlloyConnection {
            provider: provider.root().clone(),
            call_timeout: self.call_timeout,
            max_retries: self.max_retries,
            min_delay: self.min_delay,
            multicall_address: self.multicall_address,
            block_buffer_capacity: self.block_buffer_capacity.max(1),
        })
    }
}

/// A live alloy WebSocket connection.
#[derive(Debug, Clone)]
pub struct AlloyConnection {
    provider: RootProvider,
    call_timeout: Duration,
    max_retries: usize,
    min_delay: Duration,
    multicall_address: Address,
    block_buffer_capacity: usize,
}

impl AlloyConnection {
    #[must_use]
    pub fn provider(&self) -> &RootProvider {
        &self.provider
    }

    /// Execute `operation` with exponential backoff, bounded by the call timeout.
    async fn with_retry<T, F, Fut>(&self, operation: F) -> Result<T, WatcherError>
    where
        F: Fn(RootProvider) -> Fut,
        Fut: Future<Output = Result<T, RpcError<TransportErrorKind>>>,
    {
        let retry_strategy = ExponentialBuilder::default()
            .with_max_times(self.max_retries)
            .with_min_delay(self.min_delay);

        timeout(
            self.call_timeout,
            (|| operation(self.provider.clone()))
                .retry(retry_strategy)
                .notify(|err: &RpcError<TransportErrorKind>, dur: Duration| {
                    info!(error = %err, "RPC error retrying after {:?}", dur);
                })
                .sleep(tokio::time::sleep),
        )
        .await
        .map_err(WatcherError::from)?
        .map_err(WatcherError::from)
    }

    async fn fetch_block(&self, number: u64) -> Result<Option<Block>, WatcherError> {
        self.with_retry(move |provider| async move {
            provider.get_block_by_number(BlockNumberOrTag::Number(number)).full().await
        })
        .await
    }
}

impl Connection for AlloyConnection {
    async fn subscribe_blocks(&self) -> Result<BlockStream, WatcherError> {
        debug!("eth_subscribe newHeads called");
        let subscription = self
            .with_retry(|provider| async move { provider.subscribe_blocks().await })
            .await?;
        let id = *subscription.local_id();
        let provider = self.provider.clone();
        let mut headers = ReleasingStream::new(Box::pin(subscription.into_stream()), move || {
            release_subscription(&provider, id);
        });

        let (tx, rx) = mpsc::channel(self.block_buffer_capacity);
        let connection = self.clone();

        tokio::spawn(async move {
            loop {
                let header = tokio::select! {
                    () = tx.closed() => break,
                    header = headers.next() => match header {
                        Some(header) => header,
                        None => break,
                    },
                };

                let number = header.number();
                let fetched = tokio::select! {
                    () = tx.closed() => break,
                    fetched = connection.fetch_block(number) => fetched,
                };
                let block = match fetched {
                    Ok(Some(block)) => block,
                    Ok(None) => {
                        warn!(block_number = number, "Announced block not found, skipping");
                        continue;
                    }
                    Err(e) => {
                        error!(
                            error = %e,
                            block_number = number,
                            "Failed to fetch announced block"
                        );
                        break;
                    }
                };

                if tx.send(block_activity(block)).await.is_err() {
                    break;
                }
            }
            debug!("Block pump stopped");
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn subscribe_logs(&self, filter: Filter) -> Result<LogStream, WatcherError> {
        debug!("eth_subscribe logs called");
        let subscription = self
            .with_retry(|provider| {
                let filter = filter.clone();
                async move { provider.subscribe_logs(&filter).await }
            })
            .await?;
        let id = *subscription.local_id();
        let provider = self.provider.clone();

        Ok(Box::pin(ReleasingStream::new(Box::pin(subscription.into_stream()), move || {
            release_subscription(&provider, id);
        })))
    }

    async fn get_logs(&self, filter: Filter) -> Result<Vec<Log>, WatcherError> {
        debug!("eth_getLogs called");
        let result = self
            .with_retry(|provider| {
                let filter = filter.clone();
                async move { provider.get_logs(&filter).await }
            })
            .await;
        if let Err(e) = &result {
            error!(error = %e, "eth_getLogs failed");
        }
        result
    }

    async fn aggregate(&self, calls: Vec<Call3>) -> Result<Vec<CallResult>, WatcherError> {
        let request = TransactionRequest::default()
            .to(self.multicall_address)
            .input(Bytes::from(aggregate3Call { calls }.abi_encode()).into());

        let output = self
            .with_retry(|provider| {
                let request = request.clone();
                async move { provider.call(request).await }
            })
            .await?;

        decode_aggregate(&output)
    }
}

/// Ends the node-side subscription `id`. A dead transport already dropped it.
fn release_subscription(provider: &RootProvider, id: B256) {
    match provider.unsubscribe(id) {
        Ok(()) => debug!(subscription = %id, "eth_unsubscribe sent"),
        Err(e) => debug!(subscription = %id, error = %e, "eth_unsubscribe not sent"),
    }
}

fn decode_aggregate(output: &[u8]) -> Result<Vec<CallResult>, WatcherError> {
    aggregate3Call::abi_decode_returns(output)
        .map_err(|e| WatcherError::MetadataUnavailable(format!("invalid aggregate3 output: {e}")))
}

fn block_activity(block: Block) -> BlockActivity {
    let number = block.header().number();
    let transactions = match block.transactions {
        BlockTransactions::Full(txs) => txs
            .into_iter()
            .map(|tx| {
                BlockTransaction::Full(TransactionActivity {
                    hash: tx.tx_hash(),
                    block_number: tx.block_number(),
                    from: TransactionResponse::from(&tx),
                    to: tx.to(),
                    value: tx.value(),
                })
            })
            .collect(),
        BlockTransactions::Hashes(hashes) => {
            hashes.into_iter().map(BlockTransaction::Hash).collect()
        }
        BlockTransactions::Uncle => Vec::new(),
    };

    BlockActivity { number, transactions }
}
