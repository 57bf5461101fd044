use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use alloy::{eips::BlockNumberOrTag, json_abi::Event, rpc::types::Log};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::{
    WatcherError,
    classifier::EventClassifier,
    connection::{BlockStream, Connection, ConnectionManager, Connector, LogStream},
    handler::{EventHandler, dispatch_transactions},
    watcher::config::{SubscriptionConfig, WatcherKind},
};

/// What a subscription task shares with the registry.
pub(crate) struct SubscriptionContext<C: Connector> {
    pub(crate) manager: Arc<ConnectionManager<C>>,
    pub(crate) classifier: EventClassifier,
    pub(crate) log_batch_size: usize,
    pub(crate) log_batch_window: Duration,
}

impl<C: Connector> Clone for SubscriptionContext<C> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            classifier: self.classifier.clone(),
            log_batch_size: self.log_batch_size,
            log_batch_window: self.log_batch_window,
        }
    }
}

/// Handle to a running subscription task.
#[derive(Debug)]
pub(crate) struct LiveSubscription {
    token: CancellationToken,
    generation: u64,
    task: JoinHandle<()>,
}

impl LiveSubscription {
    /// Connection generation the subscription was opened on.
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Stops delivery after the batch currently being handled, if any.
    pub(crate) fn cancel(self) {
        self.token.cancel();
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

enum LogMode {
    Typed(Event),
    Fallback,
}

/// Where a watcher with a starting block resumes its history replay.
///
/// Shared by every live subscription of the watcher, so a renewed subscription replays only the
/// blocks mined after the last one it delivered.
#[derive(Debug, Clone)]
pub(crate) struct Backfill {
    next_block: Arc<AtomicU64>,
}

impl Backfill {
    pub(crate) fn for_config(config: &SubscriptionConfig) -> Option<Self> {
        config
            .starting_block()
            .map(|block| Self { next_block: Arc::new(AtomicU64::new(block)) })
    }

    pub(crate) fn next_block(&self) -> u64 {
        self.next_block.load(Ordering::Acquire)
    }

    fn delivered(&self, logs: &[Log]) {
        if let Some(last) = logs.iter().filter_map(|log| log.block_number).max() {
            self.next_block.fetch_max(last + 1, Ordering::AcqRel);
        }
    }
}

/// Opens the stream `config` asks for on `connection` and spawns the task that feeds `handler`.
///
/// A log watcher with a [`Backfill`] subscribes first and then fetches the mined logs from its
/// resume block, so nothing mined in between is missed.
pub(crate) async fn create_subscription<C: Connector>(
    ctx: &SubscriptionContext<C>,
    connection: &C::Connection,
    generation: u64,
    config: &SubscriptionConfig,
    handler: &Arc<dyn EventHandler>,
    backfill: Option<&Backfill>,
) -> Result<LiveSubscription, WatcherError> {
    let name = config.name().to_owned();
    let token = CancellationToken::new();

    let task = match config.kind() {
        WatcherKind::BlockSweep => {
            let stream = connection
                .subscribe_blocks()
                .await
                .map_err(|e| creation_error(&name, &e))?;
            debug!(watcher: name, generation = generation, "Block subscription opened");
            tokio::spawn(run_block_sweep(
                ctx.clone(),
                name,
                generation,
                Arc::clone(handler),
                stream,
                token.clone(),
            ))
        }
        kind => {
            let filter = config.log_filter().ok_or_else(|| WatcherError::SubscriptionCreation {
                name: name.clone(),
                reason: "no log filter for this watcher".into(),
            })?;
            let mode = match (kind, config.abi_event()) {
                (WatcherKind::ContractEvent(_), Some(event)) => LogMode::Typed(event.clone()),
                _ => LogMode::Fallback,
            };
            let stream = connection
                .subscribe_logs(filter.clone())
                .await
                .map_err(|e| creation_error(&name, &e))?;
            debug!(watcher: name, generation = generation, "Log subscription opened");

            let history = match backfill {
                Some(backfill) => {
                    let from = backfill.next_block();
                    let logs = connection
                        .get_logs(filter.from_block(from).to_block(BlockNumberOrTag::Latest))
                        .await
                        .map_err(|e| creation_error(&name, &e))?;
                    debug!(
                        watcher: name,
                        from_block = from,
                        logs = logs.len(),
                        "Fetched logs to replay"
                    );
                    logs
                }
                None => Vec::new(),
            };

            let feed = LogFeed {
                ctx: ctx.clone(),
                name,
                generation,
                handler: Arc::clone(handler),
                mode,
                backfill: backfill.cloned(),
                token: token.clone(),
            };
            tokio::spawn(feed.run(history, stream))
        }
    };

    Ok(LiveSubscription { token, generation, task })
}

fn creation_error(name: &str, error: &WatcherError) -> WatcherError {
    WatcherError::SubscriptionCreation { name: name.to_owned(), reason: error.to_string() }
}

async fn run_block_sweep<C: Connector>(
    ctx: SubscriptionContext<C>,
    name: String,
    generation: u64,
    handler: Arc<dyn EventHandler>,
    mut stream: BlockStream,
    token: CancellationToken,
) {
    loop {
        let block = tokio::select! {
            biased;

            () = token.cancelled() => {
                debug!(watcher: name, "Block subscription cancelled");
                return;
            }
            next = stream.next() => match next {
                Some(block) => block,
                None => break,
            },
        };

        let number = block.number;
        let transactions = block.into_full_transactions();
        trace!(
            watcher: name,
            block = number,
            transactions = transactions.len(),
            "Received block"
        );
        dispatch_transactions(handler.as_ref(), &name, &transactions).await;
    }

    stream_ended(&ctx, &name, generation, &token);
}

/// The task behind a log watcher.
struct LogFeed<C: Connector> {
    ctx: SubscriptionContext<C>,
    name: String,
    generation: u64,
    handler: Arc<dyn EventHandler>,
    mode: LogMode,
    backfill: Option<Backfill>,
    token: CancellationToken,
}

impl<C: Connector> LogFeed<C> {
    async fn run(self, history: Vec<Log>, stream: LogStream) {
        // live logs up to here were already part of the replay
        let replayed_through = history.iter().filter_map(|log| log.block_number).max();

        let batch_size = self.ctx.log_batch_size.max(1);
        for chunk in history.chunks(batch_size) {
            if self.token.is_cancelled() {
                debug!(watcher: self.name, "Log subscription cancelled during replay");
                return;
            }
            self.deliver(chunk.to_vec()).await;
        }

        let batches = stream.chunks_timeout(batch_size, self.ctx.log_batch_window);
        tokio::pin!(batches);

        loop {
            let logs = tokio::select! {
                biased;

                () = self.token.cancelled() => {
                    debug!(watcher: self.name, "Log subscription cancelled");
                    return;
                }
                next = batches.next() => match next {
                    Some(logs) => logs,
                    None => break,
                },
            };

            let logs: Vec<Log> = match replayed_through {
                Some(through) => logs
                    .into_iter()
                    .filter(|log| log.block_number.is_none_or(|number| number > through))
                    .collect(),
                None => logs,
            };
            self.deliver(logs).await;
        }

        stream_ended(&self.ctx, &self.name, self.generation, &self.token);
    }

    async fn deliver(&self, logs: Vec<Log>) {
        let logs: Vec<Log> = logs
            .into_iter()
            .filter(|log| {
                if log.removed {
                    debug!(
                        watcher: self.name,
                        tx_hash = ?log.transaction_hash,
                        "Skipping log removed by a reorg"
                    );
                }
                !log.removed
            })
            .collect();
        if logs.is_empty() {
            return;
        }

        let classified = match &self.mode {
            LogMode::Typed(event) => EventClassifier::classify_typed(event, &logs),
            LogMode::Fallback => self.ctx.classifier.classify(&logs).await,
        };
        trace!(
            watcher: self.name,
            logs = logs.len(),
            transfers = classified.len(),
            "Classified log batch"
        );
        classified.dispatch(self.handler.as_ref(), &self.name).await;

        if let Some(backfill) = &self.backfill {
            backfill.delivered(&logs);
        }
    }
}

fn stream_ended<C: Connector>(
    ctx: &SubscriptionContext<C>,
    name: &str,
    generation: u64,
    token: &CancellationToken,
) {
    if token.is_cancelled() {
        return;
    }
    warn!(watcher: name, generation = generation, "Subscription stream ended unexpectedly");
    ctx.manager.report_failure(generation, WatcherError::SubscriptionClosed(name.to_owned()));
}
