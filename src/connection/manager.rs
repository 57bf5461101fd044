use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::{sync::broadcast, time::sleep};

use crate::{
    WatcherError,
    abi::IMulticall3::{Call3, Result as CallResult},
    connection::{BackoffPolicy, Connection, Connector},
};

/// Default capacity of the connection event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 16;

/// Lifecycle of the managed connection.
///
/// `Open → Backoff → Reconnecting → Open` on a successful cycle, `Reconnecting → Backoff` when a
/// connect attempt fails and `Backoff → Failed` once the attempt budget is spent. `Failed` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Backoff,
    Reconnecting,
    Failed,
}

/// Notifications emitted by the [`ConnectionManager`].
#[derive(Debug, Clone)]
pub enum ConnectionEvent<T> {
    /// A fresh connection has been installed; dependents must resubscribe against it.
    Renewed { connection: T, generation: u64 },
    /// Reconnection was abandoned. Requires an external restart.
    Failed { attempts: u32 },
}

struct Inner<T> {
    connection: T,
    generation: u64,
    state: ConnectionState,
    attempts: u32,
}

/// Owns the single streaming connection and drives reconnection with exponential backoff.
///
/// Dependents report failures through [`ConnectionManager::report_failure`] and listen for
/// [`ConnectionEvent::Renewed`] via [`ConnectionManager::subscribe`]. The manager itself knows
/// nothing about subscriptions.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    policy: BackoffPolicy,
    inner: Mutex<Inner<C::Connection>>,
    events: broadcast::Sender<ConnectionEvent<C::Connection>>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Opens the initial connection.
    ///
    /// # Errors
    ///
    /// Returns the connector's error if the first connection cannot be established; the initial
    /// connect is not retried.
    pub async fn connect(connector: C, policy: BackoffPolicy) -> Result<Arc<Self>, WatcherError> {
        Self::connect_with_capacity(connector, policy, DEFAULT_EVENT_CAPACITY).await
    }

    /// Same as [`ConnectionManager::connect`] with a custom event channel capacity.
    ///
    /// # Errors
    ///
    /// Returns the connector's error if the first connection cannot be established.
    pub async fn connect_with_capacity(
        connector: C,
        policy: BackoffPolicy,
        event_capacity: usize,
    ) -> Result<Arc<Self>, WatcherError> {
        let connection = connector.connect().await?;
        let (events, _) = broadcast::channel(event_capacity.max(1));

        info!(max_attempts = policy.max_attempts, "Connection established");

        Ok(Arc::new(Self {
            connector,
            policy,
            inner: Mutex::new(Inner {
                connection,
                generation: 0,
                state: ConnectionState::Open,
                attempts: 0,
            }),
            events,
        }))
    }

    fn lock(&self) -> MutexGuard<'_, Inner<C::Connection>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the current connection handle together with its generation.
    ///
    /// Callers must not hold on to the handle across a renewal.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::NotConnected`] once the manager has failed.
    pub fn current(&self) -> Result<(C::Connection, u64), WatcherError> {
        let inner = self.lock();
        if inner.state == ConnectionState::Failed {
            return Err(WatcherError::NotConnected);
        }
        Ok((inner.connection.clone(), inner.generation))
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Number of reconnection attempts made in the current backoff cycle.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.lock().attempts
    }

    /// Generation of the installed connection, bumped on every renewal.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    #[must_use]
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Receives [`ConnectionEvent`]s emitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent<C::Connection>> {
        self.events.subscribe()
    }

    /// Signals that the connection of `generation` failed.
    ///
    /// Starts a backoff cycle if the connection is open. Reports against an older generation, or
    /// while a cycle is already in flight, are ignored so simultaneous subscription errors
    /// collapse into a single reconnection.
    pub fn report_failure(self: &Arc<Self>, generation: u64, error: WatcherError) {
        {
            let mut inner = self.lock();
            if generation != inner.generation {
                debug!(
                    reported = generation,
                    current = inner.generation,
                    error = %error,
                    "Ignoring failure from a replaced connection"
                );
                return;
            }
            match inner.state {
                ConnectionState::Open => inner.state = ConnectionState::Backoff,
                ConnectionState::Backoff | ConnectionState::Reconnecting => {
                    debug!(error = %error, "Reconnection already in progress");
                    return;
                }
                ConnectionState::Failed => {
                    debug!(error = %error, "Connection manager has failed, ignoring error");
                    return;
                }
            }
        }

        error!(error = %error, generation = generation, "Connection failure detected");

        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.reconnect().await });
    }

    async fn reconnect(self: Arc<Self>) {
        loop {
            let attempt = {
                let mut inner = self.lock();
                inner.attempts += 1;
                inner.attempts
            };

            let Some(delay) = self.policy.delay_for(attempt) else {
                let attempts = self.policy.max_attempts;
                self.lock().state = ConnectionState::Failed;
                let err = WatcherError::BackoffExhausted { attempts };
                error!(
                    error = %err,
                    "Reached maximum reconnection attempts, will not reconnect further"
                );
                _ = self.events.send(ConnectionEvent::Failed { attempts });
                return;
            };

            info!(attempt = attempt, delay_ms = delay.as_millis(), "Scheduling reconnection");
            sleep(delay).await;

            self.lock().state = ConnectionState::Reconnecting;
            info!(attempt = attempt, "Re-creating connection");

            match self.connector.connect().await {
                Ok(connection) => {
                    let generation = {
                        let mut inner = self.lock();
                        inner.connection = connection.clone();
                        inner.generation += 1;
                        inner.attempts = 0;
                        inner.state = ConnectionState::Open;
                        inner.generation
                    };

                    info!(generation = generation, "Connection renewed");
                    let renewed = ConnectionEvent::Renewed { connection, generation };
                    if self.events.send(renewed).is_err() {
                        debug!("No listeners for connection renewal");
                    }
                    return;
                }
                Err(e) => {
                    warn!(error = %e, attempt = attempt, "Reconnection attempt failed");
                    self.lock().state = ConnectionState::Backoff;
                }
            }
        }
    }

    /// Runs a Multicall3 read on the current connection.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::NotConnected`] after a terminal failure, or the transport error.
    pub async fn aggregate(&self, calls: Vec<Call3>) -> Result<Vec<CallResult>, WatcherError> {
        let (connection, _) = self.current()?;
        connection.aggregate(calls).await
    }
}
