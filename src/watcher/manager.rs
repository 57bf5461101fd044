use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, broadcast::error::RecvError};
use tokio_util::sync::CancellationToken;

use crate::{
    WatcherError,
    connection::{ConnectionEvent, ConnectionManager, Connector},
    handler::EventHandler,
    metadata::MetadataCache,
    watcher::{
        WatcherManagerBuilder,
        config::SubscriptionConfig,
        subscription::{Backfill, LiveSubscription, SubscriptionContext, create_subscription},
    },
};

struct StoredWatcher {
    config: SubscriptionConfig,
    handler: Arc<dyn EventHandler>,
    backfill: Option<Backfill>,
    live: Option<LiveSubscription>,
}

struct Shared<C: Connector> {
    ctx: SubscriptionContext<C>,
    watchers: Mutex<HashMap<String, StoredWatcher>>,
}

/// Registry of named watchers on top of a [`ConnectionManager`].
///
/// Every registered watcher owns one live subscription on the current connection. When the
/// connection is renewed all of them are recreated against the new one, keeping their
/// configuration and handler.
///
/// Dropping the manager stops the renewal listener; running subscriptions are cancelled by
/// [`WatcherManager::shutdown`] or [`WatcherManager::remove_all_watchers`].
pub struct WatcherManager<C: Connector> {
    shared: Arc<Shared<C>>,
    shutdown: CancellationToken,
}

impl<C: Connector> WatcherManager<C> {
    /// Starts configuring a manager that connects through `connector`.
    #[must_use]
    pub fn builder(connector: C) -> WatcherManagerBuilder<C> {
        WatcherManagerBuilder::new(connector)
    }

    pub(crate) fn start(ctx: SubscriptionContext<C>) -> Self {
        let events = ctx.manager.subscribe();
        let shared = Arc::new(Shared { ctx, watchers: Mutex::new(HashMap::new()) });
        let shutdown = CancellationToken::new();

        tokio::spawn(listen_for_renewals(Arc::clone(&shared), events, shutdown.clone()));

        Self { shared, shutdown }
    }

    /// Registers `config` under its name and opens its subscription.
    ///
    /// If the subscription cannot be created the watcher is still registered, dormant, and the
    /// next connection renewal tries again. The failure stays local to this watcher: the
    /// connection and the other watchers are left alone.
    ///
    /// # Errors
    ///
    /// * [`WatcherError::DuplicateWatcher`] if the name is taken; the existing watcher is left
    ///   untouched.
    /// * [`WatcherError::NotConnected`] if the connection manager has given up.
    pub async fn add_watcher(
        &self,
        config: SubscriptionConfig,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), WatcherError> {
        let mut watchers = self.shared.watchers.lock().await;
        let name = config.name().to_owned();

        if watchers.contains_key(&name) {
            warn!(watcher: name, "Watcher already registered");
            return Err(WatcherError::DuplicateWatcher(name));
        }

        let (connection, generation) = self.shared.ctx.manager.current()?;
        let backfill = Backfill::for_config(&config);
        let created = create_subscription(
            &self.shared.ctx,
            &connection,
            generation,
            &config,
            &handler,
            backfill.as_ref(),
        )
        .await;
        let live = match created {
            Ok(live) => {
                info!(watcher: name, kind = ?config.kind(), "Watcher added");
                Some(live)
            }
            Err(e) => {
                error!(watcher: name, error = %e, "Watcher registered without subscription");
                None
            }
        };

        watchers.insert(name, StoredWatcher { config, handler, backfill, live });
        Ok(())
    }

    /// Cancels and forgets the watcher called `name`, ending its subscription on the node.
    /// Returns `false` if there is none.
    pub async fn remove_watcher(&self, name: &str) -> bool {
        let removed = self.shared.watchers.lock().await.remove(name);
        match removed {
            Some(watcher) => {
                if let Some(live) = watcher.live {
                    live.cancel();
                }
                info!(watcher: name, "Watcher removed");
                true
            }
            None => {
                warn!(watcher: name, "No watcher registered under this name");
                false
            }
        }
    }

    /// Cancels and forgets every watcher.
    pub async fn remove_all_watchers(&self) {
        let drained: Vec<_> = self.shared.watchers.lock().await.drain().collect();
        let count = drained.len();
        for (_, watcher) in drained {
            if let Some(live) = watcher.live {
                live.cancel();
            }
        }
        if count > 0 {
            info!(watchers = count, "All watchers removed");
        }
    }

    /// Removes every watcher and stops following connection renewals.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.remove_all_watchers().await;
        info!("Watcher manager shut down");
    }

    /// Registered watcher names, sorted.
    pub async fn watcher_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.watchers.lock().await.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    pub async fn len(&self) -> usize {
        self.shared.watchers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.shared.watchers.lock().await.is_empty()
    }

    /// Whether `name` is registered and its subscription task is running.
    pub async fn is_live(&self, name: &str) -> bool {
        self.shared
            .watchers
            .lock()
            .await
            .get(name)
            .and_then(|watcher| watcher.live.as_ref())
            .is_some_and(|live| !live.is_finished())
    }

    /// Number of watchers with a running subscription task.
    pub async fn live_count(&self) -> usize {
        self.shared
            .watchers
            .lock()
            .await
            .values()
            .filter_map(|watcher| watcher.live.as_ref())
            .filter(|live| !live.is_finished())
            .count()
    }

    #[must_use]
    pub fn connection(&self) -> &Arc<ConnectionManager<C>> {
        &self.shared.ctx.manager
    }

    #[must_use]
    pub fn metadata(&self) -> &Arc<MetadataCache> {
        self.shared.ctx.classifier.metadata()
    }
}

impl<C: Connector> Drop for WatcherManager<C> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl<C: Connector> Shared<C> {
    /// Recreates every watcher that is not already subscribed on `generation`.
    ///
    /// A watcher whose subscription cannot be created stays dormant until the next renewal.
    async fn resubscribe_all(&self, connection: &C::Connection, generation: u64) {
        let mut watchers = self.watchers.lock().await;
        let mut renewed = 0;
        let mut dormant = 0;

        for (name, watcher) in watchers.iter_mut() {
            // added after the renewal, already on the new connection
            if watcher.live.as_ref().is_some_and(|live| live.generation() == generation) {
                continue;
            }
            if let Some(old) = watcher.live.take() {
                old.cancel();
            }

            match create_subscription(
                &self.ctx,
                connection,
                generation,
                &watcher.config,
                &watcher.handler,
                watcher.backfill.as_ref(),
            )
            .await
            {
                Ok(live) => {
                    watcher.live = Some(live);
                    renewed += 1;
                }
                Err(e) => {
                    error!(watcher: name, error = %e, "Failed to resubscribe watcher");
                    dormant += 1;
                }
            }
        }

        info!(
            generation = generation,
            renewed = renewed,
            dormant = dormant,
            watchers = watchers.len(),
            "Resubscribed watchers on renewed connection"
        );
    }
}

async fn listen_for_renewals<C: Connector>(
    shared: Arc<Shared<C>>,
    mut events: tokio::sync::broadcast::Receiver<ConnectionEvent<C::Connection>>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;

            () = shutdown.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Ok(ConnectionEvent::Renewed { connection, generation }) => {
                if generation < shared.ctx.manager.generation() {
                    debug!(generation = generation, "Skipping superseded renewal");
                    continue;
                }
                shared.resubscribe_all(&connection, generation).await;
            }
            Ok(ConnectionEvent::Failed { attempts }) => {
                error!(
                    attempts = attempts,
                    "Connection permanently lost, watchers will not be resubscribed"
                );
                break;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped = skipped, "Missed connection events, resubscribing on current");
                match shared.ctx.manager.current() {
                    Ok((connection, generation)) => {
                        shared.resubscribe_all(&connection, generation).await;
                    }
                    Err(e) => {
                        error!(error = %e, "No connection to resubscribe on");
                        break;
                    }
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("Renewal listener stopped");
}
