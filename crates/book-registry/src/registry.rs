use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use connector_coinbase::run_feed;
use connector_core::{
    create_command_channel, create_message_channel, CommandSender, FeedCommand, FeedConfig,
    FeedError, MessageReceiver,
};
use dashmap::DashMap;
use metrics::{create_metrics, SharedMetrics};
use model::{FeedMessage, L2Update};
use orderbook::{BookLevels, CallbackId, PriceLevel, ProductOrderBook};
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::RegistryError;

/// How long shutdown waits for each feed task to finish.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Updates held per product while it waits for a snapshot.
const MAX_HELD_UPDATES: usize = 10_000;

/// Running feed attached to a registry.
struct FeedHandle {
    commands: CommandSender,
    shutdown_tx: watch::Sender<bool>,
    feed_task: Mutex<Option<JoinHandle<()>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

/// Product id to order book registry, optionally driven by a live feed.
///
/// Books are created empty when a product is added and stay for the
/// lifetime of the registry. Feed messages are applied by a single
/// dispatcher thread in arrival order, so diffs for one product are never
/// reordered. Updates for a product that has no snapshot yet are held and
/// replayed once one lands, so an unseeded book never stalls the others.
/// Queries work from any thread.
pub struct CoinbaseOrderBook {
    books: RwLock<HashMap<String, Arc<ProductOrderBook>>>,
    /// Products added since the last subscription refresh.
    pending: Mutex<Vec<String>>,
    callback_index: DashMap<CallbackId, String>,
    /// Updates received before the product's first snapshot.
    held: DashMap<String, VecDeque<L2Update>>,
    metrics: SharedMetrics,
    feed: OnceLock<FeedHandle>,
}

impl CoinbaseOrderBook {
    /// Creates a registry with no feed attached. Messages are applied with [`route`](Self::route).
    pub fn new() -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
            callback_index: DashMap::new(),
            held: DashMap::new(),
            metrics: create_metrics(),
            feed: OnceLock::new(),
        }
    }

    /// Creates a registry for `product_ids` and starts streaming them from `feed_url`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn make_order_book<I, S>(
        product_ids: I,
        feed_url: impl Into<String>,
    ) -> Result<Arc<Self>, RegistryError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let product_ids = product_ids.into_iter().map(Into::into).collect();
        Self::make_order_book_with_config(FeedConfig::new(product_ids, feed_url))
    }

    pub fn make_order_book_with_config(config: FeedConfig) -> Result<Arc<Self>, RegistryError> {
        let runtime = Handle::try_current().map_err(|_| RegistryError::NoRuntime)?;

        let registry = Arc::new(Self::new());
        for product_id in &config.product_ids {
            registry.insert_book(product_id);
        }

        let (sender, receiver) = create_message_channel(config.channel_capacity);
        let (command_tx, command_rx) = create_command_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            products = ?config.product_ids,
            url = %config.feed_url,
            "Starting order book feed"
        );

        let feed_metrics = registry.metrics.clone();
        let feed_task = runtime.spawn(async move {
            match run_feed(config, sender, command_rx, shutdown_rx, feed_metrics).await {
                Ok(()) => info!("Feed stopped"),
                Err(e) => error!(error = %e, "Feed stopped with error"),
            }
        });

        let weak = Arc::downgrade(&registry);
        let dispatcher = runtime.spawn_blocking(move || dispatch(weak, receiver));

        let handle = FeedHandle {
            commands: command_tx,
            shutdown_tx,
            feed_task: Mutex::new(Some(feed_task)),
            dispatcher: Mutex::new(Some(dispatcher)),
        };
        if registry.feed.set(handle).is_err() {
            warn!("Registry already had a feed attached");
        }

        Ok(registry)
    }

    /// Returns the book for `product_id`.
    pub fn get_order_book(&self, product_id: &str) -> Result<Arc<ProductOrderBook>, RegistryError> {
        self.books
            .read()
            .get(product_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(product_id.to_string()))
    }

    pub fn get_tracked_products(&self) -> HashSet<String> {
        self.books.read().keys().cloned().collect()
    }

    pub fn is_tracked(&self, product_id: &str) -> bool {
        self.books.read().contains_key(product_id)
    }

    /// Adds empty books for products not yet tracked and queues them for subscription.
    ///
    /// With `refresh_subscriptions` set, the queue is sent to the feed right away.
    /// Returns the number of products that were new.
    pub fn add_order_books<I, S>(
        &self,
        product_ids: I,
        refresh_subscriptions: bool,
    ) -> Result<usize, RegistryError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut added = 0;
        for product_id in product_ids {
            let product_id = product_id.into();
            if self.insert_book(&product_id) {
                self.pending.lock().push(product_id);
                added += 1;
            }
        }

        if refresh_subscriptions {
            self.refresh_subscriptions()?;
        }
        Ok(added)
    }

    /// Subscribes the feed to every product queued by [`add_order_books`](Self::add_order_books).
    ///
    /// Without a feed the queue is left as is. Returns the number of products sent.
    pub fn refresh_subscriptions(&self) -> Result<usize, RegistryError> {
        let Some(feed) = self.feed.get() else {
            debug!("No feed attached, keeping queued subscriptions");
            return Ok(0);
        };

        if *feed.shutdown_tx.borrow() {
            return Err(FeedError::Shutdown.into());
        }

        let queued = std::mem::take(&mut *self.pending.lock());
        if queued.is_empty() {
            return Ok(0);
        }

        let count = queued.len();
        info!(products = ?queued, "Refreshing subscriptions");
        if let Err(e) = feed.commands.send(FeedCommand::Subscribe(queued)) {
            let FeedCommand::Subscribe(unsent) = e.0;
            self.pending.lock().extend(unsent);
            return Err(FeedError::ChannelClosed.into());
        }
        Ok(count)
    }

    /// Registers `callback` on the book for `product_id`.
    pub fn add_callback<F>(
        &self,
        product_id: &str,
        callback: F,
    ) -> Result<CallbackId, RegistryError>
    where
        F: Fn(&ProductOrderBook) + Send + Sync + 'static,
    {
        let book = self.get_order_book(product_id)?;
        let id = book.register_callback(callback);
        self.callback_index.insert(id, product_id.to_string());
        Ok(id)
    }

    /// Removes a callback from whichever book holds it. Returns `false` if it was not registered.
    pub fn remove_callback(&self, id: CallbackId) -> bool {
        let Some((_, product_id)) = self.callback_index.remove(&id) else {
            return false;
        };
        match self.books.read().get(&product_id) {
            Some(book) => book.remove_callback(id),
            None => false,
        }
    }

    pub fn get_book(
        &self,
        product_id: &str,
        top_n: Option<usize>,
    ) -> Result<BookLevels, RegistryError> {
        Ok(self.get_order_book(product_id)?.get_book(top_n))
    }

    pub fn get_asks(
        &self,
        product_id: &str,
        top_n: Option<usize>,
    ) -> Result<Vec<PriceLevel>, RegistryError> {
        Ok(self.get_order_book(product_id)?.get_asks(top_n))
    }

    pub fn get_bids(
        &self,
        product_id: &str,
        top_n: Option<usize>,
    ) -> Result<Vec<PriceLevel>, RegistryError> {
        Ok(self.get_order_book(product_id)?.get_bids(top_n))
    }

    /// Full book for `product_id` in its printable form.
    pub fn book_string(&self, product_id: &str) -> Result<String, RegistryError> {
        Ok(self.get_order_book(product_id)?.to_string())
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// Applies one feed message to its product's book.
    ///
    /// Fails with `NotFound` for untracked products and with `Book` when the
    /// message was rejected; a rejected message leaves the book unchanged.
    /// An update for a book without a snapshot is held, never applied
    /// blocking, and replayed in order after the next accepted snapshot.
    pub fn apply(&self, message: FeedMessage) -> Result<(), RegistryError> {
        let book = self.get_order_book(message.product_id())?;

        match message {
            FeedMessage::Snapshot(snapshot) => {
                book.apply_snapshot(&snapshot.bids, &snapshot.asks)?;
                self.metrics.inc_snapshots_applied();
                debug!(
                    product_id = %snapshot.product_id,
                    bids = snapshot.bids.len(),
                    asks = snapshot.asks.len(),
                    "Snapshot applied"
                );
                self.replay_held(&book);
            }
            FeedMessage::L2Update(update) => {
                if !book.is_initialized() {
                    self.hold(update);
                    // A snapshot may have landed between the check and the hold.
                    if book.is_initialized() {
                        self.replay_held(&book);
                    }
                    return Ok(());
                }
                self.apply_update(&book, &update)?;
            }
        }
        Ok(())
    }

    /// Number of updates waiting for `product_id`'s snapshot.
    pub fn held_updates(&self, product_id: &str) -> usize {
        self.held.get(product_id).map_or(0, |held| held.len())
    }

    fn apply_update(
        &self,
        book: &ProductOrderBook,
        update: &L2Update,
    ) -> Result<(), RegistryError> {
        let applied = book.apply_diffs(&update.changes)?;
        self.metrics.inc_updates_applied();
        self.metrics
            .add_skipped_changes((update.changes.len() - applied) as u64);
        Ok(())
    }

    fn hold(&self, update: L2Update) {
        let mut held = self.held.entry(update.product_id.clone()).or_default();
        if held.len() >= MAX_HELD_UPDATES {
            held.pop_front();
            self.metrics.inc_rejected_messages();
            warn!(
                product_id = %update.product_id,
                limit = MAX_HELD_UPDATES,
                "Held update limit reached, dropping oldest"
            );
        }
        debug!(
            product_id = %update.product_id,
            held = held.len() + 1,
            "Holding update until snapshot"
        );
        held.push_back(update);
    }

    fn replay_held(&self, book: &ProductOrderBook) {
        let Some((_, held)) = self.held.remove(book.product_id()) else {
            return;
        };

        debug!(product_id = %book.product_id(), count = held.len(), "Replaying held updates");
        for update in held {
            if let Err(e) = self.apply_update(book, &update) {
                self.metrics.inc_rejected_messages();
                warn!(product_id = %book.product_id(), error = %e, "Dropping held update");
            }
        }
    }

    /// Applies a feed message, logging instead of failing.
    ///
    /// Messages for untracked products are ignored.
    pub fn route(&self, message: FeedMessage) {
        let kind = message.kind();
        let product_id = message.product_id().to_string();

        match self.apply(message) {
            Ok(()) => {}
            Err(RegistryError::NotFound(_)) => {
                self.metrics.inc_untracked_messages();
                debug!(product_id = %product_id, kind, "Ignoring message for untracked product");
            }
            Err(e) => {
                self.metrics.inc_rejected_messages();
                warn!(product_id = %product_id, kind, error = %e, "Dropping book message");
            }
        }
    }

    /// Stops the feed and waits for its tasks to finish.
    pub async fn shutdown(&self) {
        let Some(feed) = self.feed.get() else {
            return;
        };

        info!("Shutting down order book feed");
        let _ = feed.shutdown_tx.send(true);

        let feed_task = feed.feed_task.lock().take();
        if let Some(mut task) = feed_task {
            match tokio::time::timeout(JOIN_TIMEOUT, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Feed task panicked"),
                Err(_) => {
                    warn!("Feed task did not stop in time, aborting it");
                    task.abort();
                }
            }
        }

        let dispatcher = feed.dispatcher.lock().take();
        if let Some(task) = dispatcher {
            match tokio::time::timeout(JOIN_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Dispatcher panicked"),
                Err(_) => warn!("Dispatcher did not stop in time, detaching it"),
            }
        }

        info!("Order book feed stopped");
    }

    /// Returns `true` if the book was created.
    fn insert_book(&self, product_id: &str) -> bool {
        let mut books = self.books.write();
        if books.contains_key(product_id) {
            return false;
        }
        books.insert(
            product_id.to_string(),
            Arc::new(ProductOrderBook::new(product_id)),
        );
        true
    }
}

impl Default for CoinbaseOrderBook {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CoinbaseOrderBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoinbaseOrderBook")
            .field("products", &self.get_tracked_products())
            .field("pending", &self.pending.lock().len())
            .field("feed", &self.feed.get().is_some())
            .finish()
    }
}

/// Applies feed messages in order until the feed stops or the registry is dropped.
///
/// Runs on a blocking thread since callbacks run inline and may be slow.
fn dispatch(registry: Weak<CoinbaseOrderBook>, mut receiver: MessageReceiver) {
    while let Some(message) = receiver.blocking_recv() {
        let Some(registry) = registry.upgrade() else {
            break;
        };
        registry.route(message);
    }
    debug!("Dispatcher stopped");
}
