//! Event dispatcher
//!
//! Routes decoded events from every session to registered handlers.

use super::DispatchEvent;
use cord_core::{EventType, Intents};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Tag that receives every event, after the event's own handlers
pub const WILDCARD: &str = "*";

type HandlerFn =
    Arc<dyn Fn(Arc<DispatchEvent>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Clone)]
struct Handler {
    id: u64,
    call: HandlerFn,
    /// Set for one-shot handlers; flipped by the first delivery
    fired: Option<Arc<AtomicBool>>,
}

impl Handler {
    /// Claim this handler for one delivery. One-shot handlers are claimed at most once.
    fn claim(&self) -> bool {
        self.fired
            .as_ref()
            .map_or(true, |fired| !fired.swap(true, Ordering::SeqCst))
    }
}

/// Handler registry and delivery
pub struct EventDispatcher {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
    extra_intents: Intents,
    next_id: AtomicU64,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(Intents::empty())
    }
}

impl EventDispatcher {
    /// Create a dispatcher; `extra_intents` are always requested on top of the handlers' needs
    #[must_use]
    pub fn new(extra_intents: Intents) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            extra_intents,
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler for an event type (or [`WILDCARD`]).
    ///
    /// Handlers run in registration order. Returns the handler's index within its event type.
    pub fn register_handler<F, Fut>(&self, event_type: impl Into<String>, handler: F) -> usize
    where
        F: Fn(Arc<DispatchEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.insert(event_type.into(), handler, None)
    }

    /// Register a handler that runs for the next matching event only
    pub fn register_once<F, Fut>(&self, event_type: impl Into<String>, handler: F) -> usize
    where
        F: Fn(Arc<DispatchEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.insert(
            event_type.into(),
            handler,
            Some(Arc::new(AtomicBool::new(false))),
        )
    }

    /// Remove the handler at `index` for `event_type`. Later handlers shift down by one.
    pub fn remove_handler(&self, event_type: &str, index: usize) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(event_type) else {
            return false;
        };
        if index >= list.len() {
            return false;
        }
        list.remove(index);
        if list.is_empty() {
            handlers.remove(event_type);
        }
        true
    }

    /// Number of handlers registered for `event_type`
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers.read().get(event_type).map_or(0, Vec::len)
    }

    /// Intents needed by the registered handlers, plus the configured extras
    pub fn intents(&self) -> Intents {
        let handlers = self.handlers.read();
        let needed = handlers
            .keys()
            .filter_map(|name| EventType::from_str(name))
            .map(EventType::required_intents);
        Intents::combine(needed) | self.extra_intents
    }

    /// Deliver one event to its handlers, then to wildcard handlers.
    ///
    /// Handler errors and panics are logged; the remaining handlers still run.
    pub async fn dispatch(&self, event: DispatchEvent) {
        let event = Arc::new(event);
        let selected = self.select(&event.name);
        if selected.is_empty() {
            tracing::trace!(event = %event.name, seq = event.sequence, "No handler for event");
            return;
        }

        for handler in selected {
            let call = Arc::clone(&handler.call);
            let arg = Arc::clone(&event);
            let result = AssertUnwindSafe(async move { call(arg).await })
                .catch_unwind()
                .await;

            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::error!(
                    shard_id = event.shard_id,
                    event = %event.name,
                    seq = event.sequence,
                    error = %err,
                    "Event handler failed"
                ),
                Err(panic) => tracing::error!(
                    shard_id = event.shard_id,
                    event = %event.name,
                    seq = event.sequence,
                    panic = panic_message(&*panic),
                    "Event handler panicked"
                ),
            }
        }
    }

    /// Start a delivery task for one session.
    ///
    /// Events pushed into the returned sender are delivered in order; the task ends once every
    /// sender is dropped and the queue is drained.
    pub fn spawn_queue(
        self: &Arc<Self>,
        shard_id: u32,
        capacity: usize,
    ) -> (mpsc::Sender<DispatchEvent>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(capacity.max(1));
        let dispatcher = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                dispatcher.dispatch(event).await;
            }
            tracing::debug!(shard_id, "Dispatch queue closed");
        });
        (tx, handle)
    }

    fn insert<F, Fut>(
        &self,
        event_type: String,
        handler: F,
        fired: Option<Arc<AtomicBool>>,
    ) -> usize
    where
        F: Fn(Arc<DispatchEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let call: HandlerFn = Arc::new(move |event| handler(event).boxed());
        let handler = Handler {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            call,
            fired,
        };

        let mut handlers = self.handlers.write();
        let list = handlers.entry(event_type).or_default();
        list.push(handler);
        list.len() - 1
    }

    /// Handlers to run for `name`, claiming one-shot handlers and unregistering them
    fn select(&self, name: &str) -> Vec<Handler> {
        let mut selected = Vec::new();
        let mut spent = Vec::new();
        {
            let handlers = self.handlers.read();
            let specific = handlers.get(name).into_iter().flatten();
            let wildcard = if name == WILDCARD {
                None
            } else {
                handlers.get(WILDCARD)
            };
            for handler in specific.chain(wildcard.into_iter().flatten()) {
                if handler.claim() {
                    if handler.fired.is_some() {
                        spent.push(handler.id);
                    }
                    selected.push(handler.clone());
                }
            }
        }

        if !spent.is_empty() {
            let mut handlers = self.handlers.write();
            handlers.retain(|_, list| {
                list.retain(|handler| !spent.contains(&handler.id));
                !list.is_empty()
            });
        }
        selected
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read();
        f.debug_struct("EventDispatcher")
            .field("event_types", &handlers.keys().collect::<Vec<_>>())
            .field("extra_intents", &self.extra_intents)
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::Value;

    fn event(name: &str, sequence: u64) -> DispatchEvent {
        DispatchEvent::new(0, sequence, name, Value::Null)
    }

    async fn noop(_event: Arc<DispatchEvent>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn fail(_event: Arc<DispatchEvent>) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("handler error"))
    }

    async fn explode(_event: Arc<DispatchEvent>) -> anyhow::Result<()> {
        panic!("handler bug")
    }

    fn recorder() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn record(
        log: &Arc<Mutex<Vec<String>>>,
        label: &'static str,
    ) -> impl Fn(Arc<DispatchEvent>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync {
        let log = Arc::clone(log);
        move |event| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(format!("{label}:{}", event.sequence));
                Ok(())
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_handlers_run_in_registration_order_then_wildcard() {
        let dispatcher = EventDispatcher::default();
        let log = recorder();
        dispatcher.register_handler(WILDCARD, record(&log, "any"));
        dispatcher.register_handler(EventType::MessageCreate, record(&log, "first"));
        dispatcher.register_handler("MESSAGE_CREATE", record(&log, "second"));

        dispatcher.dispatch(event("MESSAGE_CREATE", 1)).await;
        dispatcher.dispatch(event("TYPING_START", 2)).await;

        assert_eq!(*log.lock(), vec!["first:1", "second:1", "any:1", "any:2"]);
    }

    #[tokio::test]
    async fn test_once_handler_runs_once() {
        let dispatcher = EventDispatcher::default();
        let log = recorder();
        dispatcher.register_once("READY", record(&log, "once"));
        dispatcher.register_handler("READY", record(&log, "always"));

        dispatcher.dispatch(event("READY", 1)).await;
        dispatcher.dispatch(event("READY", 2)).await;

        assert_eq!(*log.lock(), vec!["once:1", "always:1", "always:2"]);
        assert_eq!(dispatcher.handler_count("READY"), 1);
    }

    #[tokio::test]
    async fn test_remove_handler() {
        let dispatcher = EventDispatcher::default();
        let log = recorder();
        dispatcher.register_handler("GUILD_CREATE", record(&log, "a"));
        let index = dispatcher.register_handler("GUILD_CREATE", record(&log, "b"));
        assert_eq!(index, 1);

        assert!(dispatcher.remove_handler("GUILD_CREATE", 0));
        assert!(!dispatcher.remove_handler("GUILD_CREATE", 5));
        assert!(!dispatcher.remove_handler("GUILD_DELETE", 0));

        dispatcher.dispatch(event("GUILD_CREATE", 3)).await;
        assert_eq!(*log.lock(), vec!["b:3"]);
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_stop_delivery() {
        let dispatcher = EventDispatcher::default();
        let log = recorder();
        dispatcher.register_handler("MESSAGE_CREATE", explode);
        dispatcher.register_handler("MESSAGE_CREATE", fail);
        dispatcher.register_handler("MESSAGE_CREATE", record(&log, "after"));

        dispatcher.dispatch(event("MESSAGE_CREATE", 9)).await;
        assert_eq!(*log.lock(), vec!["after:9"]);
    }

    #[test]
    fn test_intents_follow_registrations() {
        let dispatcher = EventDispatcher::new(Intents::GUILDS);
        assert_eq!(dispatcher.intents(), Intents::GUILDS);

        dispatcher.register_handler("MESSAGE_CREATE", noop);
        dispatcher.register_handler("GUILD_MEMBER_ADD", noop);
        dispatcher.register_handler(WILDCARD, noop);
        assert_eq!(
            dispatcher.intents(),
            Intents::GUILDS
                | Intents::GUILD_MESSAGES
                | Intents::DIRECT_MESSAGES
                | Intents::GUILD_MEMBERS
        );

        dispatcher.remove_handler("GUILD_MEMBER_ADD", 0);
        assert!(!dispatcher.intents().contains(Intents::GUILD_MEMBERS));
    }

    #[tokio::test]
    async fn test_queue_delivers_in_order() {
        let dispatcher = Arc::new(EventDispatcher::default());
        let log = recorder();
        dispatcher.register_handler("MESSAGE_CREATE", record(&log, "m"));

        let (tx, handle) = dispatcher.spawn_queue(0, 2);
        for seq in 1..=5 {
            tx.send(event("MESSAGE_CREATE", seq)).await.unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        assert_eq!(*log.lock(), vec!["m:1", "m:2", "m:3", "m:4", "m:5"]);
    }
}
