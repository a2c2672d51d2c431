//! Generic priority-ordered event router with a middleware pipeline.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

type BoxFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// A registered event handler. Handlers run sequentially per event, highest
/// priority first, so ordering within a single event is deterministic.
pub type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static> + Send + Sync>;

/// Transforms an event payload before handler dispatch. Returning `None`
/// drops the event -- no handler for that kind runs.
pub type Middleware = Arc<dyn Fn(Value) -> Option<Value> + Send + Sync>;

/// Routes events of kind `K` to their registered handlers, applying the
/// middleware chain first.
pub struct EventRouter<K: Eq + Hash + Clone + Debug + Send + Sync + 'static> {
    handlers: RwLock<HashMap<K, Vec<(i32, Handler)>>>,
    middleware: RwLock<Vec<Middleware>>,
}

impl<K: Eq + Hash + Clone + Debug + Send + Sync + 'static> Default for EventRouter<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone + Debug + Send + Sync + 'static> EventRouter<K> {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            middleware: RwLock::new(Vec::new()),
        }
    }

    /// Registers a handler for `kind` at the given priority (higher runs first).
    pub fn register(&self, kind: K, priority: i32, handler: Handler) {
        let mut handlers = self.handlers.write();
        let list = handlers.entry(kind).or_default();
        list.push((priority, handler));
        list.sort_by(|a, b| b.0.cmp(&a.0));
    }

    /// Appends a middleware stage to the pipeline. Stages run in registration order.
    pub fn use_middleware(&self, middleware: Middleware) {
        self.middleware.write().push(middleware);
    }

    /// Dispatches `payload` for `kind` through the middleware pipeline, then
    /// sequentially through every registered handler for that kind.
    pub async fn dispatch(&self, kind: K, payload: Value) {
        let mut current = payload;
        for stage in self.middleware.read().iter() {
            match stage(current) {
                Some(next) => current = next,
                None => return,
            }
        }

        let handlers: Vec<Handler> = {
            let handlers = self.handlers.read();
            match handlers.get(&kind) {
                Some(list) => list.iter().map(|(_, h)| h.clone()).collect(),
                None => {
                    log::debug!("[EventRouter] no handlers registered for {kind:?}");
                    return;
                }
            }
        };

        for handler in handlers {
            handler(current.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn handler_of(order: Arc<parking_lot::Mutex<Vec<&'static str>>>, label: &'static str) -> Handler {
        Arc::new(move |_payload| {
            let order = order.clone();
            Box::pin(async move {
                order.lock().push(label);
            })
        })
    }

    #[tokio::test]
    async fn handlers_run_in_priority_order() {
        let router: EventRouter<&'static str> = EventRouter::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        router.register("audio", 1, handler_of(order.clone(), "low"));
        router.register("audio", 10, handler_of(order.clone(), "high"));
        router.dispatch("audio", Value::Null).await;
        assert_eq!(*order.lock(), vec!["high", "low"]);
    }

    #[tokio::test]
    async fn unknown_kind_is_silently_ignored() {
        let router: EventRouter<&'static str> = EventRouter::new();
        router.dispatch("ghost", Value::Null).await;
    }

    #[tokio::test]
    async fn middleware_can_drop_event() {
        let router: EventRouter<&'static str> = EventRouter::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        router.register(
            "audio",
            0,
            Arc::new(move |_| {
                let calls = calls_clone.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                })
            }),
        );
        router.use_middleware(Arc::new(|_payload| None));
        router.dispatch("audio", Value::Null).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn middleware_can_transform_payload() {
        let router: EventRouter<&'static str> = EventRouter::new();
        let seen = Arc::new(parking_lot::Mutex::new(Value::Null));
        let seen_clone = seen.clone();
        router.register(
            "audio",
            0,
            Arc::new(move |payload| {
                let seen = seen_clone.clone();
                Box::pin(async move {
                    *seen.lock() = payload;
                })
            }),
        );
        router.use_middleware(Arc::new(|_payload| Some(serde_json::json!({"redacted": true}))));
        router.dispatch("audio", serde_json::json!({"secret": "x"})).await;
        assert_eq!(*seen.lock(), serde_json::json!({"redacted": true}));
    }
}
