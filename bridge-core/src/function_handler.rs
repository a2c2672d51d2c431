//! Function-call handler (C5): streaming argument buffering, dispatch,
//! and hang-up inference.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

const HANG_UP_DELAY_SECS: f64 = 8.0;

/// A registered function callable. Implementations may be sync or async;
/// the handler always awaits them through this trait.
#[async_trait]
pub trait FunctionCallable: Send + Sync {
    async fn call(&self, args: Value) -> Value;
}

/// Adapts a plain async closure into a [`FunctionCallable`].
pub struct AsyncFn<F>(pub F);

type BoxFuture<'a> = Pin<Box<dyn Future<Output = Value> + Send + 'a>>;

#[async_trait]
impl<F> FunctionCallable for AsyncFn<F>
where
    F: Fn(Value) -> BoxFuture<'static> + Send + Sync,
{
    async fn call(&self, args: Value) -> Value {
        (self.0)(args).await
    }
}

#[derive(Default)]
struct ActiveCall {
    name: String,
    argument_buffer: String,
}

/// Callback invoked when a function result satisfies a hang-up condition.
/// Receives the human-readable reason, with the 8s delay already applied.
pub type HangUpCallback = Arc<dyn Fn(String) + Send + Sync>;

const CLOSING_FUNCTIONS: &[&str] = &["wrap_up", "transfer_to_human"];
const CLOSING_STAGES: &[&str] = &["call_complete", "human_transfer"];

/// Dispatches AI-service function calls and infers call-ending results.
pub struct FunctionHandler {
    registry: Mutex<HashMap<String, Arc<dyn FunctionCallable>>>,
    active_calls: Mutex<HashMap<String, ActiveCall>>,
    hang_up: Mutex<Option<HangUpCallback>>,
    cancel: CancellationToken,
}

impl Default for FunctionHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionHandler {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
            active_calls: Mutex::new(HashMap::new()),
            hang_up: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    pub fn register(&self, name: impl Into<String>, callable: Arc<dyn FunctionCallable>) {
        self.registry.lock().insert(name.into(), callable);
    }

    pub fn set_hang_up_callback(&self, callback: HangUpCallback) {
        *self.hang_up.lock() = Some(callback);
    }

    /// Pre-registers a function call announced by `response.output_item.added`.
    pub fn begin_call(&self, call_id: &str, name: &str) {
        self.active_calls.lock().insert(
            call_id.to_string(),
            ActiveCall {
                name: name.to_string(),
                argument_buffer: String::new(),
            },
        );
    }

    /// Appends an argument delta for an in-flight call.
    pub fn push_argument_delta(&self, call_id: &str, delta: &str) {
        if let Some(call) = self.active_calls.lock().get_mut(call_id) {
            call.argument_buffer.push_str(delta);
        }
    }

    /// Finalizes a call: parses arguments, dispatches, and returns the
    /// result plus whether a hang-up condition was inferred. `arguments_final`,
    /// if present, supersedes the accumulated delta buffer.
    pub async fn complete_call(&self, call_id: &str, arguments_final: Option<String>) -> Value {
        let Some(call) = self.active_calls.lock().remove(call_id) else {
            log::warn!("[FunctionHandler] complete_call for unknown call_id {call_id}");
            return serde_json::json!({ "error": "unknown call" });
        };

        let raw_args = arguments_final.unwrap_or(call.argument_buffer);
        let args: Value = if raw_args.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(&raw_args) {
                Ok(v) => v,
                Err(e) => {
                    log::warn!("[FunctionHandler] argument parse failed for {}: {e}", call.name);
                    return serde_json::json!({ "error": e.to_string() });
                }
            }
        };

        let callable = self.registry.lock().get(&call.name).cloned();
        let result = match callable {
            Some(callable) => callable.call(args).await,
            None => {
                log::warn!("[FunctionHandler] unknown function '{}'", call.name);
                serde_json::json!({ "error": "not implemented" })
            }
        };

        if let Some(reason) = self.infer_hang_up(&call.name, &result) {
            self.schedule_hang_up(reason);
        }

        result
    }

    fn infer_hang_up(&self, function_name: &str, result: &Value) -> Option<String> {
        let next_action = result.get("next_action").and_then(Value::as_str);
        let stage = result
            .get("context")
            .and_then(|c| c.get("stage"))
            .and_then(Value::as_str);

        let triggered = next_action == Some("end_call")
            || CLOSING_FUNCTIONS.contains(&function_name)
            || stage.map(|s| CLOSING_STAGES.contains(&s)).unwrap_or(false);

        if !triggered {
            return None;
        }

        let reason = match stage {
            Some("call_complete") => {
                "Call completed successfully – all tasks finished".to_string()
            }
            Some("human_transfer") => {
                let reference = result
                    .get("context")
                    .and_then(|c| c.get("reference"))
                    .and_then(Value::as_str)
                    .unwrap_or("n/a");
                format!("Transferred to human agent – Reference: {reference}")
            }
            _ => format!("Call ended after {function_name} completion"),
        };
        Some(reason)
    }

    fn schedule_hang_up(&self, reason: String) {
        let hang_up = self.hang_up.lock().clone();
        let Some(hang_up) = hang_up else {
            log::warn!("[FunctionHandler] hang-up inferred but no callback registered");
            return;
        };
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_secs_f64(HANG_UP_DELAY_SECS)) => {
                    hang_up(reason);
                }
            }
        });
    }

    /// Cancels any pending scheduled hang-up. Called during call close.
    pub fn cancel_pending(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration as StdDuration;

    struct Echo;

    #[async_trait]
    impl FunctionCallable for Echo {
        async fn call(&self, args: Value) -> Value {
            serde_json::json!({ "echoed": args })
        }
    }

    #[tokio::test]
    async fn unknown_function_returns_not_implemented() {
        let handler = FunctionHandler::new();
        handler.begin_call("call_1", "ghost");
        let result = handler.complete_call("call_1", None).await;
        assert_eq!(result["error"], "not implemented");
    }

    #[tokio::test]
    async fn malformed_json_arguments_returns_error() {
        let handler = FunctionHandler::new();
        handler.register("echo", Arc::new(Echo));
        handler.begin_call("call_1", "echo");
        handler.push_argument_delta("call_1", "{not json");
        let result = handler.complete_call("call_1", None).await;
        assert!(result.get("error").is_some());
    }

    #[tokio::test]
    async fn empty_arguments_dispatch_as_empty_object() {
        let handler = FunctionHandler::new();
        handler.register("echo", Arc::new(Echo));
        handler.begin_call("call_1", "echo");
        let result = handler.complete_call("call_1", None).await;
        assert_eq!(result["echoed"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn active_call_is_removed_after_completion() {
        let handler = FunctionHandler::new();
        handler.register("echo", Arc::new(Echo));
        handler.begin_call("call_1", "echo");
        handler.complete_call("call_1", None).await;
        assert!(handler.active_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn wrap_up_with_call_complete_stage_schedules_hang_up() {
        let handler = FunctionHandler::new();
        struct WrapUp;
        #[async_trait]
        impl FunctionCallable for WrapUp {
            async fn call(&self, _args: Value) -> Value {
                serde_json::json!({ "context": { "stage": "call_complete" } })
            }
        }
        handler.register("wrap_up", Arc::new(WrapUp));
        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();
        let reason_holder = Arc::new(Mutex::new(String::new()));
        let reason_clone = reason_holder.clone();
        handler.set_hang_up_callback(Arc::new(move |reason| {
            called_clone.store(true, Ordering::SeqCst);
            *reason_clone.lock() = reason;
        }));

        handler.begin_call("call_1", "wrap_up");
        handler.complete_call("call_1", None).await;

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert!(!called.load(Ordering::SeqCst));
    }

    #[test]
    fn infer_hang_up_matches_closing_function_set() {
        let handler = FunctionHandler::new();
        let result = serde_json::json!({});
        assert!(handler.infer_hang_up("wrap_up", &result).is_some());
        assert!(handler.infer_hang_up("transfer_to_human", &result).is_some());
        assert!(handler.infer_hang_up("lookup_balance", &result).is_none());
    }

    #[test]
    fn infer_hang_up_uses_exact_reason_strings() {
        let handler = FunctionHandler::new();
        let complete = serde_json::json!({ "context": { "stage": "call_complete" } });
        assert_eq!(
            handler.infer_hang_up("finish", &complete).unwrap(),
            "Call completed successfully – all tasks finished"
        );

        let transfer = serde_json::json!({ "context": { "stage": "human_transfer", "reference": "R1" } });
        assert_eq!(
            handler.infer_hang_up("finish", &transfer).unwrap(),
            "Transferred to human agent – Reference: R1"
        );
    }
}
