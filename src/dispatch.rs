//! Inbound message dispatch
//!
//! Responses are correlated to their pending request through the transaction
//! table; server-push notifications are routed by method name. Handlers run
//! synchronously on the I/O loop task and must not block, since they delay
//! all subsequent I/O.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// One-shot handler for a response, invoked with the whole message
pub type ResponseHandler = Box<dyn FnOnce(Value) + Send>;

/// Handler for a server-push notification, invoked with the `params` payload
pub type NotificationHandler = Arc<dyn Fn(Value) + Send + Sync>;

// ============================================================================
// Transaction Table
// ============================================================================

/// Pending requests awaiting their reply
///
/// Each entry is removed exactly once, atomically, on the first matching
/// response. A response for an unknown or already-consumed id is not an
/// error; it is dropped silently.
#[derive(Default)]
pub struct TransactionTable {
    pending: Mutex<HashMap<i64, ResponseHandler>>,
}

impl TransactionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a one-shot handler for transaction `id`
    pub fn register<F>(&self, id: i64, handler: F)
    where
        F: FnOnce(Value) + Send + 'static,
    {
        self.pending.lock().unwrap().insert(id, Box::new(handler));
    }

    /// Atomically remove and return the handler for `id`, if present
    pub fn take(&self, id: i64) -> Option<ResponseHandler> {
        self.pending.lock().unwrap().remove(&id)
    }

    /// Check whether a transaction is still pending
    pub fn contains(&self, id: i64) -> bool {
        self.pending.lock().unwrap().contains_key(&id)
    }

    /// Number of pending transactions
    pub fn len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// True when no transactions are pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Notification Router
// ============================================================================

/// Routes server-initiated notifications to registered callbacks
#[derive(Default)]
pub struct NotificationRouter {
    routes: Mutex<HashMap<String, NotificationHandler>>,
}

impl NotificationRouter {
    /// Create an empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the callback for `method`
    pub fn register<F>(&self, method: &str, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.routes
            .lock()
            .unwrap()
            .insert(method.to_string(), Arc::new(handler));
    }

    /// Route a notification's params to its callback.
    ///
    /// Unregistered methods are ignored; returns whether a callback ran.
    pub fn route(&self, method: &str, params: Value) -> bool {
        let handler = self.routes.lock().unwrap().get(method).map(Arc::clone);
        match handler {
            Some(handler) => {
                handler(params);
                true
            }
            None => {
                debug!("No handler registered for notification {method}");
                false
            }
        }
    }
}

// ============================================================================
// Message dispatch
// ============================================================================

/// Dispatch one complete inbound message.
///
/// Id-bearing messages go through the transaction table; the rest are routed
/// by method name. A body that is not valid JSON is a message-level fault:
/// the frame is dropped and the stream continues.
pub fn dispatch(body: &[u8], transactions: &TransactionTable, notifications: &NotificationRouter) {
    let message: Value = match serde_json::from_slice(body) {
        Ok(message) => message,
        Err(e) => {
            warn!("Dropping unparseable frame ({} bytes): {e}", body.len());
            return;
        }
    };

    if let Some(id) = message.get("id").and_then(Value::as_i64) {
        match transactions.take(id) {
            Some(handler) => handler(message),
            None => debug!("Dropping response for unknown transaction {id}"),
        }
        return;
    }

    if let Some(method) = message.get("method").and_then(Value::as_str) {
        let params = message.get("params").cloned().unwrap_or(Value::Null);
        notifications.route(method, params);
    } else {
        debug!("Dropping message with neither id nor method");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn respond(id: i64) -> Vec<u8> {
        serde_json::to_vec(&json!({"jsonrpc": "2.0", "id": id, "result": {"for": id}})).unwrap()
    }

    #[test]
    fn test_out_of_order_responses_route_exactly_once() {
        let transactions = TransactionTable::new();
        let notifications = NotificationRouter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let ids: Vec<i64> = (10..15).collect();
        for &id in &ids {
            let seen = Arc::clone(&seen);
            transactions.register(id, move |message| {
                seen.lock().unwrap().push((id, message["result"]["for"].as_i64().unwrap()));
            });
        }
        assert_eq!(transactions.len(), ids.len());

        // Deliver replies in reverse order.
        for &id in ids.iter().rev() {
            dispatch(&respond(id), &transactions, &notifications);
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), ids.len());
        for (id, routed) in seen.iter() {
            assert_eq!(id, routed);
        }
        assert!(transactions.is_empty());
    }

    #[test]
    fn test_unknown_id_dropped_silently() {
        let transactions = TransactionTable::new();
        let notifications = NotificationRouter::new();

        dispatch(&respond(999), &transactions, &notifications);

        // A second delivery of a consumed id is equally silent.
        transactions.register(5, |_| {});
        dispatch(&respond(5), &transactions, &notifications);
        dispatch(&respond(5), &transactions, &notifications);
        assert!(!transactions.contains(5));
    }

    #[test]
    fn test_notification_routing() {
        let transactions = TransactionTable::new();
        let notifications = NotificationRouter::new();
        let received = Arc::new(Mutex::new(None));

        let received_clone = Arc::clone(&received);
        notifications.register("textDocument/publishDiagnostics", move |params| {
            *received_clone.lock().unwrap() = Some(params);
        });

        let body = serde_json::to_vec(&json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": {"uri": "file:///tmp/main.cpp", "diagnostics": []},
        }))
        .unwrap();
        dispatch(&body, &transactions, &notifications);

        let params = received.lock().unwrap().take().unwrap();
        assert_eq!(params["uri"], "file:///tmp/main.cpp");
    }

    #[test]
    fn test_unregistered_method_ignored() {
        let notifications = NotificationRouter::new();
        assert!(!notifications.route("window/logMessage", json!({})));
    }

    #[test]
    fn test_unparseable_body_is_isolated() {
        let transactions = TransactionTable::new();
        let notifications = NotificationRouter::new();

        transactions.register(1, |_| {});
        dispatch(b"this is not json", &transactions, &notifications);

        // The table is untouched and later traffic still routes.
        assert!(transactions.contains(1));
        dispatch(&respond(1), &transactions, &notifications);
        assert!(!transactions.contains(1));
    }
}
