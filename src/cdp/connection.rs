//! DevTools websocket connection
//!
//! Commands carry an increasing id and are matched to their responses by the
//! reader task. Events are routed by method name, one subscriber per method.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::common::sync::lock;
use crate::common::{Error, Observer, Result, Subscription};

/// Default time a command may take before it fails
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;
type Events = Arc<Mutex<HashMap<String, Observer<Value>>>>;

#[derive(Debug, Deserialize)]
struct ResponseError {
    code: i64,
    message: String,
}

/// One websocket to a browser or page target
pub struct CdpConnection {
    url: String,
    outgoing: mpsc::UnboundedSender<String>,
    pending: Pending,
    events: Events,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    on_closed: Observer<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CdpConnection {
    pub async fn connect(ws_url: &str) -> Result<Arc<Self>> {
        tracing::debug!(url = ws_url, "Connecting to DevTools");

        let (stream, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| Error::Protocol(format!("cannot connect to {ws_url}: {e}")))?;
        let (mut sink, mut source) = stream.split();

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let events: Events = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let on_closed = Observer::new();

        let writer = tokio::spawn(async move {
            while let Some(text) = outgoing_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::debug!(error = %e, "DevTools write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = {
            let pending = Arc::clone(&pending);
            let events = Arc::clone(&events);
            let closed = Arc::clone(&closed);
            let on_closed = on_closed.clone();
            let url = ws_url.to_string();
            tokio::spawn(async move {
                while let Some(message) = source.next().await {
                    match message {
                        Ok(Message::Text(text)) => dispatch(&text, &pending, &events),
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            tracing::debug!(error = %e, "DevTools read failed");
                            break;
                        }
                    }
                }

                tracing::debug!(url = %url, "DevTools connection closed");
                closed.store(true, Ordering::SeqCst);
                // Dropping the senders fails every command still waiting
                lock(&pending).clear();
                lock(&events).clear();
                on_closed.emit(());
            })
        };

        Ok(Arc::new(Self {
            url: ws_url.to_string(),
            outgoing,
            pending,
            events,
            next_id: AtomicU64::new(1),
            closed,
            on_closed,
            tasks: Mutex::new(vec![writer, reader]),
        }))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
        self.send_with_timeout(method, params, COMMAND_TIMEOUT).await
    }

    pub async fn send_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        if self.is_closed() {
            return Err(Error::TargetClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);

        let command = json!({ "id": id, "method": method, "params": params });
        if self.outgoing.send(command.to_string()).is_err() {
            lock(&self.pending).remove(&id);
            return Err(Error::TargetClosed);
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(Error::TargetClosed),
            Err(_) => {
                lock(&self.pending).remove(&id);
                return Err(Error::Timeout {
                    what: method.to_string(),
                    after: timeout,
                });
            }
        };

        if let Some(error) = response.get("error") {
            let error: ResponseError = serde_json::from_value(error.clone())?;
            return Err(Error::Cdp {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Route every `method` event to `handler`, replacing an earlier one
    pub fn on_event<F>(&self, method: &str, handler: F) -> Subscription
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let observer = lock(&self.events)
            .entry(method.to_string())
            .or_default()
            .clone();
        observer.subscribe(handler)
    }

    /// Route the next `method` event to `handler`
    pub fn once_event<F>(&self, method: &str, handler: F) -> Subscription
    where
        F: FnOnce(Value) + Send + 'static,
    {
        let observer = lock(&self.events)
            .entry(method.to_string())
            .or_default()
            .clone();
        observer.subscribe_once(handler)
    }

    /// Run `handler` once the connection is gone (immediately if it already is)
    pub fn on_close(&self, handler: Box<dyn FnOnce() + Send>) -> Subscription {
        if self.is_closed() {
            handler();
            return Subscription::empty();
        }
        self.on_closed.subscribe_once(move |()| handler())
    }

    /// Drop the socket. Close handlers still run.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        lock(&self.pending).clear();
        lock(&self.events).clear();
        self.on_closed.emit(());
    }

    /// Evaluate `expression` in the page and return its value
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .send(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(details) = result.get("exceptionDetails") {
            let text = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("script threw");
            return Err(Error::Protocol(format!("evaluation failed: {text}")));
        }
        Ok(result
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

fn dispatch(text: &str, pending: &Pending, events: &Events) {
    let Ok(message) = serde_json::from_str::<Value>(text) else {
        tracing::trace!("Ignoring non-JSON DevTools frame");
        return;
    };

    if let Some(id) = message.get("id").and_then(Value::as_u64) {
        if let Some(tx) = lock(pending).remove(&id) {
            let _ = tx.send(message);
        }
        return;
    }

    if let Some(method) = message.get("method").and_then(Value::as_str) {
        let observer = lock(events).get(method).cloned();
        if let Some(observer) = observer {
            observer.emit(message.get("params").cloned().unwrap_or(Value::Null));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_dispatch_routes_responses_and_events() {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let events: Events = Arc::new(Mutex::new(HashMap::new()));

        let (tx, mut rx) = oneshot::channel();
        lock(&pending).insert(7, tx);

        let hits = Arc::new(AtomicUsize::new(0));
        let observer = Observer::new();
        let h = Arc::clone(&hits);
        let _sub = observer.subscribe(move |params: Value| {
            assert_eq!(params["requestId"], "r1");
            h.fetch_add(1, Ordering::SeqCst);
        });
        lock(&events).insert("Fetch.requestPaused".to_string(), observer);

        dispatch(r#"{"id":7,"result":{"ok":true}}"#, &pending, &events);
        dispatch(
            r#"{"method":"Fetch.requestPaused","params":{"requestId":"r1"}}"#,
            &pending,
            &events,
        );
        dispatch(r#"{"method":"Page.loadEventFired","params":{}}"#, &pending, &events);
        dispatch("not json", &pending, &events);

        assert_eq!(rx.try_recv().unwrap()["result"]["ok"], true);
        assert!(lock(&pending).is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
