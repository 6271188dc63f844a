use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::browser::{CloseHandler, InterceptResponse, InterceptedRequest, Page, RequestHandler};
use crate::common::{Error, Observer, Result, Subscription};

use super::CdpConnection;

/// Upper bound on one navigation including the load event
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);
const SELECTOR_POLL: Duration = Duration::from_millis(100);

/// A request paused by the `Fetch` domain
pub struct CdpRequest {
    connection: Arc<CdpConnection>,
    request_id: String,
    url: String,
    method: String,
}

impl CdpRequest {
    fn from_event(connection: Arc<CdpConnection>, params: &Value) -> Option<Self> {
        Some(Self {
            connection,
            request_id: params.get("requestId")?.as_str()?.to_string(),
            url: params.pointer("/request/url")?.as_str()?.to_string(),
            method: params.pointer("/request/method")?.as_str()?.to_string(),
        })
    }
}

#[async_trait]
impl InterceptedRequest for CdpRequest {
    fn url(&self) -> &str {
        &self.url
    }

    fn method(&self) -> &str {
        &self.method
    }

    async fn respond(&self, response: InterceptResponse) -> Result<()> {
        let body = base64::engine::general_purpose::STANDARD.encode(response.body.as_bytes());
        self.connection
            .send(
                "Fetch.fulfillRequest",
                json!({
                    "requestId": self.request_id,
                    "responseCode": response.status,
                    "responseHeaders": [
                        { "name": "Content-Type", "value": response.content_type },
                    ],
                    "body": body,
                }),
            )
            .await?;
        Ok(())
    }

    async fn continue_request(&self) -> Result<()> {
        self.connection
            .send("Fetch.continueRequest", json!({ "requestId": self.request_id }))
            .await?;
        Ok(())
    }
}

/// A page target with its own DevTools socket
pub struct CdpPage {
    id: String,
    connection: Arc<CdpConnection>,
    requests: Observer<Arc<dyn InterceptedRequest>>,
    // Keeps the Fetch.requestPaused route alive
    _paused: Subscription,
}

impl CdpPage {
    pub async fn connect(target_id: &str, ws_url: &str) -> Result<Arc<Self>> {
        let connection = CdpConnection::connect(ws_url).await?;
        connection.send("Page.enable", json!({})).await?;

        let requests: Observer<Arc<dyn InterceptedRequest>> = Observer::new();
        let paused = {
            let requests = requests.clone();
            let weak = Arc::downgrade(&connection);
            connection.on_event("Fetch.requestPaused", move |params| {
                let Some(connection) = weak.upgrade() else {
                    return;
                };
                match CdpRequest::from_event(connection, &params) {
                    Some(request) => requests.emit(Arc::new(request)),
                    None => tracing::debug!(%params, "Malformed Fetch.requestPaused"),
                }
            })
        };

        Ok(Arc::new(Self {
            id: target_id.to_string(),
            connection,
            requests,
            _paused: paused,
        }))
    }

    async fn element_exists(&self, selector: &str) -> Result<bool> {
        let expression = format!("document.querySelector({}) !== null", json!(selector));
        Ok(self.connection.evaluate(&expression).await?.as_bool() == Some(true))
    }
}

#[async_trait]
impl Page for CdpPage {
    fn id(&self) -> &str {
        &self.id
    }

    async fn set_request_interception(&self, enabled: bool) -> Result<()> {
        if enabled {
            self.connection
                .send("Fetch.enable", json!({ "patterns": [{ "urlPattern": "*" }] }))
                .await?;
        } else {
            self.connection.send("Fetch.disable", json!({})).await?;
        }
        Ok(())
    }

    fn on_request(&self, handler: RequestHandler) -> Subscription {
        self.requests.subscribe(move |request| handler(request))
    }

    async fn goto(&self, url: &str) -> Result<()> {
        let (loaded_tx, loaded_rx) = oneshot::channel();
        let mut load = self
            .connection
            .once_event("Page.loadEventFired", move |_| {
                let _ = loaded_tx.send(());
            });

        let result = self
            .connection
            .send_with_timeout("Page.navigate", json!({ "url": url }), NAVIGATION_TIMEOUT)
            .await;
        let result = match result {
            Ok(result) => result,
            Err(e) => {
                load.dispose();
                return Err(e);
            }
        };

        if let Some(error) = result.get("errorText").and_then(Value::as_str) {
            if !error.is_empty() {
                load.dispose();
                return Err(Error::navigation(url, error));
            }
        }

        match tokio::time::timeout(NAVIGATION_TIMEOUT, loaded_rx).await {
            Ok(Ok(())) => Ok(()),
            // Handler dropped without firing: the socket closed
            Ok(Err(_)) => Err(Error::TargetClosed),
            Err(_) => {
                load.dispose();
                Err(Error::Timeout {
                    what: format!("load of {url}"),
                    after: NAVIGATION_TIMEOUT,
                })
            }
        }
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.element_exists(selector).await? {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout {
                    what: format!("selector {selector}"),
                    after: timeout,
                });
            }
            tokio::time::sleep(SELECTOR_POLL).await;
        }
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let expression = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; el.click(); return true; }})()",
            json!(selector)
        );
        match self.connection.evaluate(&expression).await?.as_bool() {
            Some(true) => Ok(()),
            _ => Err(Error::ElementNotFound(selector.to_string())),
        }
    }

    fn on_close(&self, handler: CloseHandler) -> Subscription {
        self.connection.on_close(handler)
    }
}

impl Drop for CdpPage {
    fn drop(&mut self) {
        self.connection.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_page_types_are_thread_safe() {
        assert_send_sync::<CdpPage>();
        assert_send_sync::<CdpRequest>();
        let _: fn(Arc<CdpPage>) -> Arc<dyn Page> = |page| page;
    }
}
