use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::process::Child;
use tokio::sync::Mutex;

use crate::browser::{Browser, BrowserInfo, CloseHandler, Page};
use crate::common::{Error, Result, Subscription};

use super::{fetch_targets, CdpConnection, CdpPage};

const EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// A browser reached through its browser-level DevTools socket
pub struct CdpBrowser {
    port: u16,
    http: reqwest::Client,
    connection: Arc<CdpConnection>,
    child: Mutex<Option<Child>>,
    info: BrowserInfo,
    closed: AtomicBool,
}

impl CdpBrowser {
    pub fn new(
        port: u16,
        http: reqwest::Client,
        connection: Arc<CdpConnection>,
        child: Option<Child>,
        info: BrowserInfo,
    ) -> Self {
        Self {
            port,
            http,
            connection,
            child: Mutex::new(child),
            info,
            closed: AtomicBool::new(false),
        }
    }

    fn page_ws_url(&self, target_id: &str) -> String {
        format!("ws://127.0.0.1:{}/devtools/page/{target_id}", self.port)
    }
}

#[async_trait]
impl Browser for CdpBrowser {
    fn info(&self) -> BrowserInfo {
        self.info.clone()
    }

    async fn pages(&self) -> Result<Vec<Arc<dyn Page>>> {
        let targets = fetch_targets(&self.http, self.port).await?;

        let mut pages: Vec<Arc<dyn Page>> = Vec::new();
        for target in targets.into_iter().filter(|t| t.target_type == "page") {
            let ws_url = target
                .ws_url
                .clone()
                .unwrap_or_else(|| self.page_ws_url(&target.id));
            match CdpPage::connect(&target.id, &ws_url).await {
                Ok(page) => pages.push(page),
                // Another client may hold the target, or it just closed
                Err(e) => tracing::debug!(target = %target.id, error = %e, "Skipping page"),
            }
        }
        Ok(pages)
    }

    async fn new_page(&self) -> Result<Arc<dyn Page>> {
        let result = self
            .connection
            .send("Target.createTarget", json!({ "url": "about:blank" }))
            .await?;
        let target_id = result
            .get("targetId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Protocol("Target.createTarget returned no targetId".into()))?;

        let page: Arc<dyn Page> = CdpPage::connect(target_id, &self.page_ws_url(target_id)).await?;
        Ok(page)
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(e) = self.connection.send("Browser.close", json!({})).await {
            // The socket drops as the browser exits, so this often "fails"
            tracing::debug!(error = %e, "Browser.close");
        }
        self.connection.close();

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(EXIT_TIMEOUT, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!(pid = ?self.info.pid, "Browser did not exit, killing it");
                    child.kill().await?;
                }
            }
        }
        Ok(())
    }

    fn on_disconnected(&self, handler: CloseHandler) -> Subscription {
        self.connection.on_close(handler)
    }
}
