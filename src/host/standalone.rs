//! Command-line host
//!
//! Stands in for the IDE when the debugger runs from a terminal. Attaching
//! the "native debugger" means opening and holding a browser-level DevTools
//! connection; that connection closing is the native session terminating.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;

use super::{DebugHost, NativeAttachConfig, NativeSession, TerminationHandler};
use crate::cdp::{self, CdpConnection};
use crate::common::sync::lock;
use crate::common::{Observer, Result, Subscription};

type ActiveSlot = Arc<Mutex<Option<Arc<dyn NativeSession>>>>;

struct DevToolsSession {
    id: String,
    config: NativeAttachConfig,
    connection: Arc<CdpConnection>,
}

#[async_trait]
impl NativeSession for DevToolsSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn config(&self) -> &NativeAttachConfig {
        &self.config
    }

    async fn stop(&self) -> Result<()> {
        tracing::debug!(session = %self.id, "Detaching from browser");
        self.connection.close();
        Ok(())
    }
}

/// Host for the `launch` and `adapter` commands
pub struct StandaloneHost {
    http: reqwest::Client,
    assume_yes: bool,
    next_id: AtomicU64,
    active: ActiveSlot,
    terminated: Observer<String>,
    shutdown: Notify,
    stopped: AtomicBool,
}

impl StandaloneHost {
    pub fn new(assume_yes: bool) -> Arc<Self> {
        Arc::new(Self {
            http: reqwest::Client::new(),
            assume_yes,
            next_id: AtomicU64::new(1),
            active: Arc::new(Mutex::new(None)),
            terminated: Observer::new(),
            shutdown: Notify::new(),
            stopped: AtomicBool::new(false),
        })
    }

    /// Resolves once the debug session asked to be stopped
    pub async fn wait_shutdown(&self) {
        let notified = self.shutdown.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        notified.await;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DebugHost for StandaloneHost {
    async fn start_native_session(
        &self,
        config: &NativeAttachConfig,
    ) -> Result<Arc<dyn NativeSession>> {
        let version = cdp::fetch_version(&self.http, config.port).await?;
        let connection = CdpConnection::connect(&version.ws_url).await?;
        connection.send("Browser.getVersion", json!({})).await?;

        let id = format!("native-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let session: Arc<dyn NativeSession> = Arc::new(DevToolsSession {
            id: id.clone(),
            config: config.clone(),
            connection: Arc::clone(&connection),
        });
        *lock(&self.active) = Some(Arc::clone(&session));

        let active = Arc::clone(&self.active);
        let terminated = self.terminated.clone();
        // Fires at most once, when the socket goes away for any reason
        let _ = connection.on_close(Box::new(move || {
            {
                let mut active = lock(&active);
                if active.as_ref().is_some_and(|s| s.id() == id) {
                    *active = None;
                }
            }
            tracing::info!(session = %id, "Browser debugging connection closed");
            terminated.emit(id);
        }));

        tracing::info!(
            browser = %version.browser,
            port = config.port,
            "Attached to browser DevTools"
        );
        Ok(session)
    }

    fn active_session(&self) -> Option<Arc<dyn NativeSession>> {
        lock(&self.active).clone()
    }

    async fn stop_own_session(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.shutdown.notify_waiters();
        }
    }

    fn on_session_terminated(&self, handler: TerminationHandler) -> Subscription {
        self.terminated.subscribe(move |id| handler(id))
    }

    async fn confirm(&self, message: &str) -> bool {
        if self.assume_yes {
            tracing::info!(prompt = message, "Answering yes");
            return true;
        }

        eprint!("{message} [y/N] ");
        let mut answer = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        match stdin.read_line(&mut answer).await {
            Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Err(e) => {
                tracing::warn!(error = %e, "Cannot read confirmation, assuming no");
                false
            }
        }
    }

    fn show_error(&self, message: &str) {
        tracing::error!("{message}");
        eprintln!("Error: {message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stop_own_session_releases_waiters() {
        let host = StandaloneHost::new(true);
        let waiter = {
            let host = Arc::clone(&host);
            tokio::spawn(async move { host.wait_shutdown().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        host.stop_own_session().await;
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();

        // Later waiters return at once
        host.stop_own_session().await;
        host.wait_shutdown().await;
        assert!(host.is_stopped());
    }

    #[tokio::test]
    async fn test_assume_yes_confirms() {
        let host = StandaloneHost::new(true);
        assert!(host.confirm("Reuse the running browser?").await);
    }

    #[tokio::test]
    async fn test_attach_without_browser_fails() {
        // Nothing listens on port 1
        let host = StandaloneHost::new(true);
        let config = NativeAttachConfig {
            debug_type: super::super::NATIVE_DEBUG_TYPE.to_string(),
            request: "attach".to_string(),
            name: "Debug (browser)".to_string(),
            port: 1,
            web_root: PathBuf::from("/work"),
            url: "https://org.crm.dynamics.com".to_string(),
        };
        assert!(host.start_native_session(&config).await.is_err());
        assert!(host.active_session().is_none());
    }

    #[test]
    fn test_termination_reaches_subscriber() {
        let host = StandaloneHost::new(true);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let _sub = host.on_session_terminated(Arc::new(move |id: String| {
            assert_eq!(id, "native-1");
            h.fetch_add(1, Ordering::SeqCst);
        }));

        host.terminated.emit("native-1".to_string());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
