//! Spawning the browser process

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::browser::{Browser, BrowserInfo, BrowserLauncher};
use crate::common::{Error, Result};

use super::{fetch_version, CdpBrowser, CdpConnection};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Launches a Chromium-family browser and connects to its DevTools port
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    start_timeout: Duration,
}

impl ChromiumLauncher {
    pub fn new(start_timeout: Duration) -> Self {
        Self { start_timeout }
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(
        &self,
        executable: &Path,
        args: &[String],
        port: u16,
    ) -> Result<Arc<dyn Browser>> {
        tracing::info!(executable = %executable.display(), ?args, "Launching browser");

        let mut child = Command::new(executable)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::BrowserLaunch(format!("{}: {e}", executable.display()))
            })?;
        let pid = child.id();

        let http = reqwest::Client::new();
        let deadline = tokio::time::Instant::now() + self.start_timeout;
        let version = loop {
            match fetch_version(&http, port).await {
                Ok(version) => break version,
                Err(e) if tokio::time::Instant::now() >= deadline => {
                    let _ = child.start_kill();
                    return Err(Error::BrowserLaunch(format!(
                        "DevTools port {port} did not open within {:?}: {e}",
                        self.start_timeout
                    )));
                }
                Err(_) => {}
            }

            // A browser that hands off to an already running instance exits
            // right away; the port may still open in that instance.
            if let Ok(Some(status)) = child.try_wait() {
                tracing::debug!(%status, "Browser process exited during startup");
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        };

        let connection = CdpConnection::connect(&version.ws_url).await?;
        let info = BrowserInfo {
            pid,
            ws_endpoint: version.ws_url.clone(),
            version: version.browser.clone(),
        };
        tracing::info!(pid = ?info.pid, version = %info.version, "Browser ready");

        Ok(Arc::new(CdpBrowser::new(port, http, connection, Some(child), info)))
    }
}
