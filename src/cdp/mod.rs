//! Chrome DevTools Protocol backend for the browser traits
//!
//! Edge speaks the same protocol as Chromium: the HTTP endpoints on the
//! debugging port list targets, and each target has its own websocket.

mod browser;
mod connection;
mod launcher;
mod page;

use serde::Deserialize;

use crate::common::{Error, Result};

pub use browser::CdpBrowser;
pub use connection::CdpConnection;
pub use launcher::ChromiumLauncher;
pub use page::CdpPage;

/// `/json/version` of a DevTools endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct VersionInfo {
    #[serde(rename = "Browser", default)]
    pub browser: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub ws_url: String,
}

/// One entry of `/json/list`
#[derive(Debug, Clone, Deserialize)]
pub struct TargetInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub target_type: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "webSocketDebuggerUrl", default)]
    pub ws_url: Option<String>,
}

fn endpoint(port: u16, path: &str) -> String {
    format!("http://127.0.0.1:{port}{path}")
}

/// Query the DevTools version endpoint on `port`
pub async fn fetch_version(http: &reqwest::Client, port: u16) -> Result<VersionInfo> {
    http.get(endpoint(port, "/json/version"))
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| Error::Protocol(format!("DevTools endpoint on port {port}: {e}")))?
        .json()
        .await
        .map_err(|e| Error::Protocol(format!("bad /json/version response: {e}")))
}

/// List the targets of the browser on `port`
pub async fn fetch_targets(http: &reqwest::Client, port: u16) -> Result<Vec<TargetInfo>> {
    http.get(endpoint(port, "/json/list"))
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| Error::Protocol(format!("DevTools endpoint on port {port}: {e}")))?
        .json()
        .await
        .map_err(|e| Error::Protocol(format!("bad /json/list response: {e}")))
}
