//! Browser automation capabilities
//!
//! The session logic only talks to a browser through these traits: launch a
//! process, list or open pages, intercept a page's requests, navigate, and
//! wait for or click a selector. [`crate::cdp`] implements them over the
//! Chrome DevTools Protocol; [`crate::testing`] has recording fakes.

pub mod args;
pub mod discovery;
pub mod manager;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::common::config::BrowserFlavor;
use crate::common::{Result, Subscription};

pub use args::BrowserArgsBuilder;
pub use discovery::EdgeLocator;
pub use manager::{BrowserSessionManager, SessionCallbacks};

/// Callback invoked for every paused request of a page
pub type RequestHandler = Arc<dyn Fn(Arc<dyn InterceptedRequest>) + Send + Sync>;

/// One-shot callback for close/disconnect notifications
pub type CloseHandler = Box<dyn FnOnce() + Send>;

/// Response served in place of the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptResponse {
    pub status: u16,
    pub content_type: String,
    pub body: String,
}

/// A request held by the browser until it is answered or continued
#[async_trait]
pub trait InterceptedRequest: Send + Sync {
    fn url(&self) -> &str;

    fn method(&self) -> &str;

    /// Answer the request without touching the network
    async fn respond(&self, response: InterceptResponse) -> Result<()>;

    /// Let the request through unmodified
    async fn continue_request(&self) -> Result<()>;
}

/// A browser tab
#[async_trait]
pub trait Page: Send + Sync {
    fn id(&self) -> &str;

    /// Turn request pausing on or off for this page
    async fn set_request_interception(&self, enabled: bool) -> Result<()>;

    /// Install the request handler; the subscription removes it
    fn on_request(&self, handler: RequestHandler) -> Subscription;

    async fn goto(&self, url: &str) -> Result<()>;

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()>;

    async fn click(&self, selector: &str) -> Result<()>;

    /// Fires once when the page goes away
    fn on_close(&self, handler: CloseHandler) -> Subscription;
}

/// Identity of a running browser, recorded in telemetry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrowserInfo {
    pub pid: Option<u32>,
    pub ws_endpoint: String,
    pub version: String,
}

/// A running browser process
#[async_trait]
pub trait Browser: Send + Sync {
    fn info(&self) -> BrowserInfo;

    async fn pages(&self) -> Result<Vec<Arc<dyn Page>>>;

    async fn new_page(&self) -> Result<Arc<dyn Page>>;

    async fn close(&self) -> Result<()>;

    /// Fires once when the connection to the browser is lost
    fn on_disconnected(&self, handler: CloseHandler) -> Subscription;
}

/// Starts browser processes
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, executable: &Path, args: &[String], port: u16)
        -> Result<Arc<dyn Browser>>;
}

/// Finds the browser executable for a flavor
pub trait ExecutableLocator: Send + Sync {
    fn locate(&self, flavor: BrowserFlavor) -> Result<PathBuf>;
}
