//! Recording fakes of the browser and host traits
//!
//! Every fake counts or records the calls made on it so tests can assert on
//! exact interaction counts. Failures are scripted with [`FailurePlan`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::browser::{
    Browser, BrowserInfo, BrowserLauncher, CloseHandler, ExecutableLocator, InterceptResponse,
    InterceptedRequest, Page, RequestHandler,
};
use crate::common::config::BrowserFlavor;
use crate::common::sync::lock;
use crate::common::{Error, Observer, Result, Subscription};
use crate::host::{DebugHost, NativeAttachConfig, NativeSession, TerminationHandler};

/// When a scripted operation fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePlan {
    Never,
    /// The first `n` calls fail, later ones succeed
    Times(usize),
    Always,
}

#[derive(Debug)]
struct Script {
    plan: FailurePlan,
    failed: usize,
}

impl Script {
    fn new() -> Self {
        Self {
            plan: FailurePlan::Never,
            failed: 0,
        }
    }

    fn next_fails(&mut self) -> bool {
        match self.plan {
            FailurePlan::Never => false,
            FailurePlan::Always => true,
            FailurePlan::Times(n) if self.failed < n => {
                self.failed += 1;
                true
            }
            FailurePlan::Times(_) => false,
        }
    }
}

/// A paused request that records how it was settled
pub struct MockRequest {
    url: String,
    method: String,
    fail_respond: bool,
    fail_continue: bool,
    responses: Mutex<Vec<InterceptResponse>>,
    continues: AtomicUsize,
}

impl MockRequest {
    fn build(url: &str, method: &str, fail_respond: bool, fail_continue: bool) -> Arc<Self> {
        Arc::new(Self {
            url: url.to_string(),
            method: method.to_string(),
            fail_respond,
            fail_continue,
            responses: Mutex::new(Vec::new()),
            continues: AtomicUsize::new(0),
        })
    }

    pub fn new(url: &str, method: &str) -> Arc<Self> {
        Self::build(url, method, false, false)
    }

    /// A request whose `respond` always errors
    pub fn failing(url: &str, method: &str) -> Arc<Self> {
        Self::build(url, method, true, false)
    }

    /// A request whose `continue_request` always errors
    pub fn failing_continue(url: &str, method: &str) -> Arc<Self> {
        Self::build(url, method, false, true)
    }

    pub fn responses(&self) -> Vec<InterceptResponse> {
        lock(&self.responses).clone()
    }

    pub fn continue_calls(&self) -> usize {
        self.continues.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InterceptedRequest for MockRequest {
    fn url(&self) -> &str {
        &self.url
    }

    fn method(&self) -> &str {
        &self.method
    }

    async fn respond(&self, response: InterceptResponse) -> Result<()> {
        if self.fail_respond {
            return Err(Error::Cdp {
                code: -32602,
                message: "Invalid InterceptionId.".to_string(),
            });
        }
        lock(&self.responses).push(response);
        Ok(())
    }

    async fn continue_request(&self) -> Result<()> {
        self.continues.fetch_add(1, Ordering::SeqCst);
        if self.fail_continue {
            return Err(Error::TargetClosed);
        }
        Ok(())
    }
}

/// A page that records navigation and can replay a bundle request
pub struct MockPage {
    id: String,
    interception_enabled: AtomicUsize,
    hooks_installed: AtomicUsize,
    requests: Observer<Arc<dyn InterceptedRequest>>,
    closes: Observer<()>,
    closed: AtomicBool,
    goto_calls: Mutex<Vec<String>>,
    wait_calls: Mutex<Vec<String>>,
    click_calls: Mutex<Vec<String>>,
    goto_script: Mutex<Script>,
    wait_script: Mutex<Script>,
    click_script: Mutex<Script>,
    teardown_errors: AtomicBool,
    bundle_url: Mutex<Option<String>>,
}

impl MockPage {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            interception_enabled: AtomicUsize::new(0),
            hooks_installed: AtomicUsize::new(0),
            requests: Observer::new(),
            closes: Observer::new(),
            closed: AtomicBool::new(false),
            goto_calls: Mutex::new(Vec::new()),
            wait_calls: Mutex::new(Vec::new()),
            click_calls: Mutex::new(Vec::new()),
            goto_script: Mutex::new(Script::new()),
            wait_script: Mutex::new(Script::new()),
            click_script: Mutex::new(Script::new()),
            teardown_errors: AtomicBool::new(false),
            bundle_url: Mutex::new(None),
        })
    }

    pub fn fail_goto(&self, plan: FailurePlan) {
        lock(&self.goto_script).plan = plan;
    }

    pub fn fail_wait(&self, plan: FailurePlan) {
        lock(&self.wait_script).plan = plan;
    }

    pub fn fail_click(&self, plan: FailurePlan) {
        lock(&self.click_script).plan = plan;
    }

    /// Scripted failures look like a page being closed underneath us
    pub fn fail_with_teardown(&self, teardown: bool) {
        self.teardown_errors.store(teardown, Ordering::SeqCst);
    }

    /// After every successful `goto`, request `url` through the hook
    pub fn serve_bundle_on_goto(&self, url: &str) {
        *lock(&self.bundle_url) = Some(url.to_string());
    }

    pub fn fire_request(&self, request: Arc<MockRequest>) {
        self.requests.emit(request);
    }

    /// Close the tab as the user would
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.closes.emit(());
        }
    }

    pub fn interception_enabled_calls(&self) -> usize {
        self.interception_enabled.load(Ordering::SeqCst)
    }

    pub fn request_hooks_installed(&self) -> usize {
        self.hooks_installed.load(Ordering::SeqCst)
    }

    pub fn has_request_hook(&self) -> bool {
        self.requests.has_subscriber()
    }

    pub fn has_close_handler(&self) -> bool {
        self.closes.has_subscriber()
    }

    pub fn goto_calls(&self) -> Vec<String> {
        lock(&self.goto_calls).clone()
    }

    pub fn wait_calls(&self) -> Vec<String> {
        lock(&self.wait_calls).clone()
    }

    pub fn click_calls(&self) -> Vec<String> {
        lock(&self.click_calls).clone()
    }

    fn scripted_error(&self, fallback: Error) -> Error {
        if self.teardown_errors.load(Ordering::SeqCst) {
            Error::TargetClosed
        } else {
            fallback
        }
    }
}

#[async_trait]
impl Page for MockPage {
    fn id(&self) -> &str {
        &self.id
    }

    async fn set_request_interception(&self, enabled: bool) -> Result<()> {
        if enabled {
            self.interception_enabled.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn on_request(&self, handler: RequestHandler) -> Subscription {
        self.hooks_installed.fetch_add(1, Ordering::SeqCst);
        self.requests.subscribe(move |request| handler(request))
    }

    async fn goto(&self, url: &str) -> Result<()> {
        lock(&self.goto_calls).push(url.to_string());
        if lock(&self.goto_script).next_fails() {
            return Err(self.scripted_error(Error::navigation(url, "net::ERR_CONNECTION_RESET")));
        }

        let bundle_url = lock(&self.bundle_url).clone();
        if let Some(bundle_url) = bundle_url {
            self.fire_request(MockRequest::new(&bundle_url, "GET"));
        }
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
        lock(&self.wait_calls).push(selector.to_string());
        if lock(&self.wait_script).next_fails() {
            return Err(self.scripted_error(Error::Timeout {
                what: format!("selector {selector}"),
                after: timeout,
            }));
        }
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        lock(&self.click_calls).push(selector.to_string());
        if lock(&self.click_script).next_fails() {
            return Err(self.scripted_error(Error::ElementNotFound(selector.to_string())));
        }
        Ok(())
    }

    fn on_close(&self, handler: CloseHandler) -> Subscription {
        if self.closed.load(Ordering::SeqCst) {
            handler();
            return Subscription::empty();
        }
        self.closes.subscribe_once(move |()| handler())
    }
}

/// A browser holding a fixed set of pages
pub struct MockBrowser {
    info: BrowserInfo,
    pages: Mutex<Vec<Arc<MockPage>>>,
    opened: Mutex<Vec<Arc<MockPage>>>,
    close_calls: AtomicUsize,
    disconnected: Observer<()>,
}

impl MockBrowser {
    pub fn new(pages: Vec<Arc<MockPage>>) -> Arc<Self> {
        Arc::new(Self {
            info: BrowserInfo {
                pid: Some(4242),
                ws_endpoint: "ws://127.0.0.1:9222/devtools/browser/mock".to_string(),
                version: "Edg/120.0.0.0".to_string(),
            },
            pages: Mutex::new(pages),
            opened: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
            disconnected: Observer::new(),
        })
    }

    /// Pages created through `new_page`
    pub fn opened_pages(&self) -> Vec<Arc<MockPage>> {
        lock(&self.opened).clone()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Simulate the browser process going away
    pub fn disconnect(&self) {
        self.disconnected.emit(());
    }
}

#[async_trait]
impl Browser for MockBrowser {
    fn info(&self) -> BrowserInfo {
        self.info.clone()
    }

    async fn pages(&self) -> Result<Vec<Arc<dyn Page>>> {
        Ok(lock(&self.pages)
            .iter()
            .map(|page| Arc::clone(page) as Arc<dyn Page>)
            .collect())
    }

    async fn new_page(&self) -> Result<Arc<dyn Page>> {
        let mut opened = lock(&self.opened);
        let page = MockPage::new(&format!("opened-{}", opened.len() + 1));
        opened.push(Arc::clone(&page));
        Ok(page as Arc<dyn Page>)
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_disconnected(&self, handler: CloseHandler) -> Subscription {
        self.disconnected.subscribe_once(move |()| handler())
    }
}

/// Hands out one prepared browser and records launch arguments
pub struct MockLauncher {
    browser: Arc<MockBrowser>,
    delay: Duration,
    launches: Mutex<Vec<(PathBuf, Vec<String>, u16)>>,
}

impl MockLauncher {
    pub fn new(browser: Arc<MockBrowser>) -> Arc<Self> {
        Self::with_delay(browser, Duration::ZERO)
    }

    /// A launcher whose browser takes `delay` to come up
    pub fn with_delay(browser: Arc<MockBrowser>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            browser,
            delay,
            launches: Mutex::new(Vec::new()),
        })
    }

    pub fn launches(&self) -> Vec<(PathBuf, Vec<String>, u16)> {
        lock(&self.launches).clone()
    }
}

#[async_trait]
impl BrowserLauncher for MockLauncher {
    async fn launch(
        &self,
        executable: &Path,
        args: &[String],
        port: u16,
    ) -> Result<Arc<dyn Browser>> {
        lock(&self.launches).push((executable.to_path_buf(), args.to_vec(), port));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(Arc::clone(&self.browser) as Arc<dyn Browser>)
    }
}

/// Returns a fixed executable path, or nothing
pub struct MockLocator {
    path: Option<PathBuf>,
}

impl MockLocator {
    pub fn found(path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            path: Some(path.into()),
        })
    }

    pub fn missing() -> Arc<Self> {
        Arc::new(Self { path: None })
    }
}

impl ExecutableLocator for MockLocator {
    fn locate(&self, flavor: BrowserFlavor) -> Result<PathBuf> {
        self.path
            .clone()
            .ok_or_else(|| Error::browser_not_found(&flavor.to_string(), &["<mock>"]))
    }
}

/// A native session that counts `stop` calls
pub struct MockNativeSession {
    id: String,
    config: NativeAttachConfig,
    stops: AtomicUsize,
}

impl MockNativeSession {
    pub fn new(id: &str, config: NativeAttachConfig) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            config,
            stops: AtomicUsize::new(0),
        })
    }

    pub fn stop_calls(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NativeSession for MockNativeSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn config(&self) -> &NativeAttachConfig {
        &self.config
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A host that answers prompts from a script and records dialogs
pub struct MockHost {
    confirm_answer: AtomicBool,
    confirms: AtomicUsize,
    errors: Mutex<Vec<String>>,
    attach_script: Mutex<Script>,
    attaches: Mutex<Vec<NativeAttachConfig>>,
    sessions: Mutex<Vec<Arc<MockNativeSession>>>,
    active: Mutex<Option<Arc<dyn NativeSession>>>,
    own_stops: AtomicUsize,
    terminated: Observer<String>,
}

impl MockHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            confirm_answer: AtomicBool::new(true),
            confirms: AtomicUsize::new(0),
            errors: Mutex::new(Vec::new()),
            attach_script: Mutex::new(Script::new()),
            attaches: Mutex::new(Vec::new()),
            sessions: Mutex::new(Vec::new()),
            active: Mutex::new(None),
            own_stops: AtomicUsize::new(0),
            terminated: Observer::new(),
        })
    }

    pub fn answer_confirm(&self, answer: bool) {
        self.confirm_answer.store(answer, Ordering::SeqCst);
    }

    pub fn fail_attach(&self, plan: FailurePlan) {
        lock(&self.attach_script).plan = plan;
    }

    /// Make `session` the user's active native session
    pub fn set_active(&self, session: Arc<dyn NativeSession>) {
        *lock(&self.active) = Some(session);
    }

    /// Report the native session `id` as terminated
    pub fn terminate(&self, id: &str) {
        {
            let mut active = lock(&self.active);
            if active.as_ref().is_some_and(|session| session.id() == id) {
                *active = None;
            }
        }
        self.terminated.emit(id.to_string());
    }

    pub fn confirm_calls(&self) -> usize {
        self.confirms.load(Ordering::SeqCst)
    }

    pub fn errors(&self) -> Vec<String> {
        lock(&self.errors).clone()
    }

    pub fn attach_calls(&self) -> Vec<NativeAttachConfig> {
        lock(&self.attaches).clone()
    }

    /// Sessions started through `start_native_session`
    pub fn sessions(&self) -> Vec<Arc<MockNativeSession>> {
        lock(&self.sessions).clone()
    }

    pub fn own_stop_calls(&self) -> usize {
        self.own_stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DebugHost for MockHost {
    async fn start_native_session(
        &self,
        config: &NativeAttachConfig,
    ) -> Result<Arc<dyn NativeSession>> {
        lock(&self.attaches).push(config.clone());
        if lock(&self.attach_script).next_fails() {
            return Err(Error::Protocol(format!(
                "connect ECONNREFUSED 127.0.0.1:{}",
                config.port
            )));
        }

        let mut sessions = lock(&self.sessions);
        let session = MockNativeSession::new(&format!("native-{}", sessions.len() + 1), config.clone());
        sessions.push(Arc::clone(&session));
        *lock(&self.active) = Some(Arc::clone(&session) as Arc<dyn NativeSession>);
        Ok(session as Arc<dyn NativeSession>)
    }

    fn active_session(&self) -> Option<Arc<dyn NativeSession>> {
        lock(&self.active).clone()
    }

    async fn stop_own_session(&self) {
        self.own_stops.fetch_add(1, Ordering::SeqCst);
    }

    fn on_session_terminated(&self, handler: TerminationHandler) -> Subscription {
        self.terminated.subscribe(move |id| handler(id))
    }

    async fn confirm(&self, _message: &str) -> bool {
        self.confirms.fetch_add(1, Ordering::SeqCst);
        self.confirm_answer.load(Ordering::SeqCst)
    }

    fn show_error(&self, message: &str) {
        lock(&self.errors).push(message.to_string());
    }
}
