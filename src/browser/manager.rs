//! Browser and page lifecycle
//!
//! The manager owns at most one browser process. Every page it debugs gets a
//! [`PageSession`]: an interceptor serving the local bundle, a watcher that
//! reloads it on rebuild, and a locator that keeps the page on the control.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::bundle::BundleContentLoader;
use crate::common::config::LaunchConfig;
use crate::common::report::{self, Severity};
use crate::common::sync::lock;
use crate::common::{Error, Result, Subscription};
use crate::host::DebugHost;
use crate::interceptor::{InterceptedCallback, RequestInterceptor};
use crate::locator::{ControlLocator, RetryBudget};
use crate::watcher::{ChangeCallback, FileChangeWatcher};

use super::{Browser, BrowserArgsBuilder, BrowserLauncher, ExecutableLocator, Page};

/// Budget for the first navigation; the user may still have to sign in
pub const INITIAL_NAVIGATION_BUDGET: RetryBudget = RetryBudget::Infinite;

/// Budget for re-navigation after a rebuild
pub const RELOAD_NAVIGATION_BUDGET: RetryBudget = RetryBudget::Finite(3);

const REUSE_PROMPT: &str =
    "A browser from an earlier PCF debug session is still open. Open a new tab in it?";

/// Notifications from the manager to whoever drives the debug session
#[derive(Clone)]
pub struct SessionCallbacks {
    /// The local bundle was served for the first time on a page
    pub on_ready: Arc<dyn Fn() + Send + Sync>,
    /// A debugged page went away (closed, or failed to initialize)
    pub on_closed: Arc<dyn Fn() + Send + Sync>,
}

/// Interceptor, watcher and locator bound to one page
struct PageSession {
    page: Arc<dyn Page>,
    interceptor: Arc<RequestInterceptor>,
    locator: Arc<ControlLocator>,
    watcher: FileChangeWatcher,
    close_hook: Mutex<Option<Subscription>>,
    ready: AtomicBool,
    disposed: AtomicBool,
}

impl PageSession {
    fn create(config: &LaunchConfig, page: Arc<dyn Page>) -> Result<Self> {
        let interceptor = Arc::new(RequestInterceptor::new(BundleContentLoader::new(
            config.bundle_path(),
        )));
        let locator = Arc::new(ControlLocator::new(config));

        let on_change: ChangeCallback = {
            let interceptor = Arc::clone(&interceptor);
            let locator = Arc::clone(&locator);
            let page = Arc::clone(&page);
            Arc::new(move || {
                let interceptor = Arc::clone(&interceptor);
                let locator = Arc::clone(&locator);
                let page = Arc::clone(&page);
                Box::pin(async move {
                    interceptor.reload_file_contents().await?;
                    locator
                        .navigate_to_control(page.as_ref(), RELOAD_NAVIGATION_BUDGET)
                        .await
                })
            })
        };
        let watcher = FileChangeWatcher::new(
            &config.bundle_glob(),
            &config.web_root,
            config.timeouts.file_settle(),
            on_change,
        )?;

        Ok(Self {
            page,
            interceptor,
            locator,
            watcher,
            close_hook: Mutex::new(None),
            ready: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        })
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn set_close_hook(&self, mut hook: Subscription) {
        if self.is_disposed() {
            hook.dispose();
            return;
        }
        *lock(&self.close_hook) = Some(hook);
    }

    /// Tear down all three parts. Returns false if already disposed.
    fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(mut hook) = lock(&self.close_hook).take() {
            hook.dispose();
        }
        self.locator.dispose();
        self.watcher.dispose();
        self.interceptor.dispose();
        true
    }
}

struct BrowserHandle {
    generation: u64,
    browser: Arc<dyn Browser>,
    _disconnect: Subscription,
}

/// Launches or reuses the browser and wires up each debugged page
pub struct BrowserSessionManager {
    me: Weak<Self>,
    config: LaunchConfig,
    locator: Arc<dyn ExecutableLocator>,
    launcher: Arc<dyn BrowserLauncher>,
    host: Arc<dyn DebugHost>,
    callbacks: SessionCallbacks,
    browser: Mutex<Option<BrowserHandle>>,
    generation: AtomicU64,
    sessions: Mutex<Vec<Arc<PageSession>>>,
    disposed: AtomicBool,
}

impl BrowserSessionManager {
    pub fn new(
        config: LaunchConfig,
        locator: Arc<dyn ExecutableLocator>,
        launcher: Arc<dyn BrowserLauncher>,
        host: Arc<dyn DebugHost>,
        callbacks: SessionCallbacks,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config,
            locator,
            launcher,
            host,
            callbacks,
            browser: Mutex::new(None),
            generation: AtomicU64::new(0),
            sessions: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    pub fn has_browser(&self) -> bool {
        lock(&self.browser).is_some()
    }

    /// Number of pages currently being debugged
    pub fn page_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Open the control in a browser.
    ///
    /// Reuses a running browser (after asking) or starts a new one. Failures
    /// that end the attempt are shown to the user and returned; failures
    /// while setting up the page run the page-closed path instead.
    pub async fn launch(&self) -> Result<()> {
        if self.is_disposed() {
            return Ok(());
        }

        let existing = lock(&self.browser)
            .as_ref()
            .map(|handle| Arc::clone(&handle.browser));

        let page = match existing {
            Some(browser) => {
                if !self.host.confirm(REUSE_PROMPT).await {
                    tracing::info!("Not reusing the running browser");
                    return Ok(());
                }
                if self.is_disposed() {
                    return Ok(());
                }
                browser
                    .new_page()
                    .await
                    .map_err(|e| self.fatal("manager.new_page", e))?
            }
            None => match self.start_browser().await? {
                Some(page) => page,
                None => return Ok(()),
            },
        };

        if self.is_disposed() {
            tracing::debug!(page = page.id(), "Disposed while opening the page");
            return Ok(());
        }
        self.register_page(page).await;
        Ok(())
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Spawn a browser and return the page to debug in, or `None` when the
    /// manager was disposed meanwhile
    async fn start_browser(&self) -> Result<Option<Arc<dyn Page>>> {
        let executable = self
            .locator
            .locate(self.config.browser_flavor)
            .map_err(|e| self.fatal("manager.locate", e))?;

        let args = BrowserArgsBuilder::new(self.config.port)
            .user_data_dir(self.config.managed_user_data_dir())
            .extra_args(&self.config.browser_args)
            .build();

        let browser = self
            .launcher
            .launch(&executable, &args, self.config.port)
            .await
            .map_err(|e| self.fatal("manager.launch", e))?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let me = self.me.clone();
        let disconnect = browser.on_disconnected(Box::new(move || {
            if let Some(manager) = me.upgrade() {
                manager.browser_disconnected(generation);
            }
        }));

        // dispose() sets the flag before it takes the handle
        let late = {
            let mut slot = lock(&self.browser);
            if self.is_disposed() {
                Some(disconnect)
            } else {
                *slot = Some(BrowserHandle {
                    generation,
                    browser: Arc::clone(&browser),
                    _disconnect: disconnect,
                });
                None
            }
        };
        if let Some(mut disconnect) = late {
            tracing::info!("Disposed while the browser was starting, closing it");
            disconnect.dispose();
            if let Err(e) = browser.close().await {
                report::report(Severity::Informational, "manager.close", &e);
            }
            return Ok(None);
        }

        let info = browser.info();
        report::telemetry(
            "browser.launched",
            &[
                ("port", self.config.port.to_string()),
                ("pid", info.pid.map(|p| p.to_string()).unwrap_or_default()),
                ("endpoint", info.ws_endpoint),
                ("version", info.version),
            ],
        );

        let pages = browser
            .pages()
            .await
            .map_err(|e| self.fatal("manager.pages", e))?;
        if self.is_disposed() {
            return Ok(None);
        }
        pages
            .into_iter()
            .next()
            .map(Some)
            .ok_or_else(|| self.fatal("manager.pages", Error::NoPages))
    }

    fn browser_disconnected(&self, generation: u64) {
        let mut browser = lock(&self.browser);
        if browser.as_ref().is_some_and(|h| h.generation == generation) {
            tracing::info!("Browser disconnected");
            *browser = None;
        }
    }

    async fn register_page(&self, page: Arc<dyn Page>) {
        let session = match PageSession::create(&self.config, Arc::clone(&page)) {
            Ok(session) => Arc::new(session),
            Err(e) => {
                report::report(Severity::Informational, "manager.register", &e);
                (self.callbacks.on_closed)();
                return;
            }
        };
        {
            let mut sessions = lock(&self.sessions);
            if self.is_disposed() {
                drop(sessions);
                session.dispose();
                return;
            }
            sessions.push(Arc::clone(&session));
        }

        let on_intercepted: InterceptedCallback = {
            let me = self.me.clone();
            let weak = Arc::downgrade(&session);
            Arc::new(move |file_name: &str| {
                if let (Some(manager), Some(session)) = (me.upgrade(), weak.upgrade()) {
                    manager.page_ready(&session, file_name);
                }
            })
        };

        let result = async {
            session
                .interceptor
                .register(Arc::clone(&page), Some(on_intercepted))
                .await?;
            session
                .locator
                .navigate_to_control(page.as_ref(), INITIAL_NAVIGATION_BUDGET)
                .await
        }
        .await;

        if let Err(e) = result {
            report::report(Severity::Informational, "manager.register", &e);
            self.close_page(&session);
        }
    }

    fn page_ready(&self, session: &Arc<PageSession>, file_name: &str) {
        if session.is_disposed() || session.ready.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(page = session.page.id(), bundle = file_name, "Local bundle is live");
        (self.callbacks.on_ready)();

        let me = self.me.clone();
        let weak = Arc::downgrade(session);
        let hook = session.page.on_close(Box::new(move || {
            if let (Some(manager), Some(session)) = (me.upgrade(), weak.upgrade()) {
                tracing::info!(page = session.page.id(), "Page closed");
                manager.close_page(&session);
            }
        }));
        session.set_close_hook(hook);
    }

    /// Dispose a page session and report the page as closed, once
    fn close_page(&self, session: &Arc<PageSession>) {
        if !session.dispose() {
            return;
        }
        lock(&self.sessions).retain(|s| !Arc::ptr_eq(s, session));
        (self.callbacks.on_closed)();
    }

    fn fatal(&self, context: &str, error: Error) -> Error {
        report::report(Severity::Fatal, context, &error);
        self.host.show_error(&error.to_string());
        error
    }

    /// Dispose every page session and close the browser. Safe to repeat.
    pub async fn dispose(&self) {
        // Set before taking the handle and sessions; launch checks it under
        // the same locks
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let sessions = std::mem::take(&mut *lock(&self.sessions));
        for session in sessions {
            session.dispose();
        }

        let handle = lock(&self.browser).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.browser.close().await {
                report::report(Severity::Informational, "manager.close", &e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::{BrowserFlavor, ControlLocation, Timeouts};
    use crate::testing::{FailurePlan, MockBrowser, MockHost, MockLauncher, MockLocator, MockPage};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    const BUNDLE_URL: &str = "https://org.crm.dynamics.com/%7b1%7d/webresources/cc_Sample/bundle.js";

    struct Fixture {
        _dir: tempfile::TempDir,
        config: LaunchConfig,
        page: Arc<MockPage>,
        browser: Arc<MockBrowser>,
        launcher: Arc<MockLauncher>,
        host: Arc<MockHost>,
        ready: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("bundle.js"), "var a;").unwrap();

            let config = LaunchConfig {
                name: "Debug control".to_string(),
                url: "https://org.crm.dynamics.com/main.aspx".to_string(),
                web_root: dir.path().to_path_buf(),
                file: "bundle.js".into(),
                browser_flavor: BrowserFlavor::Default,
                port: 9222,
                user_data_dir: Some(dir.path().join("profile")),
                use_default_profile: false,
                browser_args: vec!["--remote-debugging-port=1".to_string()],
                location: ControlLocation::Tab {
                    tab_name: "General".to_string(),
                    control_name: "Sample".to_string(),
                },
                timeouts: Timeouts {
                    navigation_retry_ms: 1,
                    file_settle_ms: 10,
                    ..Timeouts::default()
                },
            };

            let page = MockPage::new("page-1");
            page.serve_bundle_on_goto(BUNDLE_URL);
            let browser = MockBrowser::new(vec![Arc::clone(&page)]);

            Self {
                _dir: dir,
                config,
                page,
                launcher: MockLauncher::new(Arc::clone(&browser)),
                browser,
                host: MockHost::new(),
                ready: Arc::new(AtomicUsize::new(0)),
                closed: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn manager(&self, locator: Arc<MockLocator>) -> Arc<BrowserSessionManager> {
            let ready = Arc::clone(&self.ready);
            let closed = Arc::clone(&self.closed);
            BrowserSessionManager::new(
                self.config.clone(),
                locator,
                self.launcher.clone(),
                self.host.clone(),
                SessionCallbacks {
                    on_ready: Arc::new(move || {
                        ready.fetch_add(1, Ordering::SeqCst);
                    }),
                    on_closed: Arc::new(move || {
                        closed.fetch_add(1, Ordering::SeqCst);
                    }),
                },
            )
        }

        fn ready(&self) -> usize {
            self.ready.load(Ordering::SeqCst)
        }

        fn closed(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_fresh_launch_becomes_ready() {
        let fx = Fixture::new();
        let manager = fx.manager(MockLocator::found("/opt/edge"));

        manager.launch().await.unwrap();
        settle().await;

        let launches = fx.launcher.launches();
        assert_eq!(launches.len(), 1);
        let (exe, args, port) = &launches[0];
        assert_eq!(exe, &std::path::PathBuf::from("/opt/edge"));
        assert_eq!(*port, 9222);
        assert!(args[0].starts_with("--user-data-dir="));
        assert_eq!(args.iter().filter(|a| a.starts_with("--remote-debugging-port")).count(), 1);

        assert_eq!(fx.page.interception_enabled_calls(), 1);
        assert_eq!(fx.page.goto_calls().len(), 1);
        assert_eq!(fx.page.click_calls(), vec!["li[aria-label='General']".to_string()]);
        assert_eq!(fx.ready(), 1);
        assert_eq!(fx.closed(), 0);
        assert!(manager.has_browser());
    }

    #[tokio::test]
    async fn test_page_close_disposes_session_once() {
        let fx = Fixture::new();
        let manager = fx.manager(MockLocator::found("/opt/edge"));
        manager.launch().await.unwrap();
        settle().await;

        fx.page.close();
        fx.page.close();

        assert_eq!(fx.closed(), 1);
        assert_eq!(manager.page_count(), 0);
        assert!(!fx.page.has_request_hook());
    }

    #[tokio::test]
    async fn test_missing_browser_is_fatal() {
        let fx = Fixture::new();
        let manager = fx.manager(MockLocator::missing());

        let err = manager.launch().await.unwrap_err();
        assert!(matches!(err, Error::BrowserNotFound { .. }));
        assert_eq!(fx.host.errors().len(), 1);
        assert!(fx.launcher.launches().is_empty());
    }

    #[tokio::test]
    async fn test_browser_without_pages_is_fatal() {
        let mut fx = Fixture::new();
        fx.browser = MockBrowser::new(Vec::new());
        fx.launcher = MockLauncher::new(Arc::clone(&fx.browser));
        let manager = fx.manager(MockLocator::found("/opt/edge"));

        let err = manager.launch().await.unwrap_err();
        assert!(matches!(err, Error::NoPages));
        assert_eq!(fx.host.errors().len(), 1);
        assert_eq!(fx.ready(), 0);
    }

    #[tokio::test]
    async fn test_registration_failure_runs_close_path() {
        let fx = Fixture::new();
        std::fs::remove_file(fx.config.bundle_path()).unwrap();
        let manager = fx.manager(MockLocator::found("/opt/edge"));

        manager.launch().await.unwrap();

        assert_eq!(fx.closed(), 1);
        assert_eq!(fx.ready(), 0);
        assert_eq!(manager.page_count(), 0);
        assert!(fx.page.goto_calls().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_tab_selection_runs_close_path() {
        let fx = Fixture::new();
        fx.page.fail_click(FailurePlan::Always);
        // Teardown errors are never retried, so the infinite budget ends here
        fx.page.fail_with_teardown(true);
        let manager = fx.manager(MockLocator::found("/opt/edge"));

        manager.launch().await.unwrap();
        settle().await;

        assert_eq!(fx.page.click_calls().len(), 1);
        assert_eq!(fx.closed(), 1);
        assert!(!fx.page.has_request_hook());
    }

    #[tokio::test]
    async fn test_existing_browser_asks_before_new_tab() {
        let fx = Fixture::new();
        let manager = fx.manager(MockLocator::found("/opt/edge"));
        manager.launch().await.unwrap();

        fx.host.answer_confirm(false);
        manager.launch().await.unwrap();
        assert_eq!(fx.host.confirm_calls(), 1);
        assert!(fx.browser.opened_pages().is_empty());

        fx.host.answer_confirm(true);
        manager.launch().await.unwrap();
        assert_eq!(fx.browser.opened_pages().len(), 1);
        assert_eq!(fx.launcher.launches().len(), 1);
        assert_eq!(fx.browser.opened_pages()[0].interception_enabled_calls(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_forgets_browser() {
        let fx = Fixture::new();
        let manager = fx.manager(MockLocator::found("/opt/edge"));
        manager.launch().await.unwrap();
        assert!(manager.has_browser());

        fx.browser.disconnect();
        assert!(!manager.has_browser());

        manager.launch().await.unwrap();
        assert_eq!(fx.host.confirm_calls(), 0);
        assert_eq!(fx.launcher.launches().len(), 2);
    }

    #[tokio::test]
    async fn test_dispose_closes_browser_once() {
        let fx = Fixture::new();
        let manager = fx.manager(MockLocator::found("/opt/edge"));

        // Nothing launched yet
        manager.dispose().await;
        assert_eq!(fx.browser.close_calls(), 0);

        let fx = Fixture::new();
        let manager = fx.manager(MockLocator::found("/opt/edge"));
        manager.launch().await.unwrap();
        manager.dispose().await;
        manager.dispose().await;

        assert_eq!(fx.browser.close_calls(), 1);
        assert!(!manager.has_browser());
        assert!(!fx.page.has_request_hook());
    }

    #[tokio::test]
    async fn test_dispose_during_slow_launch_closes_late_browser() {
        let mut fx = Fixture::new();
        fx.launcher = MockLauncher::with_delay(Arc::clone(&fx.browser), Duration::from_millis(100));
        let manager = fx.manager(MockLocator::found("/opt/edge"));

        let launching = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.launch().await }
        });
        settle().await;
        manager.dispose().await;
        launching.await.unwrap().unwrap();
        settle().await;

        assert_eq!(fx.launcher.launches().len(), 1);
        assert_eq!(fx.browser.close_calls(), 1);
        assert!(!manager.has_browser());
        assert_eq!(manager.page_count(), 0);
        assert!(!fx.page.has_request_hook());
        assert!(fx.page.goto_calls().is_empty());
        assert_eq!(fx.ready(), 0);

        manager.dispose().await;
        assert_eq!(fx.browser.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_rebuild_reloads_and_renavigates() {
        let fx = Fixture::new();
        let manager = fx.manager(MockLocator::found("/opt/edge"));
        manager.launch().await.unwrap();
        settle().await;
        assert_eq!(fx.page.goto_calls().len(), 1);

        std::fs::write(fx.config.bundle_path(), "var b;").unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while fx.page.goto_calls().len() < 2 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        assert!(fx.page.goto_calls().len() >= 2);
        // The rebuilt page served the bundle again, but ready fires only once
        assert_eq!(fx.ready(), 1);
        manager.dispose().await;
    }
}
