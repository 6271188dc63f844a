//! Serve the local bundle in place of the deployed one
//!
//! Every request the page makes is paused. The control's `bundle.js` (GET
//! only) is answered from memory; everything else continues to the network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use regex::Regex;

use crate::browser::{InterceptResponse, InterceptedRequest, Page, RequestHandler};
use crate::bundle::{BundleContentLoader, InterceptedBundle};
use crate::common::report::{self, Severity};
use crate::common::sync::{lock, read, write};
use crate::common::{Result, Subscription};

/// URLs of control bundles served from the web resources path
pub const BUNDLE_URL_PATTERN: &str = r".*/webresources/.*/bundle.js";

pub const BUNDLE_CONTENT_TYPE: &str = "text/javascript";

/// Called with the bundle's file name after it was served
pub type InterceptedCallback = Arc<dyn Fn(&str) + Send + Sync>;

fn bundle_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(BUNDLE_URL_PATTERN).expect("bundle pattern is a valid regex"))
}

/// Whether a request is the one the interceptor answers
pub fn is_bundle_request(url: &str, method: &str) -> bool {
    method.eq_ignore_ascii_case("GET") && bundle_url_regex().is_match(url)
}

type SharedBundle = Arc<RwLock<Option<InterceptedBundle>>>;

fn current_bundle(bundle: &SharedBundle) -> Option<InterceptedBundle> {
    read(bundle).clone()
}

fn store_bundle(bundle: &SharedBundle, value: Option<InterceptedBundle>) {
    *write(bundle) = value;
}

/// Swaps the control's bundle for the local build on one page
pub struct RequestInterceptor {
    loader: BundleContentLoader,
    bundle: SharedBundle,
    hook: Mutex<Option<Subscription>>,
    registered: AtomicBool,
    disposed: AtomicBool,
}

impl RequestInterceptor {
    pub fn new(loader: BundleContentLoader) -> Self {
        Self {
            loader,
            bundle: Arc::new(RwLock::new(None)),
            hook: Mutex::new(None),
            registered: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Start intercepting on `page`.
    ///
    /// A second call while a hook is installed (on any page) does nothing.
    pub async fn register(
        &self,
        page: Arc<dyn Page>,
        on_intercepted: Option<InterceptedCallback>,
    ) -> Result<()> {
        if self
            .registered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(page = page.id(), "Interceptor already registered");
            return Ok(());
        }

        let bundle = match self.loader.load_file_contents().await {
            Ok(bundle) => bundle,
            Err(e) => {
                self.registered.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        store_bundle(&self.bundle, Some(bundle));

        let shared = Arc::clone(&self.bundle);
        let handler: RequestHandler = Arc::new(move |request: Arc<dyn InterceptedRequest>| {
            let bundle = Arc::clone(&shared);
            let on_intercepted = on_intercepted.clone();
            tokio::spawn(handle_request(request, bundle, on_intercepted));
        });
        let subscription = page.on_request(handler);
        *lock(&self.hook) = Some(subscription);

        page.set_request_interception(true).await?;
        tracing::info!(
            page = page.id(),
            bundle = %self.loader.path().display(),
            "Request interception enabled"
        );
        Ok(())
    }

    /// Re-read the bundle; later requests get the new text
    pub async fn reload_file_contents(&self) -> Result<()> {
        let bundle = self.loader.load_file_contents().await?;
        if self.disposed.load(Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!(bytes = bundle.text.len(), "Bundle reloaded");
        store_bundle(&self.bundle, Some(bundle));
        Ok(())
    }

    /// Remove the request hook and drop the bundle text
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        if let Some(mut hook) = lock(&self.hook).take() {
            hook.dispose();
        }
        store_bundle(&self.bundle, None);
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }
}

async fn handle_request(
    request: Arc<dyn InterceptedRequest>,
    bundle: SharedBundle,
    on_intercepted: Option<InterceptedCallback>,
) {
    let served = if is_bundle_request(request.url(), request.method()) {
        current_bundle(&bundle)
    } else {
        None
    };

    let Some(served) = served else {
        if let Err(e) = request.continue_request().await {
            // Routine when the page navigated away before we answered
            report::report(Severity::Informational, "interceptor.continue", &e);
        }
        return;
    };

    let response = InterceptResponse {
        status: 200,
        content_type: BUNDLE_CONTENT_TYPE.to_string(),
        body: served.text.to_string(),
    };

    match request.respond(response).await {
        Ok(()) => {
            tracing::debug!(url = request.url(), "Served local bundle");
            if let Some(callback) = on_intercepted {
                callback(&served.file_name);
            }
        }
        Err(e) => report::report(Severity::Informational, "interceptor.respond", &e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockPage, MockRequest};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    const BUNDLE_URL: &str = "https://org.crm.dynamics.com/%7b000%7d/webresources/cc_Sample/bundle.js";

    fn bundle_file(text: &str) -> (tempfile::TempDir, BundleContentLoader) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.js");
        std::fs::write(&path, text).unwrap();
        (dir, BundleContentLoader::new(path))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[test]
    fn test_bundle_pattern() {
        assert!(is_bundle_request(BUNDLE_URL, "GET"));
        assert!(!is_bundle_request(BUNDLE_URL, "POST"));
        assert!(!is_bundle_request("https://org.crm.dynamics.com/webresources/x/other.js", "GET"));
        assert!(!is_bundle_request("https://org.crm.dynamics.com/bundle.js", "GET"));
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let (_dir, loader) = bundle_file("var a;");
        let interceptor = RequestInterceptor::new(loader);
        let page = MockPage::new("page-1");

        interceptor.register(page.clone(), None).await.unwrap();
        interceptor.register(page.clone(), None).await.unwrap();

        assert_eq!(page.interception_enabled_calls(), 1);
        assert_eq!(page.request_hooks_installed(), 1);
    }

    #[tokio::test]
    async fn test_bundle_get_is_answered() {
        let (_dir, loader) = bundle_file("var local;");
        let interceptor = RequestInterceptor::new(loader);
        let page = MockPage::new("page-1");
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let callback: InterceptedCallback = Arc::new(move |name: &str| {
            assert_eq!(name, "bundle.js");
            h.fetch_add(1, Ordering::SeqCst);
        });

        interceptor.register(page.clone(), Some(callback)).await.unwrap();
        let request = MockRequest::new(BUNDLE_URL, "GET");
        page.fire_request(request.clone());
        settle().await;

        assert_eq!(
            request.responses(),
            vec![InterceptResponse {
                status: 200,
                content_type: "text/javascript".to_string(),
                body: "var local;".to_string(),
            }]
        );
        assert_eq!(request.continue_calls(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_other_requests_pass_through() {
        let (_dir, loader) = bundle_file("var local;");
        let interceptor = RequestInterceptor::new(loader);
        let page = MockPage::new("page-1");
        interceptor.register(page.clone(), None).await.unwrap();

        let other = MockRequest::new("https://org.crm.dynamics.com/main.aspx", "GET");
        let post = MockRequest::new(BUNDLE_URL, "POST");
        page.fire_request(other.clone());
        page.fire_request(post.clone());
        settle().await;

        for request in [other, post] {
            assert_eq!(request.continue_calls(), 1);
            assert!(request.responses().is_empty());
        }
    }

    #[tokio::test]
    async fn test_failed_respond_skips_callback() {
        let (_dir, loader) = bundle_file("var local;");
        let interceptor = RequestInterceptor::new(loader);
        let page = MockPage::new("page-1");
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let callback: InterceptedCallback = Arc::new(move |_: &str| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        interceptor.register(page.clone(), Some(callback)).await.unwrap();

        let request = MockRequest::failing(BUNDLE_URL, "GET");
        page.fire_request(request.clone());
        settle().await;

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_continue_keeps_interceptor_serving() {
        let (_dir, loader) = bundle_file("var local;");
        let interceptor = RequestInterceptor::new(loader);
        let page = MockPage::new("page-1");
        interceptor.register(page.clone(), None).await.unwrap();

        let gone = MockRequest::failing_continue("https://org.crm.dynamics.com/main.aspx", "GET");
        page.fire_request(gone.clone());
        settle().await;
        assert_eq!(gone.continue_calls(), 1);
        assert!(gone.responses().is_empty());

        let request = MockRequest::new(BUNDLE_URL, "GET");
        page.fire_request(request.clone());
        settle().await;
        assert_eq!(request.responses().len(), 1);
        assert_eq!(request.responses()[0].body, "var local;");
        assert!(page.has_request_hook());
        assert!(interceptor.is_registered());
    }

    #[tokio::test]
    async fn test_reload_serves_new_text() {
        let (dir, loader) = bundle_file("var v1;");
        let interceptor = RequestInterceptor::new(loader);
        let page = MockPage::new("page-1");
        interceptor.register(page.clone(), None).await.unwrap();

        std::fs::write(dir.path().join("bundle.js"), "var v2;").unwrap();
        interceptor.reload_file_contents().await.unwrap();
        // Reloading never navigates by itself
        assert!(page.goto_calls().is_empty());

        let request = MockRequest::new(BUNDLE_URL, "GET");
        page.fire_request(request.clone());
        settle().await;
        assert_eq!(request.responses()[0].body, "var v2;");
    }

    #[tokio::test]
    async fn test_dispose_unhooks_and_is_idempotent() {
        let (_dir, loader) = bundle_file("var local;");
        let interceptor = RequestInterceptor::new(loader);
        // Never registered
        interceptor.dispose();

        let page = MockPage::new("page-1");
        interceptor.register(page.clone(), None).await.unwrap();
        interceptor.dispose();
        interceptor.dispose();

        let request = MockRequest::new(BUNDLE_URL, "GET");
        page.fire_request(request.clone());
        settle().await;
        assert!(request.responses().is_empty());
        assert!(!page.has_request_hook());
    }

    #[tokio::test]
    async fn test_register_fails_without_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let interceptor = RequestInterceptor::new(BundleContentLoader::new(dir.path().join("x.js")));
        let page = MockPage::new("page-1");

        assert!(interceptor.register(page.clone(), None).await.is_err());
        assert!(!interceptor.is_registered());
        assert_eq!(page.interception_enabled_calls(), 0);
    }
}
