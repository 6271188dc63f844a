//! End-to-end tests of a debug session against fake browser and host
//!
//! Configuration goes through the same resolution path as the CLI; only
//! the browser process and the IDE are replaced by the recording fakes in
//! `pcf_debugger::testing`.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pcf_debugger::browser::{BrowserSessionManager, SessionCallbacks};
use pcf_debugger::common::config::{DebugConfiguration, LaunchConfig, Settings, Timeouts};
use pcf_debugger::testing::{MockBrowser, MockHost, MockLauncher, MockLocator, MockPage, MockRequest};
use pcf_debugger::{DebugSessionController, SessionState};

const BUNDLE: &str =
    "var control=1;\n//# sourceMappingURL=data:application/json;charset=utf-8;base64,e30=";
const BUNDLE_URL: &str =
    "https://org.crm.dynamics.com/webresources/cc_Contoso.Sample/bundle.js?v=1.0.0";

fn launch_config(web_root: &Path) -> LaunchConfig {
    std::fs::create_dir_all(web_root.join("out")).unwrap();
    std::fs::write(web_root.join("out/bundle.js"), BUNDLE).unwrap();

    let launch_json = serde_json::json!({
        "version": "0.2.0",
        "configurations": [
            {
                "type": "node",
                "request": "launch",
                "name": "Unrelated"
            },
            {
                "type": "pcf",
                "request": "launch",
                "name": "Debug Sample",
                "url": "https://org.crm.dynamics.com/main.aspx?pagetype=entityrecord",
                "webRoot": web_root,
                "file": "out/bundle.js",
                "port": 9222,
                "controlName": "Sample",
                "renderFullScreen": true,
                "appId": "f96ac8ee-529f-4510-af13-3fe5ff45f2b6"
            }
        ]
    });
    let config = DebugConfiguration::from_json(&launch_json.to_string(), None).unwrap();

    let settings = Settings {
        timeouts: Timeouts {
            navigation_retry_ms: 1,
            file_settle_ms: 20,
            attach_retry_ms: 1,
            termination_grace_ms: 50,
            ..Timeouts::default()
        },
        ..Settings::default()
    };
    LaunchConfig::resolve(&config, &settings).unwrap()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_fresh_launch_ready_then_page_close() {
    let dir = tempfile::tempdir().unwrap();
    let config = launch_config(dir.path());

    let page = MockPage::new("page-1");
    page.serve_bundle_on_goto(BUNDLE_URL);
    let browser = MockBrowser::new(vec![Arc::clone(&page)]);

    let ready = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicUsize::new(0));
    let callbacks = SessionCallbacks {
        on_ready: {
            let ready = Arc::clone(&ready);
            Arc::new(move || {
                ready.fetch_add(1, Ordering::SeqCst);
            })
        },
        on_closed: {
            let closed = Arc::clone(&closed);
            Arc::new(move || {
                closed.fetch_add(1, Ordering::SeqCst);
            })
        },
    };

    let manager = BrowserSessionManager::new(
        config,
        MockLocator::found("/opt/microsoft/msedge/msedge"),
        MockLauncher::new(Arc::clone(&browser)),
        MockHost::new(),
        callbacks,
    );
    manager.launch().await.unwrap();
    settle().await;

    assert_eq!(
        page.goto_calls(),
        vec![
            "https://org.crm.dynamics.com/main.aspx?appid=f96ac8ee-529f-4510-af13-3fe5ff45f2b6\
             &pagetype=control&controlName=Sample"
                .to_string()
        ]
    );
    assert!(page.click_calls().is_empty());
    assert_eq!(ready.load(Ordering::SeqCst), 1);
    assert_eq!(closed.load(Ordering::SeqCst), 0);

    page.close();
    page.close();

    assert_eq!(ready.load(Ordering::SeqCst), 1);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert_eq!(manager.page_count(), 0);
    assert!(!page.has_request_hook());

    manager.dispose().await;
    manager.dispose().await;
    assert_eq!(browser.close_calls(), 1);
}

#[tokio::test]
async fn test_controller_session_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let config = launch_config(dir.path());

    let page = MockPage::new("page-1");
    page.serve_bundle_on_goto(BUNDLE_URL);
    let browser = MockBrowser::new(vec![Arc::clone(&page)]);
    let host = MockHost::new();

    let controller = DebugSessionController::new(
        config,
        MockLocator::found("/opt/microsoft/msedge/msedge"),
        MockLauncher::new(Arc::clone(&browser)),
        host.clone(),
    );

    controller.handle_command("initialize").await;
    controller.handle_command("configurationDone").await;
    settle().await;

    assert_eq!(controller.state(), SessionState::Attached);
    let attaches = host.attach_calls();
    assert_eq!(attaches.len(), 1);
    assert_eq!(attaches[0].name, "Debug Sample (browser)");
    assert_eq!(attaches[0].web_root, dir.path());

    // A later reload of the form is served the local bundle as well
    let request = MockRequest::new(BUNDLE_URL, "GET");
    page.fire_request(Arc::clone(&request));
    settle().await;
    let responses = request.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status, 200);
    assert_eq!(responses[0].content_type, "text/javascript");
    assert_eq!(responses[0].body, BUNDLE);
    assert_eq!(request.continue_calls(), 0);

    page.close();
    tokio::time::timeout(Duration::from_secs(2), controller.wait_stopped())
        .await
        .expect("closing the page ends the session");

    assert_eq!(host.sessions()[0].stop_calls(), 1);
    assert_eq!(host.own_stop_calls(), 1);
    assert_eq!(browser.close_calls(), 1);

    controller.handle_command("disconnect").await;
    controller.dispose();
    controller.dispose();
    assert_eq!(host.own_stop_calls(), 1);
}

#[tokio::test]
async fn test_missing_browser_never_attaches() {
    let dir = tempfile::tempdir().unwrap();
    let config = launch_config(dir.path());
    let host = MockHost::new();
    let browser = MockBrowser::new(vec![MockPage::new("page-1")]);

    let controller = DebugSessionController::new(
        config,
        MockLocator::missing(),
        MockLauncher::new(browser),
        host.clone(),
    );

    assert!(controller.launch().await.is_err());
    assert_eq!(host.errors().len(), 1);
    assert!(host.attach_calls().is_empty());
    assert_eq!(controller.state(), SessionState::Attaching);
}
