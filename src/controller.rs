//! Debug session state machine
//!
//! Bound to one debug session in the host. `initialize` starts the browser,
//! the first served bundle attaches the native JavaScript debugger, and
//! termination on either side (page closed, native session stopped,
//! `disconnect`) tears the whole session down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::browser::{BrowserLauncher, BrowserSessionManager, ExecutableLocator, SessionCallbacks};
use crate::common::config::LaunchConfig;
use crate::common::report::{self, Severity};
use crate::common::sync::lock;
use crate::common::{Error, Result, Subscription};
use crate::host::{DebugHost, NativeAttachConfig, NativeSession, TerminationHandler};

/// Debug session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for `initialize`
    NotStarted,
    /// Browser starting, native debugger not attached yet
    Attaching,
    /// Native debugger attached to the browser
    Attached,
    /// Teardown in progress
    Stopping,
    Stopped,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::Attaching => write!(f, "attaching"),
            Self::Attached => write!(f, "attached"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Drives one PCF debug session from `initialize` to teardown
pub struct DebugSessionController {
    me: Weak<Self>,
    config: LaunchConfig,
    host: Arc<dyn DebugHost>,
    manager: Arc<BrowserSessionManager>,
    state: watch::Sender<SessionState>,
    native: Mutex<Option<Arc<dyn NativeSession>>>,
    attaching: tokio::sync::Mutex<()>,
    termination_hook: Mutex<Option<Subscription>>,
    grace_timer: Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl DebugSessionController {
    pub fn new(
        config: LaunchConfig,
        locator: Arc<dyn ExecutableLocator>,
        launcher: Arc<dyn BrowserLauncher>,
        host: Arc<dyn DebugHost>,
    ) -> Arc<Self> {
        let controller = Arc::new_cyclic(|me: &Weak<Self>| {
            let on_ready = me.clone();
            let on_closed = me.clone();
            let callbacks = SessionCallbacks {
                on_ready: Arc::new(move || {
                    if let Some(controller) = on_ready.upgrade() {
                        let task = Arc::clone(&controller);
                        controller.spawn(async move { task.on_browser_ready().await });
                    }
                }),
                on_closed: Arc::new(move || {
                    if let Some(controller) = on_closed.upgrade() {
                        tracing::info!("Debugged page closed, ending session");
                        let task = Arc::clone(&controller);
                        controller.spawn(async move { task.teardown().await });
                    }
                }),
            };

            Self {
                me: me.clone(),
                manager: BrowserSessionManager::new(
                    config.clone(),
                    locator,
                    launcher,
                    Arc::clone(&host),
                    callbacks,
                ),
                config,
                host,
                state: watch::Sender::new(SessionState::NotStarted),
                native: Mutex::new(None),
                attaching: tokio::sync::Mutex::new(()),
                termination_hook: Mutex::new(None),
                grace_timer: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
                disposed: AtomicBool::new(false),
            }
        });

        let me = Arc::downgrade(&controller);
        let handler: TerminationHandler = Arc::new(move |id: String| {
            if let Some(controller) = me.upgrade() {
                controller.on_native_terminated(&id);
            }
        });
        *lock(&controller.termination_hook) = Some(controller.host.on_session_terminated(handler));

        controller
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn manager(&self) -> &Arc<BrowserSessionManager> {
        &self.manager
    }

    /// The attached native session, if any
    pub fn native_session(&self) -> Option<Arc<dyn NativeSession>> {
        lock(&self.native).clone()
    }

    /// Wait until the session has been torn down
    pub async fn wait_stopped(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| *s == SessionState::Stopped).await;
    }

    fn transition(&self, from: &[SessionState], to: SessionState) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if from.contains(state) {
                *state = to;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::debug!(state = %to, "Session state changed");
        }
        changed
    }

    fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let mut tasks = lock(&self.tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.push(tokio::spawn(future));
    }

    /// Handle one protocol command from the host. Unknown commands are
    /// ignored.
    pub async fn handle_command(&self, command: &str) {
        match command {
            "initialize" => {
                let Some(controller) = self.me.upgrade() else {
                    return;
                };
                self.spawn(async move {
                    if let Err(e) = controller.launch().await {
                        tracing::debug!(error = %e, "Launch ended");
                    }
                });
            }
            "disconnect" => self.teardown().await,
            other => tracing::trace!(command = other, "Ignoring command"),
        }
    }

    /// Start the browser and load the control. Only the first call launches.
    ///
    /// Launch failures have already been shown to the user when this
    /// returns an error.
    pub async fn launch(&self) -> Result<()> {
        if !self.transition(&[SessionState::NotStarted], SessionState::Attaching) {
            tracing::debug!(state = %self.state(), "Ignoring repeated initialize");
            return Ok(());
        }
        tracing::info!(name = %self.config.name, "Starting PCF debug session");
        self.manager.launch().await
    }

    /// Attach the native debugger once the control's bundle is live
    pub async fn on_browser_ready(&self) {
        let _attaching = self.attaching.lock().await;

        if self.disposed.load(Ordering::SeqCst)
            || matches!(self.state(), SessionState::Stopping | SessionState::Stopped)
        {
            return;
        }
        if self.native_session().is_some() {
            tracing::debug!("Native debugger already attached");
            return;
        }

        let attach = NativeAttachConfig::from_launch(&self.config);
        if let Some(active) = self.host.active_session() {
            if active.config().same_target(&attach) {
                tracing::info!(session = active.id(), "Binding to running native session");
                self.bind(active);
                return;
            }
        }

        let attempts = self.config.timeouts.attach_retries.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            if self.disposed.load(Ordering::SeqCst) {
                return;
            }
            match self.host.start_native_session(&attach).await {
                Ok(session) => {
                    report::telemetry(
                        "native.attached",
                        &[("port", attach.port.to_string()), ("attempt", attempt.to_string())],
                    );
                    self.bind(session);
                    return;
                }
                Err(e) => {
                    report::report(Severity::Recoverable, "controller.attach", &e);
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.config.timeouts.attach_retry()).await;
                    }
                }
            }
        }

        let error = Error::AttachFailed {
            attempts,
            message: last_error.map(|e| e.to_string()).unwrap_or_default(),
        };
        report::report(Severity::Fatal, "controller.attach", &error);
        self.host.show_error(&error.to_string());
        self.teardown().await;
    }

    fn bind(&self, session: Arc<dyn NativeSession>) {
        tracing::info!(session = session.id(), "Native debugger attached");
        *lock(&self.native) = Some(session);
        self.cancel_grace_timer();
        self.transition(&[SessionState::Attaching], SessionState::Attached);
    }

    /// A native session ended; give it a grace period to come back
    fn on_native_terminated(&self, id: &str) {
        let ours = {
            let mut native = lock(&self.native);
            if native.as_ref().is_some_and(|session| session.id() == id) {
                native.take()
            } else {
                None
            }
        };
        if ours.is_none() {
            return;
        }

        tracing::info!(session = id, "Native session terminated");
        self.transition(&[SessionState::Attached], SessionState::Attaching);

        let Some(controller) = self.me.upgrade() else {
            return;
        };
        let grace = self.config.timeouts.termination_grace();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            // Detach the handle so teardown does not abort this task
            lock(&controller.grace_timer).take();

            if controller.native_session().is_some() {
                return;
            }
            let attach = NativeAttachConfig::from_launch(&controller.config);
            if let Some(active) = controller.host.active_session() {
                if active.config().same_target(&attach) {
                    controller.bind(active);
                    return;
                }
            }
            tracing::info!("Native session did not come back, ending session");
            controller.teardown().await;
        });

        if let Some(previous) = lock(&self.grace_timer).replace(timer) {
            previous.abort();
        }
    }

    fn cancel_grace_timer(&self) {
        if let Some(timer) = lock(&self.grace_timer).take() {
            timer.abort();
        }
    }

    /// Stop the native session, end our own session and close the browser
    pub async fn teardown(&self) {
        if !self.transition(
            &[
                SessionState::NotStarted,
                SessionState::Attaching,
                SessionState::Attached,
            ],
            SessionState::Stopping,
        ) {
            return;
        }
        tracing::info!("Tearing down PCF debug session");
        self.cancel_grace_timer();

        let native = lock(&self.native).take();
        if let Some(native) = native {
            if let Err(e) = native.stop().await {
                report::report(Severity::Informational, "controller.stop_native", &e);
            }
        }
        self.host.stop_own_session().await;
        self.manager.dispose().await;

        self.transition(&[SessionState::Stopping], SessionState::Stopped);
    }

    /// Release subscriptions, timers and tasks. Safe to repeat.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mut hook) = lock(&self.termination_hook).take() {
            hook.dispose();
        }
        self.cancel_grace_timer();
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        lock(&self.native).take();
    }
}
