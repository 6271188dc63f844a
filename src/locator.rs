//! Navigation to the hosted control
//!
//! Two phases per call: load the page that hosts the control, then (for a
//! control on a form tab) wait for the tab list and click the tab. Each
//! phase retries on its own budget and has its own exhaustion policy.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::browser::Page;
use crate::common::config::{ControlLocation, LaunchConfig};
use crate::common::report::{self, Severity};
use crate::common::{Error, Result};

/// Selector of the form's tab strip
pub const TAB_LIST_SELECTOR: &str = "ul[role='tablist']";

/// How many times a failed phase may be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryBudget {
    /// Up to `n` retries after the first attempt
    Finite(u32),
    Infinite,
}

impl RetryBudget {
    pub fn has_remaining(&self) -> bool {
        match self {
            Self::Finite(n) => *n > 0,
            Self::Infinite => true,
        }
    }

    fn consume(&mut self) {
        if let Self::Finite(n) = self {
            *n = n.saturating_sub(1);
        }
    }
}

/// What a phase does once its budget is spent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustionPolicy {
    /// Report and carry on as if the phase had finished
    Swallow,
    /// Hand the last error to the caller
    Rethrow,
}

const PAGE_POLICY: ExhaustionPolicy = ExhaustionPolicy::Swallow;
const TAB_POLICY: ExhaustionPolicy = ExhaustionPolicy::Rethrow;

/// Build `<origin>/main.aspx?appid=..&pagetype=control&controlName=..`.
///
/// Only the scheme and authority of `base_url` are kept. The host is copied
/// as written (no case folding).
pub fn full_screen_url(base_url: &str, app_id: &str, control_name: &str) -> Result<String> {
    url::Url::parse(base_url)
        .map_err(|e| Error::InvalidConfig(format!("url '{base_url}' is not valid: {e}")))?;

    let origin = match base_url.find("://") {
        Some(scheme_end) => {
            let rest = &base_url[scheme_end + 3..];
            let authority_len = rest.find(['/', '?', '#']).unwrap_or(rest.len());
            &base_url[..scheme_end + 3 + authority_len]
        }
        None => base_url.trim_end_matches('/'),
    };

    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("appid", app_id)
        .append_pair("pagetype", "control")
        .append_pair("controlName", control_name)
        .finish();

    Ok(format!("{origin}/main.aspx?{query}"))
}

/// Selector of the tab labelled exactly `tab_name`
pub fn tab_selector(tab_name: &str) -> String {
    let escaped = tab_name.replace('\\', "\\\\").replace('\'', "\\'");
    format!("li[aria-label='{escaped}']")
}

/// Drives a page to the control described by the launch configuration
pub struct ControlLocator {
    base_url: String,
    location: ControlLocation,
    backoff: Duration,
    selector_timeout: Duration,
    retrying: AtomicBool,
    disposed: AtomicBool,
}

impl ControlLocator {
    pub fn new(config: &LaunchConfig) -> Self {
        Self {
            base_url: config.url.clone(),
            location: config.location.clone(),
            backoff: config.timeouts.navigation_retry(),
            selector_timeout: config.timeouts.selector_timeout(),
            retrying: AtomicBool::new(true),
            disposed: AtomicBool::new(false),
        }
    }

    /// Override the retry backoff and the tab list wait
    pub fn with_timing(mut self, backoff: Duration, selector_timeout: Duration) -> Self {
        self.backoff = backoff;
        self.selector_timeout = selector_timeout;
        self
    }

    /// URL the page phase navigates to
    pub fn target_url(&self) -> Result<String> {
        match &self.location {
            ControlLocation::FullScreen {
                app_id,
                control_name,
            } => full_screen_url(&self.base_url, app_id, control_name),
            ControlLocation::Tab { .. } => Ok(self.base_url.clone()),
        }
    }

    /// Navigate `page` to the control.
    ///
    /// Page load failures are retried on `budget` and dropped once it runs
    /// out. Tab selection failures are retried on a fresh copy of `budget`
    /// and returned once it runs out.
    pub async fn navigate_to_control(&self, page: &dyn Page, budget: RetryBudget) -> Result<()> {
        let url = self.target_url()?;
        tracing::info!(page = page.id(), %url, ?budget, "Navigating to control");

        let target = url.as_str();
        let loaded = self
            .run_phase("locator.page", budget, PAGE_POLICY, move || page.goto(target))
            .await?;
        if !loaded {
            return Ok(());
        }

        let ControlLocation::Tab { tab_name, .. } = &self.location else {
            return Ok(());
        };

        let selector = tab_selector(tab_name);
        let selector = selector.as_str();
        let timeout = self.selector_timeout;
        self.run_phase("locator.tab", budget, TAB_POLICY, move || async move {
            page.wait_for_selector(TAB_LIST_SELECTOR, timeout).await?;
            page.click(selector).await
        })
        .await?;

        tracing::info!(page = page.id(), tab = %tab_name, "Control tab selected");
        Ok(())
    }

    /// Run one phase to completion.
    ///
    /// `Ok(true)` when an attempt succeeded, `Ok(false)` when the phase was
    /// abandoned (disposed, or exhausted under [`ExhaustionPolicy::Swallow`]).
    async fn run_phase<F, Fut>(
        &self,
        context: &str,
        mut budget: RetryBudget,
        policy: ExhaustionPolicy,
        mut attempt: F,
    ) -> Result<bool>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        loop {
            if self.is_disposed() {
                tracing::debug!(context, "Locator disposed, skipping navigation");
                return Ok(false);
            }

            let err = match attempt().await {
                Ok(()) => return Ok(true),
                Err(e) => e,
            };

            if !err.is_teardown_error() && self.should_retry(&budget) {
                report::report(Severity::Recoverable, context, &err);
                budget.consume();
                tokio::time::sleep(self.backoff).await;
                continue;
            }

            return match policy {
                ExhaustionPolicy::Swallow => {
                    report::report(Severity::Informational, context, &err);
                    Ok(false)
                }
                ExhaustionPolicy::Rethrow if self.is_disposed() && err.is_teardown_error() => {
                    tracing::debug!(context, error = %err, "Navigation ended by page teardown");
                    Ok(false)
                }
                ExhaustionPolicy::Rethrow => Err(err),
            };
        }
    }

    fn should_retry(&self, budget: &RetryBudget) -> bool {
        self.retrying.load(Ordering::SeqCst) && !self.is_disposed() && budget.has_remaining()
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Stop retrying. A navigation in flight stops at its next check.
    pub fn dispose(&self) {
        self.retrying.store(false, Ordering::SeqCst);
        self.disposed.store(true, Ordering::SeqCst);
    }
}
