//! Error types for the PCF debugger
//!
//! Messages are written for the person at the keyboard: they say what went
//! wrong and, where there is one, what to change.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the PCF debugger
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    #[error("Launch configuration is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Invalid launch configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("PCF debugging is disabled in the user settings (set enabled = true)")]
    Disabled,

    // === Browser Errors ===
    #[error("Microsoft Edge ({flavor}) not found. Searched: {searched}")]
    BrowserNotFound { flavor: String, searched: String },

    #[error("Failed to launch browser: {0}")]
    BrowserLaunch(String),

    #[error("Browser has no open pages to debug in")]
    NoPages,

    #[error("Browser target closed")]
    TargetClosed,

    // === CDP Errors ===
    #[error("DevTools error {code}: {message}")]
    Cdp { code: i64, message: String },

    #[error("DevTools protocol error: {0}")]
    Protocol(String),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("No element matches '{0}'")]
    ElementNotFound(String),

    #[error("'{what}' timed out after {after:?}")]
    Timeout { what: String, after: Duration },

    // === Bundle Errors ===
    #[error("Failed to read bundle '{path}': {source}")]
    BundleLoad {
        path: String,
        #[source]
        source: io::Error,
    },

    // === Session Errors ===
    #[error("Could not attach the browser debugger after {attempts} attempts: {message}")]
    AttachFailed { attempts: u32, message: String },

    #[error("File watcher error: {0}")]
    Watch(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a browser-not-found error with the searched locations
    pub fn browser_not_found<S: AsRef<str>>(flavor: &str, paths: &[S]) -> Self {
        Self::BrowserNotFound {
            flavor: flavor.to_string(),
            searched: paths.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(", "),
        }
    }

    /// Create a navigation error
    pub fn navigation(url: &str, reason: impl Into<String>) -> Self {
        Self::Navigation {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error is what a page reports while it is being torn down.
    ///
    /// Navigation that races a page close surfaces as a closed target, a
    /// dropped websocket, or a CDP error naming the closed target/session.
    pub fn is_teardown_error(&self) -> bool {
        match self {
            Error::TargetClosed => true,
            Error::Protocol(detail) => {
                let detail = detail.to_ascii_lowercase();
                detail.contains("closed") || detail.contains("detached")
            }
            Error::Cdp { message, .. } => {
                let message = message.to_ascii_lowercase();
                message.contains("target closed")
                    || message.contains("session closed")
                    || message.contains("no target with given id")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_teardown_classification() {
        assert!(Error::TargetClosed.is_teardown_error());
        assert!(Error::Protocol("websocket closed".into()).is_teardown_error());
        assert!(Error::Cdp {
            code: -32000,
            message: "Target closed.".into()
        }
        .is_teardown_error());
        assert!(!Error::navigation("https://x", "net::ERR_NAME_NOT_RESOLVED").is_teardown_error());
        assert!(!Error::NoPages.is_teardown_error());
    }

    #[test]
    fn test_browser_not_found_lists_paths() {
        let err = Error::browser_not_found("Beta", &["/a", "/b"]);
        assert_eq!(
            err.to_string(),
            "Microsoft Edge (Beta) not found. Searched: /a, /b"
        );
    }
}
