//! The boundary to whatever is hosting the debug session
//!
//! In an IDE the host owns the native JavaScript debugger, dialogs and the
//! list of running sessions. [`StandaloneHost`] plays that role for the
//! command line.

mod standalone;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::config::LaunchConfig;
use crate::common::{Result, Subscription};

pub use standalone::StandaloneHost;

/// Debug type of the native browser debugger we attach
pub const NATIVE_DEBUG_TYPE: &str = "pwa-msedge";

/// Called with the id of a native session that terminated
pub type TerminationHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Configuration handed to the host to attach its native debugger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeAttachConfig {
    #[serde(rename = "type")]
    pub debug_type: String,
    pub request: String,
    pub name: String,
    pub port: u16,
    pub web_root: PathBuf,
    pub url: String,
}

impl NativeAttachConfig {
    pub fn from_launch(config: &LaunchConfig) -> Self {
        Self {
            debug_type: NATIVE_DEBUG_TYPE.to_string(),
            request: "attach".to_string(),
            name: format!("{} (browser)", config.name),
            port: config.port,
            web_root: config.web_root.clone(),
            url: config.url.clone(),
        }
    }

    /// Whether `other` attaches to the same browser endpoint the same way
    pub fn same_target(&self, other: &NativeAttachConfig) -> bool {
        self.debug_type == other.debug_type
            && self.request == other.request
            && self.port == other.port
            && self.web_root == other.web_root
    }
}

/// A running native debug session
#[async_trait]
pub trait NativeSession: Send + Sync {
    fn id(&self) -> &str;

    fn config(&self) -> &NativeAttachConfig;

    async fn stop(&self) -> Result<()>;
}

/// Services the hosting environment provides
#[async_trait]
pub trait DebugHost: Send + Sync {
    /// Start the native debugger against the browser
    async fn start_native_session(
        &self,
        config: &NativeAttachConfig,
    ) -> Result<Arc<dyn NativeSession>>;

    /// The native session the user currently has selected, if any
    fn active_session(&self) -> Option<Arc<dyn NativeSession>>;

    /// End the orchestrating session itself
    async fn stop_own_session(&self);

    fn on_session_terminated(&self, handler: TerminationHandler) -> Subscription;

    /// Ask a yes/no question
    async fn confirm(&self, message: &str) -> bool;

    fn show_error(&self, message: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_config_wire_shape() {
        let config = NativeAttachConfig {
            debug_type: NATIVE_DEBUG_TYPE.to_string(),
            request: "attach".to_string(),
            name: "Debug (browser)".to_string(),
            port: 9222,
            web_root: PathBuf::from("/work"),
            url: "https://org.crm.dynamics.com".to_string(),
        };
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["type"], "pwa-msedge");
        assert_eq!(value["webRoot"], "/work");

        let mut renamed = config.clone();
        renamed.name = "Other".to_string();
        assert!(config.same_target(&renamed));

        renamed.port = 9333;
        assert!(!config.same_target(&renamed));
    }
}
