//! PCF Debugger - remote debugging for Power Apps component framework
//! controls
//!
//! A browser is launched with remote debugging enabled, requests for the
//! deployed control bundle are answered with the locally built one, and the
//! native JavaScript debugger is attached once the control has loaded.

pub mod browser;
pub mod bundle;
pub mod cdp;
pub mod cli;
pub mod commands;
pub mod common;
pub mod controller;
pub mod dap;
pub mod host;
pub mod interceptor;
pub mod locator;
pub mod testing;
pub mod watcher;

pub use common::{Error, Result};
pub use controller::{DebugSessionController, SessionState};
