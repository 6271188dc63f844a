//! Common utilities shared by every part of the debugger

pub mod config;
pub mod error;
pub mod logging;
pub mod observer;
pub mod paths;
pub mod report;
pub mod sync;

pub use error::{Error, Result};
pub use observer::{Observer, Subscription};
