//! Debug Adapter Protocol surface
//!
//! The host talks DAP to this process over stdio. The adapter only listens.

pub mod adapter;
pub mod codec;
pub mod types;

pub use adapter::serve;
pub use types::RequestMessage;
