//! Test doubles
//!
//! Fakes of the browser and host capabilities, shared by the unit tests and
//! the integration tests so both drive the session logic the same way.

mod mock;

pub use mock::*;
