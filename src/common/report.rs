//! Error reporting and telemetry sink
//!
//! Every component reports failures through here instead of deciding on its
//! own how loud to be. The severity decides the log level; whether the
//! operation continues is up to the caller.

use std::fmt::Display;

/// Target used for telemetry events so they can be filtered separately
pub const TELEMETRY_TARGET: &str = "pcf_debugger::telemetry";

/// How bad a reported failure is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The current launch attempt is over; the user gets a dialog
    Fatal,
    /// The operation will be retried
    Recoverable,
    /// Logged, the operation proceeds or is abandoned quietly
    Informational,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fatal => write!(f, "fatal"),
            Self::Recoverable => write!(f, "recoverable"),
            Self::Informational => write!(f, "informational"),
        }
    }
}

/// Report a failure with its context
pub fn report(severity: Severity, context: &str, error: &dyn Display) {
    match severity {
        Severity::Fatal => {
            tracing::error!(target: TELEMETRY_TARGET, %severity, context, error = %error, "error reported")
        }
        Severity::Recoverable => {
            tracing::warn!(target: TELEMETRY_TARGET, %severity, context, error = %error, "error reported")
        }
        Severity::Informational => {
            tracing::info!(target: TELEMETRY_TARGET, %severity, context, error = %error, "error reported")
        }
    }
}

/// Report a warning that is not tied to an error value
pub fn warn(context: &str, message: &str) {
    tracing::warn!(target: TELEMETRY_TARGET, context, "{}", message);
}

/// Record a telemetry event with key/value properties
pub fn telemetry(event: &str, properties: &[(&str, String)]) {
    let properties = properties
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ");
    tracing::info!(target: TELEMETRY_TARGET, event, %properties, "telemetry");
}
