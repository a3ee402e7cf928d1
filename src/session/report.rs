//! Error reporting for session stages.
//!
//! Downstream failures are swallowed by policy — a segment's transcription or
//! scoring failure must never abort the session — so every swallowed error is
//! routed through this seam to leave an operator trail.

use std::fmt;

/// Errors that can occur during session processing.
#[derive(Debug, Clone)]
pub enum SessionError {
    /// Recoverable error; the session continues.
    Recoverable(String),
    /// Fatal error for the stage that raised it.
    Fatal(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Recoverable(msg) => write!(f, "Recoverable error: {}", msg),
            SessionError::Fatal(msg) => write!(f, "Fatal error: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

/// Trait for reporting errors from session stages.
pub trait ErrorReporter: Send + Sync {
    /// Reports an error from the named stage.
    fn report(&self, stage: &str, error: &SessionError);
}

/// Simple error reporter that logs to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, stage: &str, error: &SessionError) {
        eprintln!("[{}] {}", stage, error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_display() {
        let recoverable = SessionError::Recoverable("scoring call failed".to_string());
        assert_eq!(
            recoverable.to_string(),
            "Recoverable error: scoring call failed"
        );

        let fatal = SessionError::Fatal("capture gave up".to_string());
        assert_eq!(fatal.to_string(), "Fatal error: capture gave up");
    }

    #[test]
    fn test_log_reporter() {
        let reporter = LogReporter;
        let error = SessionError::Recoverable("test error".to_string());
        // Just ensure it doesn't panic
        reporter.report("scoring", &error);
    }
}
