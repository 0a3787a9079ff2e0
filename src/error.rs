//! Domain-specific error types for the completion engine.
//!
//! Typed errors enable callers to match on specific failure modes
//! rather than parsing error message strings. User-impacting errors
//! are surfaced as a single terminal stream event; local cleanup
//! failures are absorbed and logged.

use std::time::Duration;

/// Errors that can occur while driving an agent process.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Sandbox directory could not be created or removed.
    #[error("Sandbox operation failed: {message}")]
    Sandbox { message: String },

    /// Environment restoration after a request failed.
    #[error("Environment restore failed: {message}")]
    EnvironmentRestore { message: String },

    /// Agent binary is missing or not executable.
    #[error("Failed to spawn agent '{binary}': {message}")]
    Spawn { binary: String, message: String },

    /// Agent process exited with a non-zero status.
    #[error("Agent exited with code {code:?}: {stderr}")]
    ProcessExit { code: Option<i32>, stderr: String },

    /// Poll or overall ceiling exceeded; the process was killed.
    #[error("Agent timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },
}

impl EngineError {
    /// Creates a `Sandbox` error.
    pub fn sandbox(message: impl Into<String>) -> Self {
        Self::Sandbox {
            message: message.into(),
        }
    }

    /// Creates an `EnvironmentRestore` error.
    #[allow(dead_code)] // Surfaced only through logs today
    pub fn environment_restore(message: impl Into<String>) -> Self {
        Self::EnvironmentRestore {
            message: message.into(),
        }
    }

    /// Creates a `Spawn` error.
    pub fn spawn(binary: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Spawn {
            binary: binary.into(),
            message: message.into(),
        }
    }

    /// Creates a `ProcessExit` error from a status code and captured stderr.
    pub fn process_exit(code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self::ProcessExit {
            code,
            stderr: stderr.into(),
        }
    }

    /// Creates a `Timeout` error from a `Duration`.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout {
            timeout_secs: duration.as_secs(),
        }
    }

    /// Returns true if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true if this is a spawn failure.
    pub fn is_spawn(&self) -> bool {
        matches!(self, Self::Spawn { .. })
    }

    /// Returns true if this is a non-zero exit.
    pub fn is_process_exit(&self) -> bool {
        matches!(self, Self::ProcessExit { .. })
    }

    /// Returns true if the error message suggests a transient condition
    /// worth retrying in a narrow sub-operation.
    pub fn is_transient(&self) -> bool {
        const TRANSIENT_MARKERS: &[&str] = &[
            "No such file",
            "Resource temporarily unavailable",
            "Text file busy",
            "Broken pipe",
        ];
        let text = self.to_string();
        TRANSIENT_MARKERS.iter().any(|m| text.contains(m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_error() {
        let err = EngineError::sandbox("disk full");
        assert!(!err.is_timeout());
        assert_eq!(err.to_string(), "Sandbox operation failed: disk full");
    }

    #[test]
    fn test_spawn_error() {
        let err = EngineError::spawn("claude", "No such file or directory");
        assert!(err.is_spawn());
        assert!(err.is_transient());
        assert_eq!(
            err.to_string(),
            "Failed to spawn agent 'claude': No such file or directory"
        );
    }

    #[test]
    fn test_process_exit_error() {
        let err = EngineError::process_exit(Some(1), "auth required");
        assert!(err.is_process_exit());
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "Agent exited with code Some(1): auth required");
    }

    #[test]
    fn test_timeout_error() {
        let err = EngineError::timeout(Duration::from_secs(90));
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Agent timed out after 90 seconds");
    }

    #[test]
    fn test_transient_detection() {
        let transient = EngineError::process_exit(Some(1), "cat: /tmp/x: No such file");
        assert!(transient.is_transient());

        let permanent = EngineError::process_exit(Some(2), "invalid API key");
        assert!(!permanent.is_transient());
    }
}
