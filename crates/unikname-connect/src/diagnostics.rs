//! Verbose protocol diagnostics.
//!
//! Admins can switch on verbose logging to debug a provider integration. The
//! messages go to the host logger at warning level so they show up with the
//! default log filter. Logging never fails a login.

use std::sync::Arc;

/// Prefix for every diagnostics line.
pub const LOG_PREFIX: &str = "OIDC Log: ";

/// Error returned by a host logger.
#[derive(Debug, thiserror::Error)]
#[error("Logger failure: {0}")]
pub struct LogError(pub String);

/// Host logging service.
pub trait Logger: Send + Sync {
    /// Writes a warning-level line.
    fn warn(&self, message: &str) -> Result<(), LogError>;
}

/// Logger that writes to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn warn(&self, message: &str) -> Result<(), LogError> {
        tracing::warn!(target: "unikname_connect::diagnostics", "{}", message);
        Ok(())
    }
}

/// Gated diagnostics logger bound to one request's verbose flag.
#[derive(Clone)]
pub struct DiagnosticsLogger {
    logger: Arc<dyn Logger>,
    verbose: bool,
}

impl DiagnosticsLogger {
    /// Creates a diagnostics logger.
    #[must_use]
    pub fn new(logger: Arc<dyn Logger>, verbose: bool) -> Self {
        Self { logger, verbose }
    }

    /// Logs `message` with the "OIDC Log: " prefix when verbose logging is on.
    pub fn log(&self, message: impl AsRef<str>) {
        if !self.verbose {
            return;
        }
        let line = format!("{LOG_PREFIX}{}", message.as_ref());
        if let Err(e) = self.logger.warn(&line) {
            tracing::debug!(error = %e, "Diagnostics logger failed");
        }
    }
}

impl std::fmt::Debug for DiagnosticsLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticsLogger")
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}
