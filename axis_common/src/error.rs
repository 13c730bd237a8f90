//! Error types for the axis engine and its collaborators.

use thiserror::Error;

/// Configuration loading/validation error. Fatal at axis construction:
/// an axis with an invalid configuration is never brought up.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("config I/O error: {0}")]
    Io(String),

    /// TOML parse error.
    #[error("config parse error: {0}")]
    Parse(String),

    /// Parameter validation error.
    #[error("config validation: {0}")]
    Validation(String),
}

/// A link (input or external readback) could not be read.
#[derive(Debug, Clone, Error)]
#[error("link read failed: {0}")]
pub struct LinkError(pub String);

/// The controller rejected a command inside a transaction, substituting
/// its own value. The engine adopts the reported fallback and republishes.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("command {index} rejected; controller value {fallback}")]
pub struct CommandRejected {
    /// Index of the rejected command within the transaction.
    pub index: usize,
    /// The controller's own (clamped) value, in raw units.
    pub fallback: f64,
}

/// Engine-level error surfaced to the host.
///
/// Everything except configuration errors is recovered locally within the
/// invocation that observed it; the host sees published field state, not
/// a broken engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid configuration at construction.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Closed-loop input link unreadable; the cycle was aborted with the
    /// desired value held at last-good and the undefined flag set.
    #[error("input link unreadable: {0}")]
    LinkRead(#[from] LinkError),
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ConfigError::Validation("rtry out of range".into());
        assert_eq!(err.to_string(), "config validation: rtry out of range");

        let err = EngineError::LinkRead(LinkError("pv disconnected".into()));
        assert_eq!(
            err.to_string(),
            "input link unreadable: link read failed: pv disconnected"
        );
    }
}
