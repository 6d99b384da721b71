//! Error taxonomy for the reconciliation engine.
//!
//! Propagation policy: no single bad record or single failing provider
//! call aborts a reconciliation pass. Per-record failures accumulate in a
//! `BatchOutcome`; whole-operation retry/backoff belongs to the external
//! scheduler.

use thiserror::Error;

/// Engine-level error kinds.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad input to a resolver or normalizer. No side effect was taken.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A provider feed was unreachable or timed out. The caller continues
    /// with the remaining providers.
    #[error("provider {provider} unavailable: {message}")]
    TransientProvider { provider: String, message: String },

    /// A single malformed provider record. Skip it, continue the batch.
    #[error("malformed record from {provider}: {message}")]
    DataIntegrity { provider: String, message: String },

    /// The guarded downstream dependency is unhealthy; the cycle is
    /// skipped without escalation.
    #[error("circuit breaker '{0}' is open")]
    CircuitOpen(String),

    /// Store or cache failure surfaced from the infrastructure layer.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation(message.into())
    }

    pub fn transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::TransientProvider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn data_integrity(provider: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::DataIntegrity {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether this error should skip only the offending record rather
    /// than the surrounding batch.
    pub fn is_record_scoped(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_) | EngineError::DataIntegrity { .. }
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_scoped_errors() {
        assert!(EngineError::validation("too short").is_record_scoped());
        assert!(EngineError::data_integrity("betsapi", "missing teams").is_record_scoped());
        assert!(!EngineError::CircuitOpen("enrichment".to_string()).is_record_scoped());
        assert!(!EngineError::transient("sportmonks", "timeout").is_record_scoped());
    }

    #[test]
    fn test_display_includes_provider() {
        let err = EngineError::data_integrity("flashlive", "no event id");
        assert!(err.to_string().contains("flashlive"));
    }
}
