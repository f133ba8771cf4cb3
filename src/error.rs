use std::path::PathBuf;

use thiserror::Error;

/// Error kinds raised across the trading pipeline.
///
/// Each variant maps onto a recovery policy: configuration errors abort
/// startup, artifact/schema errors abort the cycle, provider and exchange
/// errors skip the affected symbol or order, and invariant violations
/// pause the loop.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("configuration not found: {0}")]
    ConfigMissing(String),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("model artifact not found at {}", .0.display())]
    ArtifactMissing(PathBuf),

    #[error("feature schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("provider unavailable for {symbol}: {reason}")]
    ProviderTransient { symbol: String, reason: String },

    #[error("provider rejected request for {symbol}: {reason}")]
    ProviderPermanent { symbol: String, reason: String },

    #[error("exchange unavailable: {0}")]
    ExchangeTransient(String),

    #[error("exchange rejected request: {0}")]
    ExchangePermanent(String),

    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl BotError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BotError::ProviderTransient { .. } | BotError::ExchangeTransient(_)
        )
    }
}

impl From<reqwest::Error> for BotError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            BotError::ExchangeTransient(e.to_string())
        } else {
            BotError::ExchangePermanent(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let e = BotError::ProviderTransient {
            symbol: "SOL".to_string(),
            reason: "HTTP 429".to_string(),
        };
        assert!(e.is_transient());

        assert!(!BotError::ExchangePermanent("insufficient balance".into()).is_transient());
    }

    #[test]
    fn test_error_messages_name_the_symbol() {
        let e = BotError::ProviderPermanent {
            symbol: "XRP".to_string(),
            reason: "HTTP 404".to_string(),
        };
        assert!(e.to_string().contains("XRP"));
        assert!(e.to_string().contains("404"));
    }
}
