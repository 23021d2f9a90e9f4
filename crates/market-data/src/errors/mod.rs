//! Error types for the market data crate.
//!
//! Quote sources never surface these to the scheduler directly: a failed
//! code is simply absent from the batch result. The errors exist so that
//! providers can report *why* a code was dropped in their logs.

use thiserror::Error;

/// Errors that can occur while fetching a quote from a provider.
#[derive(Error, Debug)]
pub enum MarketDataError {
    /// The requested code was not found by the provider.
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// The request to the provider did not complete within its timeout.
    #[error("Timeout: {provider}")]
    Timeout {
        /// The provider that timed out
        provider: String,
    },

    /// A provider-specific error occurred.
    #[error("Provider error: {provider} - {message}")]
    ProviderError {
        /// The provider that returned the error
        provider: String,
        /// The error message from the provider
        message: String,
    },

    /// The provider returned data that could not be turned into a quote.
    #[error("Validation failed: {message}")]
    ValidationFailed {
        /// Description of the validation failure
        message: String,
    },

    /// A network error occurred while communicating with a provider.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl MarketDataError {
    /// Whether retrying on the next refresh cycle may succeed.
    ///
    /// Unknown symbols and malformed payloads are stable failures; everything
    /// else is assumed to be a transient transport or provider hiccup.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::SymbolNotFound(_) | Self::ValidationFailed { .. } => false,
            Self::Timeout { .. } | Self::ProviderError { .. } | Self::Network(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_not_found_is_not_transient() {
        let error = MarketDataError::SymbolNotFound("9999".to_string());
        assert!(!error.is_transient());
    }

    #[test]
    fn test_timeout_is_transient() {
        let error = MarketDataError::Timeout {
            provider: "TWSE".to_string(),
        };
        assert!(error.is_transient());
    }

    #[test]
    fn test_error_display() {
        let error = MarketDataError::SymbolNotFound("2330".to_string());
        assert_eq!(format!("{}", error), "Symbol not found: 2330");

        let error = MarketDataError::ProviderError {
            provider: "YAHOO".to_string(),
            message: "HTTP 503".to_string(),
        };
        assert_eq!(format!("{}", error), "Provider error: YAHOO - HTTP 503");
    }
}
