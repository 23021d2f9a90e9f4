//! Instrument domain model.

use serde::{Deserialize, Serialize};

use crate::{errors::ValidationError, Result};

/// A tradable security, uniquely identified by its exchange code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    pub code: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
}

impl Instrument {
    pub fn new(code: impl AsRef<str>, name: impl Into<String>) -> Self {
        Self {
            code: normalize_code(code.as_ref()),
            name: name.into(),
            market: None,
            industry: None,
        }
    }

    pub fn with_market(mut self, market: impl Into<String>) -> Self {
        self.market = Some(market.into());
        self
    }

    pub fn with_industry(mut self, industry: impl Into<String>) -> Self {
        self.industry = Some(industry.into());
        self
    }

    /// Validates the instrument before it is stored.
    pub fn validate(&self) -> Result<()> {
        if self.code.is_empty() {
            return Err(ValidationError::MissingField("code".to_string()).into());
        }
        if self.code.chars().any(char::is_whitespace) {
            return Err(ValidationError::InvalidInput(format!(
                "Instrument code '{}' must not contain whitespace",
                self.code
            ))
            .into());
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name".to_string()).into());
        }
        Ok(())
    }
}

/// Canonical form of an exchange code: trimmed and upper-cased.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_normalizes_code() {
        let instrument = Instrument::new(" aapl ", "Apple");
        assert_eq!(instrument.code, "AAPL");
    }

    #[test]
    fn test_validate_rejects_blank_fields() {
        assert!(Instrument::new("", "Nameless").validate().is_err());
        assert!(Instrument::new("2330", "  ").validate().is_err());
        assert!(Instrument::new("23 30", "TSMC").validate().is_err());
        assert!(Instrument::new("2330", "TSMC").validate().is_ok());
    }

    #[test]
    fn test_optional_fields_are_omitted_from_json() {
        let json = serde_json::to_string(&Instrument::new("2330", "TSMC")).unwrap();
        assert_eq!(json, r#"{"code":"2330","name":"TSMC"}"#);
    }
}
