use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CURRENCY: &str = "USDC";

const SHORT_ID_LEN: usize = 6;

#[derive(Debug, Error, PartialEq)]
pub enum OfferError {
    #[error("offer id is empty")]
    MissingId,
    #[error("offer {id} has an invalid amount: {amount}")]
    InvalidAmount { id: String, amount: f64 },
}

/// One scraped peer-transfer offer.
///
/// `id` is derived by the scraper from page content and position, so it is only
/// stable for as long as the page keeps rendering the offer the same way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferRecord {
    pub id: String,
    pub amount: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    /// Exchange rate shown next to the offer; 0 when the page showed none.
    #[serde(default)]
    pub rate: f64,
    /// When the offer was observed, not when it was created.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

impl OfferRecord {
    pub fn new(id: impl Into<String>, amount: f64) -> Self {
        Self {
            id: id.into(),
            amount,
            currency: default_currency(),
            payment_method: None,
            rate: 0.0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_payment_method(mut self, method: impl Into<String>) -> Self {
        self.payment_method = Some(method.into());
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    pub fn validate(&self) -> Result<(), OfferError> {
        if self.id.trim().is_empty() {
            return Err(OfferError::MissingId);
        }
        if !self.amount.is_finite() || self.amount < 0.0 {
            return Err(OfferError::InvalidAmount {
                id: self.id.clone(),
                amount: self.amount,
            });
        }
        Ok(())
    }

    /// Payment method with blank labels treated as absent.
    pub fn payment_method(&self) -> Option<&str> {
        self.payment_method
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }

    pub fn rate_known(&self) -> bool {
        self.rate.is_finite() && self.rate > 0.0
    }

    pub fn is_dollar_denominated(&self) -> bool {
        matches!(self.currency.to_ascii_uppercase().as_str(), "USD" | "USDC")
    }

    /// Trailing characters of the id, used in user-facing text.
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

pub fn short_id(id: &str) -> &str {
    let count = id.chars().count();
    if count <= SHORT_ID_LEN {
        return id;
    }
    let skip = count - SHORT_ID_LEN;
    let start = id.char_indices().nth(skip).map(|(idx, _)| idx).unwrap_or(0);
    &id[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_scraper_payload_with_defaults() {
        let offer: OfferRecord =
            serde_json::from_str(r#"{"id":"offer-1","amount":25.5,"paymentMethod":"InstaPay"}"#)
                .expect("payload should parse");
        assert_eq!(offer.currency, DEFAULT_CURRENCY);
        assert_eq!(offer.payment_method(), Some("InstaPay"));
        assert!(!offer.rate_known());
    }

    #[test]
    fn rejects_empty_id_and_bad_amounts() {
        assert_eq!(OfferRecord::new("  ", 10.0).validate(), Err(OfferError::MissingId));
        assert!(OfferRecord::new("x", f64::NAN).validate().is_err());
        assert!(OfferRecord::new("x", -1.0).validate().is_err());
        assert!(OfferRecord::new("x", 0.0).validate().is_ok());
    }

    #[test]
    fn blank_payment_method_is_absent() {
        let offer = OfferRecord::new("x", 1.0).with_payment_method("   ");
        assert_eq!(offer.payment_method(), None);
    }

    #[test]
    fn short_id_keeps_last_six_chars() {
        assert_eq!(short_id("offer-123456789"), "456789");
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id("ééééééé1"), "ééééé1");
    }

    #[test]
    fn dollar_currencies_are_case_insensitive() {
        assert!(OfferRecord::new("x", 1.0).with_currency("usd").is_dollar_denominated());
        assert!(!OfferRecord::new("x", 1.0).with_currency("EUR").is_dollar_denominated());
    }
}
