//! USDT→EGP peer-to-peer rate lookup used to annotate notices.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time;
use tracing::{info, warn};

pub const DEFAULT_RATE_URL: &str = "https://p2p.army/en/p2p/fiats/EGP";
pub const FALLBACK_RATE: f64 = 77.43;
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

// Tried in order; the first capture that parses to a positive number wins.
static RATE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"≈\s*([0-9.]+)\s*EGP[\s\S]*?1\s*USDT",
        r"1\s*USDT[\s\S]*?≈\s*([0-9.]+)\s*EGP",
        r"≈\s*([0-9.]+)\s*EGP",
        r"<div[^>]*>1\s*USDT</div>[\s\S]*?≈\s*([0-9.]+)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

#[derive(Debug, Error)]
pub enum RateError {
    #[error("rate page returned {0}")]
    Status(reqwest::StatusCode),
    #[error("rate page request failed: {0}")]
    Network(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    Scraped,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateQuote {
    pub rate: f64,
    pub source: RateSource,
    pub fetched_at: DateTime<Utc>,
}

pub fn extract_rate(html: &str) -> Option<f64> {
    RATE_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(html)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .filter(|rate| rate.is_finite() && *rate > 0.0)
    })
}

#[derive(Clone, Default)]
pub struct RateHandle {
    quote: Arc<RwLock<Option<RateQuote>>>,
}

impl RateHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, quote: RateQuote) {
        if let Ok(mut guard) = self.quote.write() {
            *guard = Some(quote);
        }
    }

    pub fn current(&self) -> Option<RateQuote> {
        self.quote.read().ok().and_then(|g| g.clone())
    }

    pub fn rate(&self) -> Option<f64> {
        self.current().map(|q| q.rate)
    }
}

pub struct RateFetcher {
    client: Client,
    url: String,
}

impl RateFetcher {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// Fetches the rate page. A page that loads but matches no pattern yields the
    /// fallback quote; transport and status failures are errors.
    pub async fn fetch(&self) -> Result<RateQuote, RateError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RateError::Status(status));
        }
        let html = response.text().await?;
        let quote = match extract_rate(&html) {
            Some(rate) => RateQuote {
                rate,
                source: RateSource::Scraped,
                fetched_at: Utc::now(),
            },
            None => {
                warn!(url = %self.url, "could not extract P2P rate, using fallback");
                RateQuote {
                    rate: FALLBACK_RATE,
                    source: RateSource::Fallback,
                    fetched_at: Utc::now(),
                }
            }
        };
        Ok(quote)
    }
}

/// Refreshes `handle` every `interval` until `shutdown` flips to true. Failed fetches
/// keep the previous quote.
pub async fn run_refresh(
    fetcher: RateFetcher,
    handle: RateHandle,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }
        match fetcher.fetch().await {
            Ok(quote) => {
                info!(rate = quote.rate, source = ?quote.source, "P2P rate updated");
                handle.set(quote);
            }
            Err(err) => warn!(error = %err, "P2P rate refresh failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_rate_next_to_usdt() {
        let html = r#"<div class="price">≈ 51.37 EGP</div><div>1 USDT</div>"#;
        assert_eq!(extract_rate(html), Some(51.37));
    }

    #[test]
    fn extracts_rate_after_usdt_label() {
        let html = "<span>1 USDT</span> <b>≈ 50.9 EGP</b>";
        assert_eq!(extract_rate(html), Some(50.9));
    }

    #[test]
    fn no_match_yields_none() {
        assert_eq!(extract_rate("<html>maintenance</html>"), None);
        assert_eq!(extract_rate("≈ . EGP"), None);
    }

    #[test]
    fn handle_starts_empty_and_keeps_latest() {
        let handle = RateHandle::new();
        assert_eq!(handle.rate(), None);
        handle.set(RateQuote {
            rate: FALLBACK_RATE,
            source: RateSource::Fallback,
            fetched_at: Utc::now(),
        });
        assert_eq!(handle.rate(), Some(FALLBACK_RATE));
    }
}
