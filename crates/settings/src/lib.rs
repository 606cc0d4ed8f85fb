use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;

pub const DEFAULT_POLLING_INTERVAL_SECS: u64 = 30;
pub const MIN_POLLING_INTERVAL_SECS: u64 = 15;

const MASK: &str = "******";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings patch must be a JSON object")]
    PatchNotObject,
    #[error("unknown settings key: {0}")]
    UnknownKey(String),
    #[error("invalid settings value: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// User settings as stored by the extension.
///
/// Keys are serialized camelCase so documents written by the popup load unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub monitoring_active: bool,
    pub telegram_token: String,
    pub telegram_chat_id: String,
    pub min_amount: f64,
    /// `None` or a non-positive value means no upper bound.
    pub max_amount: Option<f64>,
    pub payment_methods: String,
    pub usd_to_egp_rate: f64,
    pub manual_balance: f64,
    pub chrome_notifications: bool,
    pub telegram_notifications: bool,
    pub auto_accept_enabled: bool,
    pub bot_server_url: String,
    pub user_id_for_polling: String,
    pub polling_interval: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            monitoring_active: false,
            telegram_token: String::new(),
            telegram_chat_id: String::new(),
            min_amount: 0.0,
            max_amount: None,
            payment_methods: String::new(),
            usd_to_egp_rate: 0.0,
            manual_balance: 0.0,
            chrome_notifications: true,
            telegram_notifications: true,
            auto_accept_enabled: false,
            bot_server_url: String::new(),
            user_id_for_polling: String::new(),
            polling_interval: DEFAULT_POLLING_INTERVAL_SECS,
        }
    }
}

impl Settings {
    pub fn from_json(raw: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Lower-cased, trimmed allow-list entries; empty means unrestricted.
    pub fn payment_allow_list(&self) -> Vec<String> {
        self.payment_methods
            .to_lowercase()
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn min_amount(&self) -> f64 {
        if self.min_amount.is_finite() {
            self.min_amount
        } else {
            0.0
        }
    }

    pub fn max_amount(&self) -> f64 {
        match self.max_amount {
            Some(max) if max.is_finite() && max > 0.0 => max,
            _ => f64::INFINITY,
        }
    }

    pub fn telegram_credentials(&self) -> Option<(&str, &str)> {
        let token = self.telegram_token.trim();
        let chat_id = self.telegram_chat_id.trim();
        if token.is_empty() || chat_id.is_empty() {
            return None;
        }
        Some((token, chat_id))
    }

    pub fn polling_enabled(&self) -> bool {
        self.monitoring_active
            && !self.bot_server_url.trim().is_empty()
            && !self.user_id_for_polling.trim().is_empty()
    }

    pub fn polling_interval(&self) -> Duration {
        let secs = match self.polling_interval {
            0 => DEFAULT_POLLING_INTERVAL_SECS,
            secs => secs,
        };
        Duration::from_secs(secs.max(MIN_POLLING_INTERVAL_SECS))
    }

    /// Copy safe to log.
    pub fn masked(&self) -> Self {
        let mut masked = self.clone();
        if !masked.telegram_token.is_empty() {
            masked.telegram_token = MASK.to_string();
        }
        masked
    }

    /// Merges the keys of `patch` into these settings and returns the keys whose value
    /// changed. Unknown keys are rejected and leave the settings untouched.
    pub fn merge_patch(&mut self, patch: &Value) -> Result<Vec<String>, SettingsError> {
        let patch = patch.as_object().ok_or(SettingsError::PatchNotObject)?;
        let mut current = match serde_json::to_value(&*self)? {
            Value::Object(map) => map,
            _ => return Err(SettingsError::PatchNotObject),
        };

        let mut changed = Vec::new();
        for (key, value) in patch {
            let Some(existing) = current.get_mut(key) else {
                return Err(SettingsError::UnknownKey(key.clone()));
            };
            if existing != value {
                *existing = value.clone();
                changed.push(key.clone());
            }
        }

        if !changed.is_empty() {
            *self = serde_json::from_value(Value::Object(current))?;
        }
        Ok(changed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonitoringState {
    Active,
    #[default]
    Paused,
}

/// Single owner of the current settings; readers subscribe to the change stream.
#[derive(Clone)]
pub struct SettingsHandle {
    tx: Arc<watch::Sender<Settings>>,
}

impl Default for SettingsHandle {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl SettingsHandle {
    pub fn new(settings: Settings) -> Self {
        let (tx, _rx) = watch::channel(settings);
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> Settings {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }

    pub fn status(&self) -> MonitoringState {
        if self.tx.borrow().monitoring_active {
            MonitoringState::Active
        } else {
            MonitoringState::Paused
        }
    }

    pub fn pause(&self) -> bool {
        self.set_monitoring(false)
    }

    pub fn resume(&self) -> bool {
        self.set_monitoring(true)
    }

    fn set_monitoring(&self, active: bool) -> bool {
        self.tx.send_if_modified(|settings| {
            if settings.monitoring_active == active {
                return false;
            }
            settings.monitoring_active = active;
            true
        })
    }

    pub fn replace(&self, settings: Settings) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == settings {
                return false;
            }
            *current = settings;
            true
        })
    }

    pub fn apply_patch(&self, patch: &Value) -> Result<Vec<String>, SettingsError> {
        let mut next = self.snapshot();
        let changed = next.merge_patch(patch)?;
        if !changed.is_empty() {
            self.replace(next);
        }
        Ok(changed)
    }
}
