//! Offer predicates: the notification filter and the stricter auto-accept decision.
//!
//! Both are pure over an offer and a settings snapshot. Neither touches the ledger
//! beyond reading it.

use std::fmt;

use ledger::DedupLedger;
use offers::OfferRecord;
use serde::{Deserialize, Serialize};
use settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    MalformedOffer,
    MonitoringInactive,
    AutoAcceptDisabled,
    AlreadyProcessed,
    AmountOutOfRange,
    MissingPaymentMethod,
    PaymentMethodNotAllowed,
    NoBalanceConfigured,
    InsufficientBalance,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::MalformedOffer => "malformed offer",
            Rejection::MonitoringInactive => "monitoring inactive",
            Rejection::AutoAcceptDisabled => "auto-accept disabled",
            Rejection::AlreadyProcessed => "already processed",
            Rejection::AmountOutOfRange => "amount out of range",
            Rejection::MissingPaymentMethod => "payment method missing",
            Rejection::PaymentMethodNotAllowed => "payment method not allowed",
            Rejection::NoBalanceConfigured => "no positive balance configured",
            Rejection::InsufficientBalance => "amount exceeds balance",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Reject(Rejection),
}

impl Verdict {
    pub fn passed(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

pub fn meets_amount_criteria(offer: &OfferRecord, settings: &Settings) -> bool {
    offer.amount >= settings.min_amount() && offer.amount <= settings.max_amount()
}

/// Allow-list check. Fails closed when a list is configured but the offer carries no
/// payment method.
pub fn check_payment_method(offer: &OfferRecord, settings: &Settings) -> Result<(), Rejection> {
    let allowed = settings.payment_allow_list();
    if allowed.is_empty() {
        return Ok(());
    }
    let Some(method) = offer.payment_method() else {
        return Err(Rejection::MissingPaymentMethod);
    };
    let method = method.to_lowercase();
    if allowed.iter().any(|m| *m == method) {
        Ok(())
    } else {
        Err(Rejection::PaymentMethodNotAllowed)
    }
}

fn check_criteria(offer: &OfferRecord, settings: &Settings) -> Result<(), Rejection> {
    if !meets_amount_criteria(offer, settings) {
        return Err(Rejection::AmountOutOfRange);
    }
    check_payment_method(offer, settings)
}

pub fn evaluate_filter(offer: &OfferRecord, settings: &Settings) -> Verdict {
    if !settings.monitoring_active {
        return Verdict::Reject(Rejection::MonitoringInactive);
    }
    match check_criteria(offer, settings) {
        Ok(()) => Verdict::Pass,
        Err(rejection) => Verdict::Reject(rejection),
    }
}

pub fn passes_filter(offer: &OfferRecord, settings: &Settings) -> bool {
    evaluate_filter(offer, settings).passed()
}

/// Checks run cheapest first. A pass is only a go-ahead: marking the ledger is the
/// caller's job once the accept is actually issued.
pub fn evaluate_auto_accept(
    offer: &OfferRecord,
    settings: &Settings,
    ledger: &DedupLedger,
) -> Verdict {
    if !settings.monitoring_active {
        return Verdict::Reject(Rejection::MonitoringInactive);
    }
    if !settings.auto_accept_enabled {
        return Verdict::Reject(Rejection::AutoAcceptDisabled);
    }
    if ledger.has(&offer.id) {
        return Verdict::Reject(Rejection::AlreadyProcessed);
    }
    if let Err(rejection) = check_criteria(offer, settings) {
        return Verdict::Reject(rejection);
    }

    let balance = settings.manual_balance;
    if !balance.is_finite() || balance <= 0.0 {
        return Verdict::Reject(Rejection::NoBalanceConfigured);
    }
    if offer.amount > balance {
        return Verdict::Reject(Rejection::InsufficientBalance);
    }
    Verdict::Pass
}

pub fn should_auto_accept(offer: &OfferRecord, settings: &Settings, ledger: &DedupLedger) -> bool {
    evaluate_auto_accept(offer, settings, ledger).passed()
}
