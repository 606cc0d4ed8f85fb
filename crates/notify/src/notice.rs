use execution::{AcceptMode, AcceptResult};
use offers::{short_id, OfferRecord};
use serde::{Deserialize, Serialize};

const NEW_OFFER_TITLE: &str = "New Airtm Offer!";
const DEFAULT_TEST_MESSAGE: &str = "Airtm Monitor: This is a test message!";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    NewOffer,
    AcceptAttempt,
    AcceptOutcome,
    Test,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyAction {
    pub text: String,
    pub callback_data: String,
}

/// Channel-neutral notice; each channel renders it in its own markup.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub offer_id: Option<String>,
    pub icon: &'static str,
    pub title: String,
    pub fields: Vec<(String, String)>,
    pub footer: Option<String>,
    pub actions: Vec<ReplyAction>,
}

impl Notice {
    fn new(kind: NoticeKind, icon: &'static str, title: impl Into<String>) -> Self {
        Self {
            kind,
            offer_id: None,
            icon,
            title: title.into(),
            fields: Vec::new(),
            footer: None,
            actions: Vec::new(),
        }
    }

    fn field(mut self, label: &str, value: impl Into<String>) -> Self {
        self.fields.push((label.to_string(), value.into()));
        self
    }

    /// Plain `Label: value` lines for desktop notifications.
    pub fn plain_body(&self) -> String {
        let mut lines: Vec<String> = self
            .fields
            .iter()
            .map(|(label, value)| format!("{label}: {value}"))
            .collect();
        if let Some(footer) = &self.footer {
            lines.push(footer.clone());
        }
        lines.join("\n")
    }

    /// Telegram legacy Markdown rendering.
    pub fn markdown(&self) -> String {
        let mut text = String::new();
        if !self.icon.is_empty() {
            text.push_str(self.icon);
            text.push(' ');
        }
        text.push('*');
        text.push_str(&escape_markdown(&self.title));
        text.push('*');
        if !self.fields.is_empty() {
            text.push_str("\n\n");
            for (label, value) in &self.fields {
                text.push_str(&format!("*{label}:* {}\n", escape_markdown(value)));
            }
        }
        if let Some(footer) = &self.footer {
            text.push('\n');
            text.push_str(&escape_markdown(footer));
        }
        text.trim_end().to_string()
    }
}

/// Escapes the characters legacy Markdown treats as entity delimiters.
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '_' | '*' | '[' | '`') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn amount_text(offer: &OfferRecord) -> String {
    format!("{} {}", offer.amount, offer.currency)
}

pub fn new_offer_notice(offer: &OfferRecord, usd_to_egp: Option<f64>) -> Notice {
    let mut notice = Notice::new(NoticeKind::NewOffer, "🔔", NEW_OFFER_TITLE)
        .field("Payment Method", offer.payment_method().unwrap_or("N/A"))
        .field("Amount", amount_text(offer));

    if let Some(rate) = usd_to_egp.filter(|r| r.is_finite() && *r > 0.0) {
        if offer.is_dollar_denominated() {
            notice = notice.field("Estimated Price", format!("{:.2} EGP", offer.amount * rate));
        }
    }
    if offer.rate_known() {
        notice = notice.field("Rate", format!("{:.4}", offer.rate));
    }

    notice.offer_id = Some(offer.id.clone());
    notice.footer = Some(format!("Offer ID (Internal): ...{}", offer.short_id()));
    notice.actions = vec![
        ReplyAction {
            text: "Accept Manually (Remote)".into(),
            callback_data: format!("accept_offer_{}", offer.id),
        },
        ReplyAction {
            text: "Ignore".into(),
            callback_data: format!("ignore_offer_{}", offer.id),
        },
    ];
    notice
}

pub fn accept_attempt_notice(offer: &OfferRecord) -> Notice {
    let mut notice = Notice::new(NoticeKind::AcceptAttempt, "🤖", "Attempting AUTO-ACCEPTANCE")
        .field("Method", offer.payment_method().unwrap_or("N/A"))
        .field("Amount", amount_text(offer))
        .field("Offer ID", format!("...{}", offer.short_id()));
    notice.offer_id = Some(offer.id.clone());
    notice
}

pub fn accept_outcome_notice(offer_id: &str, mode: AcceptMode, result: &AcceptResult) -> Notice {
    let (icon, title) = match (mode, result.success) {
        (AcceptMode::Auto, true) => ("🤖✅", "Auto-acceptance SUCCEEDED"),
        (AcceptMode::Auto, false) => ("🤖❌", "Auto-acceptance FAILED"),
        (AcceptMode::Remote, true) => ("✅", "Remotely initiated acceptance SUCCEEDED"),
        (AcceptMode::Remote, false) => ("❌", "Remotely initiated acceptance FAILED"),
    };
    let mut notice = Notice::new(NoticeKind::AcceptOutcome, icon, title)
        .field("Offer ID", format!("...{}", short_id(offer_id)));
    if !result.success {
        let detail = if result.detail.is_empty() {
            "No details"
        } else {
            result.detail.as_str()
        };
        notice = notice.field("Detail", detail);
    }
    notice.offer_id = Some(offer_id.to_string());
    notice
}

pub fn test_notice(message: Option<&str>) -> Notice {
    let message = message
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_TEST_MESSAGE);
    Notice::new(NoticeKind::Test, "", message)
}
