use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const ACCEPT_ACTION: &str = "ACCEPT_OFFER";

/// Who asked for the accept. Changes notice wording and ledger leniency only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptMode {
    Auto,
    Remote,
}

impl AcceptMode {
    pub fn label(&self) -> &'static str {
        match self {
            AcceptMode::Auto => "AUTO-ACCEPT",
            AcceptMode::Remote => "Remote Command",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptResult {
    pub success: bool,
    #[serde(default)]
    pub detail: String,
}

impl AcceptResult {
    pub fn succeeded(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
        }
    }
}

/// Issues one accept instruction to whatever can click on the live offer page.
///
/// Implementations report failures in the result and never retry internally.
#[async_trait]
pub trait AcceptExecutor: Send + Sync {
    async fn execute(&self, offer_id: &str) -> AcceptResult;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AcceptInstruction<'a> {
    action: &'a str,
    offer_id: &'a str,
}

/// Executor that forwards accept instructions to the extension's page bridge.
pub struct PageBridgeExecutor {
    client: Client,
    endpoint: String,
}

impl PageBridgeExecutor {
    pub fn new(client: Client, bridge_url: &str) -> Self {
        Self {
            client,
            endpoint: format!("{}/accept", bridge_url.trim_end_matches('/')),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AcceptExecutor for PageBridgeExecutor {
    async fn execute(&self, offer_id: &str) -> AcceptResult {
        let instruction = AcceptInstruction {
            action: ACCEPT_ACTION,
            offer_id,
        };
        let response = match self.client.post(&self.endpoint).json(&instruction).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(offer_id, error = %err, "page bridge unreachable");
                return AcceptResult::failed(format!("page bridge unreachable: {err}"));
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(offer_id, %status, "page bridge rejected accept");
            return AcceptResult::failed(format!("page bridge returned {status}"));
        }

        match response.json::<AcceptResult>().await {
            Ok(result) => {
                info!(offer_id, success = result.success, detail = %result.detail, "page bridge answered");
                result
            }
            Err(err) => AcceptResult::failed(format!("malformed page bridge response: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slash() {
        let executor = PageBridgeExecutor::new(Client::new(), "http://127.0.0.1:9110/");
        assert_eq!(executor.endpoint(), "http://127.0.0.1:9110/accept");
    }

    #[test]
    fn instruction_uses_wire_names() {
        let body = serde_json::to_value(AcceptInstruction {
            action: ACCEPT_ACTION,
            offer_id: "a1",
        })
        .expect("instruction should serialize");
        assert_eq!(body, serde_json::json!({"action": "ACCEPT_OFFER", "offerId": "a1"}));
    }

    #[test]
    fn result_detail_defaults_to_empty() {
        let result: AcceptResult =
            serde_json::from_str(r#"{"success":false}"#).expect("result should parse");
        assert_eq!(result, AcceptResult::failed(""));
    }
}
