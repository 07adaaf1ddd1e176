//! Messages posted by the web layer and the two of them the sync core acts on.

use serde::Deserialize;
use serde_json::{Value, json};

use crate::analytics::{self, AnalyticsEvent};
use crate::collector::Collector;
use crate::credentials::CredentialStore;
use crate::error::SyncResult;

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BridgeMessage {
    pub body: Option<String>,
    pub promise_id: Option<i64>,
    /// Kept raw so an incomplete token payload does not reject the envelope.
    pub datamation_response: Option<Value>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatamationResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(rename = "dataMationID")]
    pub datamation_id: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum BridgeCommand {
    EnablePush,
    DisablePush,
    EnableBiometric,
    DisableBiometric,
    EnableHealthKit,
    /// `None` when the payload was missing or incomplete.
    ReceiveHealthKitTokens(Option<DatamationResponse>),
    DeviceInfo,
    Unknown(String),
}

impl BridgeMessage {
    pub fn parse(raw: &[u8]) -> SyncResult<Self> {
        Ok(serde_json::from_slice(raw)?)
    }

    /// The command and its promise id; `None` unless both are present.
    pub fn command(&self) -> Option<(i64, BridgeCommand)> {
        let body = self.body.as_deref()?;
        let promise_id = self.promise_id?;
        let command = match body {
            "enablePush" => BridgeCommand::EnablePush,
            "disablePush" => BridgeCommand::DisablePush,
            "enableBiometric" => BridgeCommand::EnableBiometric,
            "disableBiometric" => BridgeCommand::DisableBiometric,
            "enableAHK" => BridgeCommand::EnableHealthKit,
            "receiveAHKtokens" => BridgeCommand::ReceiveHealthKitTokens(
                self.datamation_response
                    .as_ref()
                    .and_then(|v| DatamationResponse::deserialize(v).ok()),
            ),
            "deviceInfo" => BridgeCommand::DeviceInfo,
            other => BridgeCommand::Unknown(other.to_string()),
        };
        Some((promise_id, command))
    }
}

/// Script the host evaluates to settle the web layer's promise.
pub fn resolve_promise_script(promise_id: i64, value: &Value) -> String {
    format!("window.resolvePromise({promise_id}, {value})")
}

#[derive(Clone, Debug, PartialEq)]
pub enum BridgeReply {
    /// Evaluate this script in the web view.
    Resolve(String),
    /// Belongs to the host shell, not the sync core.
    Unhandled(i64, BridgeCommand),
    /// Missing body or promise id.
    Ignored,
}

#[derive(Clone)]
pub struct BridgeDispatcher {
    credentials: CredentialStore,
    collector: Collector,
}

impl BridgeDispatcher {
    pub fn new(credentials: CredentialStore, collector: Collector) -> Self {
        Self {
            credentials,
            collector,
        }
    }

    pub async fn dispatch(&self, message: &BridgeMessage) -> SyncResult<BridgeReply> {
        let Some((promise_id, command)) = message.command() else {
            tracing::debug!("bridge message without command");
            return Ok(BridgeReply::Ignored);
        };
        tracing::debug!(promise_id, ?command, "bridge command");

        match command {
            BridgeCommand::ReceiveHealthKitTokens(Some(tokens)) => {
                self.credentials
                    .save_bridge_tokens(&tokens.access_token, &tokens.refresh_token, &tokens.datamation_id)
                    .await?;
                tracing::info!("health sync tokens received");
                Ok(BridgeReply::Resolve(resolve_promise_script(promise_id, &json!(true))))
            }
            BridgeCommand::ReceiveHealthKitTokens(None) => {
                tracing::warn!(promise_id, "receiveAHKtokens without a complete datamationResponse");
                Ok(BridgeReply::Ignored)
            }
            BridgeCommand::EnableHealthKit => {
                let authorized = self.collector.request_authorization_and_fetch().await?.is_some();
                if authorized {
                    analytics::track(&AnalyticsEvent::HealthKitEnabled);
                }
                Ok(BridgeReply::Resolve(resolve_promise_script(promise_id, &json!(authorized))))
            }
            other => Ok(BridgeReply::Unhandled(promise_id, other)),
        }
    }
}
