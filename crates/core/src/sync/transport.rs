use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    controller::{
        ClaimOutcome, ControllerError, ControllerState, HandoffRequest, HandoffResolution, Role,
    },
    error::SyncError,
    models::{Game, NextLineBuffer},
    session::DeviceIdentity,
};

/// Acknowledgement for a stored full-state push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushReceipt {
    pub status: String,
    pub game_id: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

/// Channel between a device and the synchronization service.
///
/// Implementations must not block; every call is awaited from a periodic
/// loop that may be cancelled between calls.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Store the full match state as a new version.
    async fn push_game(&self, game: &Game) -> Result<PushReceipt, SyncError>;

    /// Latest stored state, `None` when the service has never seen the game.
    async fn pull_game(&self, game_id: &str) -> Result<Option<Game>, SyncError>;

    async fn pull_next_line(&self, game_id: &str) -> Result<Option<NextLineBuffer>, SyncError>;

    async fn push_next_line(&self, game_id: &str, line: &NextLineBuffer) -> Result<(), SyncError>;

    async fn controller_state(&self, game_id: &str) -> Result<ControllerState, SyncError>;

    async fn claim(
        &self,
        game_id: &str,
        role: Role,
        device: &DeviceIdentity,
    ) -> Result<ClaimOutcome, SyncError>;

    async fn request_handoff(
        &self,
        game_id: &str,
        role: Role,
        device: &DeviceIdentity,
    ) -> Result<HandoffRequest, SyncError>;

    async fn respond_to_handoff(
        &self,
        game_id: &str,
        request_id: u64,
        device: &DeviceIdentity,
        accept: bool,
    ) -> Result<HandoffResolution, SyncError>;

    async fn release(&self, game_id: &str, role: Role, device: &DeviceIdentity)
        -> Result<(), SyncError>;

    /// Keep a held role from going stale.
    async fn ping(&self, game_id: &str, role: Role, device: &DeviceIdentity)
        -> Result<(), SyncError>;
}

/// Body of every controller call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerRequest {
    pub user_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept: Option<bool>,
}

impl ControllerRequest {
    fn from_device(device: &DeviceIdentity) -> Self {
        Self {
            user_id: device.id.clone(),
            display_name: device.display_name.clone(),
            role: None,
            request_id: None,
            accept: None,
        }
    }

    fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }
}

/// JSON over HTTP against the sync service.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    client: Client,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SyncError> {
        let client = Client::builder().timeout(timeout).gzip(true).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn controller_call<T: DeserializeOwned>(
        &self,
        game_id: &str,
        action: &str,
        body: &ControllerRequest,
    ) -> Result<T, SyncError> {
        let url = self.url(&format!("/games/{game_id}/controller/{action}"));
        trace!(%url, "controller call");
        let response = self.client.post(&url).json(body).send().await?;
        decode(response).await
    }
}

/// Body of a successful response, or the matching error.
///
/// A 409 carrying a controller rejection is surfaced as that rejection.
async fn read_body(response: Response) -> Result<String, SyncError> {
    let status = response.status();
    let body = response.text().await?;
    if status == StatusCode::CONFLICT {
        if let Ok(rejection) = serde_json::from_str::<ControllerError>(&body) {
            return Err(rejection.into());
        }
    }
    if !status.is_success() {
        return Err(SyncError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, SyncError> {
    let body = read_body(response).await?;
    Ok(serde_json::from_str(&body)?)
}

async fn decode_optional<T: DeserializeOwned>(response: Response) -> Result<Option<T>, SyncError> {
    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    decode(response).await.map(Some)
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn push_game(&self, game: &Game) -> Result<PushReceipt, SyncError> {
        let url = self.url(&format!("/games/{}/sync", game.id));
        let response = self.client.post(&url).json(game).send().await?;
        let receipt: PushReceipt = decode(response).await?;
        debug!(game_id = %receipt.game_id, version = %receipt.version, "game pushed");
        Ok(receipt)
    }

    async fn pull_game(&self, game_id: &str) -> Result<Option<Game>, SyncError> {
        let response = self
            .client
            .get(self.url(&format!("/games/{game_id}")))
            .send()
            .await?;
        decode_optional(response).await
    }

    async fn pull_next_line(&self, game_id: &str) -> Result<Option<NextLineBuffer>, SyncError> {
        let response = self
            .client
            .get(self.url(&format!("/games/{game_id}/next-line")))
            .send()
            .await?;
        decode_optional(response).await
    }

    async fn push_next_line(&self, game_id: &str, line: &NextLineBuffer) -> Result<(), SyncError> {
        let response = self
            .client
            .put(self.url(&format!("/games/{game_id}/next-line")))
            .json(line)
            .send()
            .await?;
        read_body(response).await.map(|_| ())
    }

    async fn controller_state(&self, game_id: &str) -> Result<ControllerState, SyncError> {
        let response = self
            .client
            .get(self.url(&format!("/games/{game_id}/controller")))
            .send()
            .await?;
        Ok(decode_optional(response).await?.unwrap_or_default())
    }

    async fn claim(
        &self,
        game_id: &str,
        role: Role,
        device: &DeviceIdentity,
    ) -> Result<ClaimOutcome, SyncError> {
        let body = ControllerRequest::from_device(device).with_role(role);
        self.controller_call(game_id, "claim", &body).await
    }

    async fn request_handoff(
        &self,
        game_id: &str,
        role: Role,
        device: &DeviceIdentity,
    ) -> Result<HandoffRequest, SyncError> {
        let body = ControllerRequest::from_device(device).with_role(role);
        self.controller_call(game_id, "handoff", &body).await
    }

    async fn respond_to_handoff(
        &self,
        game_id: &str,
        request_id: u64,
        device: &DeviceIdentity,
        accept: bool,
    ) -> Result<HandoffResolution, SyncError> {
        let body = ControllerRequest {
            request_id: Some(request_id),
            accept: Some(accept),
            ..ControllerRequest::from_device(device)
        };
        self.controller_call(game_id, "respond", &body).await
    }

    async fn release(
        &self,
        game_id: &str,
        role: Role,
        device: &DeviceIdentity,
    ) -> Result<(), SyncError> {
        let body = ControllerRequest::from_device(device).with_role(role);
        self.controller_call::<serde_json::Value>(game_id, "release", &body)
            .await
            .map(|_| ())
    }

    async fn ping(&self, game_id: &str, role: Role, device: &DeviceIdentity) -> Result<(), SyncError> {
        let body = ControllerRequest::from_device(device).with_role(role);
        self.controller_call::<serde_json::Value>(game_id, "ping", &body)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalised() {
        let transport = HttpTransport::new("http://localhost:8000/", Duration::from_secs(5)).unwrap();
        assert_eq!(transport.base_url(), "http://localhost:8000");
        assert_eq!(transport.url("/games/g1"), "http://localhost:8000/games/g1");
    }

    #[test]
    fn controller_request_omits_unset_fields() {
        let device = DeviceIdentity::new("d1", "Phone");
        let body = ControllerRequest::from_device(&device).with_role(Role::LineCoach);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["userId"], "d1");
        assert_eq!(json["role"], "lineCoach");
        assert!(json.get("requestId").is_none());
    }

    #[test]
    fn push_receipt_matches_service_shape() {
        let receipt: PushReceipt = serde_json::from_str(
            r#"{"status":"synced","game_id":"g1","version":"2024-05-01T10-00-00-000","timestamp":"2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(receipt.status, "synced");
        assert_eq!(receipt.game_id, "g1");
    }
}
