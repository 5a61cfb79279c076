//! Home Assistant REST client
//!
//! - `GET {base}/api/states/{entity}` to read the entity state
//! - `POST {base}/api/services/input_boolean/{action}` to flip it
//!
//! Both requests carry a long-lived access token as bearer auth.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

use super::{Action, StateBridge};

const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
const HTTP_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Client for one `input_boolean` entity
pub struct HassClient {
    http: Client,
    base_url: String,
    token: String,
    entity_id: String,
}

/// State reported for an entity that has none yet
const UNKNOWN_STATE: &str = "unknown";

#[derive(Debug, Deserialize)]
struct EntityState {
    /// `None` when the key is absent, `Some(None)` when it is `null`
    #[serde(default, deserialize_with = "present")]
    state: Option<Option<String>>,
}

fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Serialize)]
struct ServiceCall<'a> {
    entity_id: &'a str,
}

impl HassClient {
    /// Create a client for `entity_id` on the instance at `base_url`
    pub fn new(
        base_url: &str,
        token: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
            .user_agent(concat!("ts3-mute-bridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Configuration(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
            entity_id: entity_id.into(),
        })
    }

    fn state_url(&self) -> String {
        format!("{}/api/states/{}", self.base_url, self.entity_id)
    }

    fn service_url(&self, action: Action) -> String {
        format!("{}/api/services/input_boolean/{}", self.base_url, action)
    }
}

#[async_trait]
impl StateBridge for HassClient {
    async fn get_state(&self) -> Result<String> {
        let response = self
            .http
            .get(self.state_url())
            .bearer_auth(&self.token)
            .send()
            .await?;
        let response = ensure_success(response, "reading entity state")?;

        let body: EntityState = response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("malformed state response: {e}")))?;

        let state = body
            .state
            .ok_or_else(|| Error::Transport("state not found in the response".into()))?
            .unwrap_or_else(|| UNKNOWN_STATE.to_string());
        debug!(entity = %self.entity_id, %state, "entity state read");
        Ok(state)
    }

    async fn set_state(&self, action: Action) -> Result<()> {
        let response = self
            .http
            .post(self.service_url(action))
            .bearer_auth(&self.token)
            .json(&ServiceCall {
                entity_id: &self.entity_id,
            })
            .send()
            .await?;
        ensure_success(response, "calling input_boolean service")?;

        debug!(entity = %self.entity_id, %action, "service called");
        Ok(())
    }
}

fn ensure_success(response: Response, context: &str) -> Result<Response> {
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Transport(format!(
            "{context}: HTTP {} - {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown error")
        )));
    }
    Ok(response)
}
