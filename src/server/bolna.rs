//! Bolna voice agent API client

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BolnaError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Bolna API key is not configured")]
    NotConfigured,
    #[error("Missing execution ID in dial response")]
    MissingExecutionId,
}

#[derive(Clone)]
pub struct BolnaClient {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct CallRequest<'a> {
    agent_id: &'a str,
    recipient_phone_number: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    from_phone_number: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CallResponse {
    #[serde(default)]
    execution_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// Agent as configured on the provider side.
#[derive(Debug, Clone, Deserialize)]
pub struct BolnaAgent {
    pub id: String,
    #[serde(default)]
    pub agent_name: Option<String>,
}

impl BolnaClient {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn check_configured(&self) -> Result<(), BolnaError> {
        if self.api_key.is_empty() {
            return Err(BolnaError::NotConfigured);
        }
        Ok(())
    }

    async fn read<R: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<R, BolnaError> {
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(BolnaError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }
        Ok(response.json().await?)
    }

    /// Start an outbound call. Returns the execution id that every later
    /// webhook for the call will carry.
    pub async fn initiate_call(
        &self,
        agent_id: &str,
        recipient: &str,
        from: Option<&str>,
    ) -> Result<String, BolnaError> {
        self.check_configured()?;

        let request = CallRequest {
            agent_id,
            recipient_phone_number: recipient,
            from_phone_number: from,
        };

        let response = self
            .client
            .post(format!("{}/call", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let body: CallResponse = Self::read(response).await?;
        tracing::debug!("Bolna accepted call to {} ({:?})", recipient, body.status);
        body.execution_id
            .filter(|id| !id.is_empty())
            .ok_or(BolnaError::MissingExecutionId)
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<BolnaAgent, BolnaError> {
        self.check_configured()?;

        let response = self
            .client
            .get(format!("{}/v2/agent/{}", self.base_url, agent_id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        Self::read(response).await
    }
}
