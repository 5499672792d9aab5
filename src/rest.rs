//! REST session/credential acquisition (§6, out of scope per §1 beyond
//! its interface): `POST {api_endpoint}/session-storage/sessions` with
//! basic auth, returning an opaque bundle of connection details.

use serde::Deserialize;

use crate::error::Result;

#[derive(Debug, Clone, Deserialize)]
pub struct SessionCredentials {
    pub jwt_token: String,
    pub control_url: String,
    pub stream_url: String,
    pub ws_url: String,
}

pub struct SessionClient {
    http: reqwest::Client,
    api_endpoint: String,
}

impl SessionClient {
    pub fn new(api_endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_endpoint: api_endpoint.into(),
        }
    }

    /// Exchange `(client_id, client_secret)` for session connection
    /// details. The response body is treated as opaque beyond the four
    /// documented fields.
    pub async fn create_session(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<SessionCredentials> {
        let url = format!("{}/session-storage/sessions", self.api_endpoint);
        let response = self
            .http
            .post(&url)
            .basic_auth(client_id, Some(client_secret))
            .send()
            .await?
            .error_for_status()?;
        let credentials = response.json::<SessionCredentials>().await?;
        Ok(credentials)
    }
}
