//! HTTP implementation of the remote contact-center API.

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use secrecy::ExposeSecret;
use serde_json::{Value, json};
use url::Url;

use super::{AccessKeyGrant, ApiReply, ContactCenterApi, flatten_transcript};
use crate::auth::Credential;
use crate::config::RemoteConfig;
use crate::error::{ApiError, AuthError};
use async_trait::async_trait;

/// Reqwest-backed client for the contact-center API.
pub struct HttpContactCenter {
    client: Client,
    config: RemoteConfig,
}

impl HttpContactCenter {
    pub fn new(config: RemoteConfig) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }

    /// Versioned service base derived from the discovered endpoint.
    fn service_url(&self, credential: &Credential, path: &str) -> Result<Url, ApiError> {
        let base = format!(
            "{}/inContactAPI/services/{}{}",
            credential.api_endpoint.trim_end_matches('/'),
            self.config.api_version,
            path,
        );
        Url::parse(&base).map_err(|e| ApiError::InvalidBody {
            operation: "service-url",
            reason: format!("unusable api endpoint {}: {}", credential.api_endpoint, e),
        })
    }

    fn authed(&self, builder: RequestBuilder, credential: &Credential) -> RequestBuilder {
        builder
            .header(AUTHORIZATION, credential.authorization())
            .header(ACCEPT, "*/*")
            .header(CONTENT_TYPE, "application/json")
    }

    /// Run one request and fold the outcome into an [`ApiReply`].
    ///
    /// Any response with a body comes back as a reply carrying the
    /// upstream status (error bodies wrapped under `error`); an empty
    /// body is the canonical recoverable-empty 204. Only bodiless
    /// connection-level failures become [`ApiError::Transport`].
    async fn execute(
        &self,
        operation: &'static str,
        builder: RequestBuilder,
    ) -> Result<ApiReply, ApiError> {
        let response = builder.send().await.map_err(|e| ApiError::Transport {
            operation,
            reason: e.to_string(),
        })?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| ApiError::Transport {
            operation,
            reason: format!("failed reading body: {e}"),
        })?;

        if text.trim().is_empty() {
            return Ok(ApiReply::no_messages());
        }

        let parsed: Value =
            serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.clone()));
        let body = if status >= 400 {
            json!({ "error": parsed })
        } else {
            parsed
        };

        Ok(ApiReply { code: status, body })
    }
}

#[async_trait]
impl ContactCenterApi for HttpContactCenter {
    async fn obtain_access_key(&self) -> Result<AccessKeyGrant, AuthError> {
        let response = self
            .client
            .post(&self.config.auth_url)
            .header(CONTENT_TYPE, "application/json")
            .json(&json!({
                "accessKeyId": self.config.access_key_id,
                "accessKeySecret": self.config.access_key_secret.expose_secret(),
            }))
            .send()
            .await
            .map_err(|e| AuthError::Request {
                endpoint: self.config.auth_url.clone(),
                reason: e.to_string(),
            })?;

        let body: Value = response.json().await.map_err(|e| AuthError::Request {
            endpoint: self.config.auth_url.clone(),
            reason: format!("unusable identity payload: {e}"),
        })?;

        AccessKeyGrant::from_body(&body)
    }

    async fn discover_endpoint(
        &self,
        access_token: &str,
        token_type: &str,
    ) -> Result<String, AuthError> {
        let response = self
            .client
            .get(&self.config.discovery_url)
            .header(AUTHORIZATION, format!("{} {}", token_type, access_token))
            .send()
            .await
            .map_err(|e| AuthError::Request {
                endpoint: self.config.discovery_url.clone(),
                reason: e.to_string(),
            })?;

        let body: Value = response.json().await.map_err(|e| AuthError::Request {
            endpoint: self.config.discovery_url.clone(),
            reason: format!("unusable discovery payload: {e}"),
        })?;

        body.get("api_endpoint")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(AuthError::DiscoveryFailed)
    }

    async fn hours_of_operation(
        &self,
        credential: &Credential,
        profile_id: Option<&str>,
    ) -> Result<ApiReply, ApiError> {
        let mut url = self.service_url(credential, "/hours-of-operation")?;
        if let Some(profile_id) = profile_id {
            url.query_pairs_mut()
                .append_pair("profileIdHoursOperation", profile_id);
        }
        self.execute(
            "hours-of-operation",
            self.authed(self.client.get(url), credential),
        )
        .await
    }

    async fn agents_availability(
        &self,
        credential: &Credential,
        fields: Option<&str>,
        top: Option<&str>,
    ) -> Result<ApiReply, ApiError> {
        let mut url = self.service_url(credential, "/agents/states")?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(fields) = fields.filter(|f| !f.is_empty()) {
                pairs.append_pair("fields", fields);
            }
            if let Some(top) = top.filter(|t| !t.is_empty()) {
                pairs.append_pair("top", top);
            }
        }
        self.execute(
            "agents-availability",
            self.authed(self.client.get(url), credential),
        )
        .await
    }

    async fn chat_profile(
        &self,
        credential: &Credential,
        point_of_contact: &str,
    ) -> Result<ApiReply, ApiError> {
        let url = self.service_url(
            credential,
            &format!("/points-of-contact/{}/chat-profile", point_of_contact),
        )?;
        self.execute("chat-profile", self.authed(self.client.get(url), credential))
            .await
    }

    async fn make_chat(
        &self,
        credential: &Credential,
        payload: &Value,
    ) -> Result<ApiReply, ApiError> {
        let url = self.service_url(credential, "/contacts/chats")?;
        self.execute(
            "make-chat",
            self.authed(self.client.post(url), credential).json(payload),
        )
        .await
    }

    async fn get_response(
        &self,
        credential: &Credential,
        chat_session_id: &str,
        timeout_secs: u64,
    ) -> Result<ApiReply, ApiError> {
        let mut url = self.service_url(credential, &format!("/contacts/chats/{chat_session_id}"))?;
        if timeout_secs > 0 {
            url.query_pairs_mut()
                .append_pair("timeout", &timeout_secs.to_string());
        }
        self.execute("get-response", self.authed(self.client.get(url), credential))
            .await
    }

    async fn send_text(
        &self,
        credential: &Credential,
        chat_session_id: &str,
        body: &Value,
    ) -> Result<ApiReply, ApiError> {
        let url = self.service_url(
            credential,
            &format!("/contacts/chats/{chat_session_id}/send-text"),
        )?;
        let payload = flatten_transcript(body);
        self.execute(
            "send-text",
            self.authed(self.client.post(url), credential).json(&payload),
        )
        .await
    }

    async fn end_chat(
        &self,
        credential: &Credential,
        chat_session_id: &str,
    ) -> Result<ApiReply, ApiError> {
        let url = self.service_url(credential, &format!("/contacts/chats/{chat_session_id}"))?;
        // The remote expects the form content type on the delete.
        self.execute(
            "end-chat",
            self.authed(self.client.delete(url), credential)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded"),
        )
        .await
    }
}
