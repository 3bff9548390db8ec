//! Pass-through operations against the remote contact-center API.
//!
//! Each operation authenticates through the token layer, performs one
//! remote call, and applies the small amount of response shaping the
//! chatbot side relies on (profile narrowing, team filtering, the
//! profile-absent remap). Replies keep the intended status alongside the
//! body; the gateway lifts it into the transport status.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::auth::TokenManager;
use crate::error::Error;
use crate::remote::{ApiReply, ContactCenterApi};
use crate::session::{CredentialCache, SessionIdentity, SessionStore};

/// Query parameters accepted by the agents-availability operation.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentsQuery {
    pub fields: Option<String>,
    pub top: Option<String>,
    pub team_id: Option<i64>,
}

/// The bridge core: token lifecycle plus the pass-through operation set.
pub struct Bridge {
    api: Arc<dyn ContactCenterApi>,
    tokens: TokenManager,
}

impl Bridge {
    pub fn new(
        api: Arc<dyn ContactCenterApi>,
        store: Arc<dyn SessionStore>,
        cache: Arc<dyn CredentialCache>,
    ) -> Self {
        let tokens = TokenManager::new(api.clone(), store, cache);
        Self { api, tokens }
    }

    pub async fn hours_of_operation(
        &self,
        identity: &SessionIdentity,
        profile_id: Option<&str>,
    ) -> Result<ApiReply, Error> {
        let credential = self.tokens.ensure_valid_credential(identity).await?;
        let mut reply = self.api.hours_of_operation(&credential, profile_id).await?;
        if let Some(profile_id) = profile_id {
            narrow_hours_profiles(&mut reply.body, profile_id);
        }
        Ok(reply)
    }

    pub async fn agents_availability(
        &self,
        identity: &SessionIdentity,
        query: &AgentsQuery,
    ) -> Result<ApiReply, Error> {
        let credential = self.tokens.ensure_valid_credential(identity).await?;
        let mut reply = self
            .api
            .agents_availability(&credential, query.fields.as_deref(), query.top.as_deref())
            .await?;

        if let Some(team_id) = query.team_id.filter(|&id| id > 0)
            && reply.body.get("error").is_none()
        {
            filter_agents_by_team(&mut reply.body, team_id);
        }
        Ok(reply)
    }

    /// Chat profile lookup. An upstream 400 means the point of contact has
    /// no profile configured, which is intentional absence, not an error.
    pub async fn chat_profile(
        &self,
        identity: &SessionIdentity,
        point_of_contact: &str,
    ) -> Result<ApiReply, Error> {
        let credential = self.tokens.ensure_valid_credential(identity).await?;
        let mut reply = self.api.chat_profile(&credential, point_of_contact).await?;
        if reply.code == 400 {
            reply.code = 204;
        }
        Ok(reply)
    }

    pub async fn make_chat(
        &self,
        identity: &SessionIdentity,
        payload: &Value,
    ) -> Result<ApiReply, Error> {
        let Some(obj) = payload.as_object() else {
            return Ok(param_error(None));
        };
        for required in ["pointOfContact", "fromAddress"] {
            if !obj.contains_key(required) {
                return Ok(param_error(Some(required)));
            }
        }

        let credential = self.tokens.ensure_valid_credential(identity).await?;
        Ok(self.api.make_chat(&credential, payload).await?)
    }

    pub async fn get_response(
        &self,
        identity: &SessionIdentity,
        chat_session_id: &str,
        timeout_secs: u64,
    ) -> Result<ApiReply, Error> {
        let credential = self.tokens.ensure_valid_credential(identity).await?;
        Ok(self
            .api
            .get_response(&credential, chat_session_id, timeout_secs)
            .await?)
    }

    pub async fn send_text(
        &self,
        identity: &SessionIdentity,
        chat_session_id: &str,
        body: &Value,
    ) -> Result<ApiReply, Error> {
        let credential = self.tokens.ensure_valid_credential(identity).await?;
        Ok(self
            .api
            .send_text(&credential, chat_session_id, body)
            .await?)
    }

    /// End the chat and tear down this identity's credential state, both
    /// the session slot and the shared cache file.
    pub async fn end_chat(
        &self,
        identity: &SessionIdentity,
        chat_session_id: &str,
    ) -> Result<ApiReply, Error> {
        let credential = self.tokens.ensure_valid_credential(identity).await?;
        let reply = self.api.end_chat(&credential, chat_session_id).await?;

        self.tokens.forget(identity).await;
        Ok(reply)
    }

    /// Drop this identity's credential state (session slot and shared
    /// cache entry) without a remote call.
    pub async fn forget_credentials(&self, identity: &SessionIdentity) {
        self.tokens.forget(identity).await;
    }
}

/// 417 reply for a missing/undecodable caller parameter.
pub fn param_error(name: Option<&str>) -> ApiReply {
    let message = match name {
        Some(name) => format!("Error with param: {name}"),
        None => "Error with params".to_string(),
    };
    ApiReply::error(417, message)
}

/// Reduce the profile set to the requested profile when it is present.
fn narrow_hours_profiles(body: &mut Value, profile_id: &str) {
    let Some(profiles) = body
        .get_mut("resultSet")
        .and_then(|rs| rs.get_mut("hoursOfOperationProfiles"))
        .and_then(Value::as_array_mut)
    else {
        return;
    };
    if let Some(matching) = profiles
        .iter()
        .find(|p| p.get("profileId").and_then(Value::as_str) == Some(profile_id))
        .cloned()
    {
        *profiles = vec![matching];
    }
}

/// Keep only the requested team's agent states, unless that would empty
/// the list entirely.
fn filter_agents_by_team(body: &mut Value, team_id: i64) {
    let Some(states) = body.get_mut("agentStates").and_then(Value::as_array_mut) else {
        return;
    };
    let filtered: Vec<Value> = states
        .iter()
        .filter(|agent| agent.get("teamId").and_then(Value::as_i64) == Some(team_id))
        .cloned()
        .collect();
    if !filtered.is_empty() {
        *states = filtered;
    }
}
