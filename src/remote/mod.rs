//! Remote contact-center API surface.
//!
//! The operation set is a fixed contract: the bridge consumes it, it does
//! not redesign it. [`ContactCenterApi`] is the seam the token layer,
//! pass-through operations, and escalation engine all talk through; the
//! HTTP implementation lives in [`http`].

pub mod http;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::auth::Credential;
use crate::error::{ApiError, AuthError};

/// One reply from the remote API: the upstream status plus the JSON body.
///
/// Structured upstream failures (4xx/5xx with a body) travel through here
/// rather than as errors; only bodiless transport failures become
/// [`ApiError`]. 204 is the canonical "no new content, keep polling"
/// signal — the HTTP layer normalizes the upstream's empty-body variants
/// into it at the edge.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiReply {
    pub code: u16,
    pub body: Value,
}

impl ApiReply {
    pub fn ok(body: Value) -> Self {
        Self { code: 200, body }
    }

    /// The canonical recoverable-empty reply.
    pub fn no_messages() -> Self {
        Self {
            code: 204,
            body: json!({ "error": "no messages" }),
        }
    }

    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            body: json!({ "error": message.into() }),
        }
    }

    /// "No new content, keep polling."
    pub fn is_recoverable_empty(&self) -> bool {
        self.code == 204
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

/// Identity endpoint grant. The raw response also carries an `id_token`,
/// which is dropped here and never stored.
#[derive(Debug, Clone)]
pub struct AccessKeyGrant {
    pub access_token: String,
    pub token_type: String,
    pub refresh_token: String,
    /// Seconds until expiry, relative to the moment of issue.
    pub expires_in: i64,
}

impl AccessKeyGrant {
    /// Parse the identity endpoint body. A grant without `access_token` or
    /// `token_type` is unusable and terminal for the current call.
    pub fn from_body(body: &Value) -> Result<Self, AuthError> {
        let access_token = body
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or(AuthError::MissingField {
                field: "access_token",
            })?;
        let token_type = body
            .get("token_type")
            .and_then(Value::as_str)
            .ok_or(AuthError::MissingField { field: "token_type" })?;

        Ok(Self {
            access_token: access_token.to_string(),
            token_type: token_type.to_string(),
            refresh_token: body
                .get("refresh_token")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            expires_in: body.get("expires_in").and_then(Value::as_i64).unwrap_or(0),
        })
    }
}

/// One polled chat message. Field names are the remote wire shape.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "Type")]
    pub kind: Option<String>,
    #[serde(rename = "Status")]
    pub status: Option<String>,
    #[serde(rename = "Text")]
    pub text: Option<String>,
    #[serde(rename = "PartyTypeValue")]
    pub party_type: Option<String>,
    #[serde(rename = "IsTextEntered")]
    pub is_text_entered: Option<String>,
    #[serde(rename = "IsTyping")]
    pub is_typing: Option<String>,
}

/// Pull the ordered message list out of a poll reply body.
pub fn parse_messages(body: &Value) -> Vec<ChatMessage> {
    body.get("messages")
        .and_then(Value::as_array)
        .map(|messages| {
            messages
                .iter()
                .filter_map(|m| serde_json::from_value(m.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Collapse a transcript-form send-text body into a single message.
///
/// The transcript form carries the full bot conversation
/// (`messages` + author labels + the transcript title); anything else
/// passes through untouched. Authors are resolved through the
/// `assistant`/`guest`/`system` labels, falling back to `Unknown`.
pub fn flatten_transcript(body: &Value) -> Value {
    let Some(obj) = body.as_object() else {
        return body.clone();
    };
    let required = [
        "messages",
        "assistant",
        "guest",
        "system",
        "transcriptConversationText",
    ];
    if required.iter().any(|k| !obj.contains_key(*k)) {
        return body.clone();
    }
    let Some(messages) = obj["messages"].as_array() else {
        return body.clone();
    };
    if messages.is_empty() {
        return body.clone();
    }

    let mut combined = String::new();
    for message in messages {
        let author = match message.get("user").and_then(Value::as_str) {
            Some(user) => obj.get(user).and_then(Value::as_str).unwrap_or("Unknown"),
            None => obj["system"].as_str().unwrap_or("Unknown"),
        };
        let text = message.get("message").and_then(Value::as_str).unwrap_or("");
        combined.push_str(&format!("<i>{}</i>: {}<br>", author, text));
    }

    json!({
        "message": combined,
        "label": obj["transcriptConversationText"],
    })
}

/// The fixed remote operation set.
#[async_trait]
pub trait ContactCenterApi: Send + Sync {
    /// Exchange the configured access key pair for a token grant.
    async fn obtain_access_key(&self) -> Result<AccessKeyGrant, AuthError>;

    /// Resolve the per-tenant API base for a fresh grant.
    async fn discover_endpoint(
        &self,
        access_token: &str,
        token_type: &str,
    ) -> Result<String, AuthError>;

    async fn hours_of_operation(
        &self,
        credential: &Credential,
        profile_id: Option<&str>,
    ) -> Result<ApiReply, ApiError>;

    async fn agents_availability(
        &self,
        credential: &Credential,
        fields: Option<&str>,
        top: Option<&str>,
    ) -> Result<ApiReply, ApiError>;

    async fn chat_profile(
        &self,
        credential: &Credential,
        point_of_contact: &str,
    ) -> Result<ApiReply, ApiError>;

    async fn make_chat(&self, credential: &Credential, payload: &Value)
    -> Result<ApiReply, ApiError>;

    /// Bounded-wait fetch of new messages for one chat session.
    async fn get_response(
        &self,
        credential: &Credential,
        chat_session_id: &str,
        timeout_secs: u64,
    ) -> Result<ApiReply, ApiError>;

    async fn send_text(
        &self,
        credential: &Credential,
        chat_session_id: &str,
        body: &Value,
    ) -> Result<ApiReply, ApiError>;

    async fn end_chat(
        &self,
        credential: &Credential,
        chat_session_id: &str,
    ) -> Result<ApiReply, ApiError>;
}


#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn grant_requires_token_and_type() {
        let body = json!({ "access_token": "T1", "expires_in": 60 });
        let err = AccessKeyGrant::from_body(&body).unwrap_err();
        assert!(matches!(
            err,
            AuthError::MissingField { field: "token_type" }
        ));

        let body = json!({
            "access_token": "T1",
            "token_type": "Bearer",
            "expires_in": 60,
            "id_token": "dropped"
        });
        let grant = AccessKeyGrant::from_body(&body).unwrap();
        assert_eq!(grant.access_token, "T1");
        assert_eq!(grant.expires_in, 60);
        assert_eq!(grant.refresh_token, "");
    }

    #[test]
    fn transcript_form_collapses_to_one_message() {
        let body = json!({
            "messages": [
                { "user": "guest", "message": "hi" },
                { "user": "assistant", "message": "hello" },
                { "message": "chat started" },
            ],
            "assistant": "Botty",
            "guest": "Ada",
            "system": "System",
            "transcriptConversationText": "Transcript Conversation",
        });

        let flat = flatten_transcript(&body);
        assert_eq!(
            flat["message"],
            "<i>Ada</i>: hi<br><i>Botty</i>: hello<br><i>System</i>: chat started<br>"
        );
        assert_eq!(flat["label"], "Transcript Conversation");
    }

    #[test]
    fn single_message_bodies_pass_through() {
        let body = json!({ "label": "Ada", "message": "hi" });
        assert_eq!(flatten_transcript(&body), body);

        // Transcript shape with an empty message list also passes through.
        let body = json!({
            "messages": [],
            "assistant": "a",
            "guest": "g",
            "system": "s",
            "transcriptConversationText": "t",
        });
        assert_eq!(flatten_transcript(&body), body);
    }

    #[test]
    fn unknown_author_label_falls_back() {
        let body = json!({
            "messages": [{ "user": "moderator", "message": "hi" }],
            "assistant": "a",
            "guest": "g",
            "system": "System",
            "transcriptConversationText": "t",
        });
        let flat = flatten_transcript(&body);
        assert_eq!(flat["message"], "<i>Unknown</i>: hi<br>");
    }

    #[test]
    fn messages_parse_in_order() {
        let body = json!({ "messages": [
            { "Type": "Chat", "Status": "Waiting" },
            { "Type": "Chat", "Status": "Active" },
        ]});
        let messages = parse_messages(&body);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].status.as_deref(), Some("Waiting"));
        assert_eq!(messages[1].status.as_deref(), Some("Active"));
    }
}
