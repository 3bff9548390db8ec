//! Escalation engine: drives one chat from authorization to teardown.
//!
//! Owns the state machine, the no-agents timer, and the poll loop for a
//! single conversation identity. Timers and the loop are real tasks held
//! by handle, so cancellation is an abort, never a dangling callback: a
//! cancelled loop cannot schedule another cycle or mutate a reused
//! session slot.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::gate::{self, DenialReason, GateDecision};
use super::machine::{ChatState, ChatStateMachine, Effect, EndReason};
use super::surface::{ConversationSurface, SystemNotice, TrackingEvent};
use crate::bridge::Bridge;
use crate::config::EscalationConfig;
use crate::error::{ApiError, Error};
use crate::remote::{ApiReply, parse_messages};
use crate::session::{CHAT_ACTIVE_VALUE, SessionIdentity, SessionStore, keys};

#[derive(Default)]
struct TaskHandles {
    poll: Option<JoinHandle<()>>,
    no_agents: Option<JoinHandle<()>>,
}

/// Orchestrates one escalated chat for one conversation identity.
pub struct EscalationEngine {
    bridge: Arc<Bridge>,
    surface: Arc<dyn ConversationSurface>,
    store: Arc<dyn SessionStore>,
    config: EscalationConfig,
    identity: SessionIdentity,
    machine: Mutex<ChatStateMachine>,
    tasks: Mutex<TaskHandles>,
    /// Self-handle for spawning the timer and poll tasks.
    me: std::sync::Weak<EscalationEngine>,
}

impl EscalationEngine {
    pub fn new(
        bridge: Arc<Bridge>,
        surface: Arc<dyn ConversationSurface>,
        store: Arc<dyn SessionStore>,
        identity: SessionIdentity,
        config: EscalationConfig,
    ) -> Arc<Self> {
        let machine = ChatStateMachine::new(config.out_of_time_detection.clone());
        Arc::new_cyclic(|me| Self {
            bridge,
            surface,
            store,
            config,
            identity,
            machine: Mutex::new(machine),
            tasks: Mutex::new(TaskHandles::default()),
            me: me.clone(),
        })
    }

    fn self_handle(&self) -> Option<Arc<Self>> {
        self.me.upgrade()
    }

    pub async fn state(&self) -> ChatState {
        self.machine.lock().await.state()
    }

    pub async fn end_reason(&self) -> Option<EndReason> {
        self.machine.lock().await.end_reason()
    }

    /// Check hours and availability, then escalate if allowed.
    ///
    /// Denials are normal negative outcomes: the user gets an explanation
    /// and the conversation stays with the bot.
    pub async fn request_escalation(&self, payload: Value) -> GateDecision {
        let decision = gate::authorize_escalation(&self.bridge, &self.identity, &self.config).await;
        match decision {
            GateDecision::Allowed => self.escalate(payload).await,
            GateDecision::Denied(reason) => {
                let notice = match reason {
                    DenialReason::Closed => SystemNotice::OperationClosed,
                    DenialReason::OutOfHours => SystemNotice::OutOfHours,
                    DenialReason::NoAgents => SystemNotice::NoAgents,
                };
                self.surface.system_notice(notice).await;
                if reason == DenialReason::NoAgents {
                    self.surface.track(TrackingEvent::ChatNoAgents).await;
                }
                self.surface.typing_indicator(false).await;
                self.surface.set_input_enabled(true).await;
            }
        }
        decision
    }

    /// Create the chat and start waiting for an agent.
    async fn escalate(&self, payload: Value) {
        let effects = self.machine.lock().await.begin_escalation();
        self.run_effects(effects, false).await;

        self.spawn_no_agents_timer().await;

        // Avatar lookup; never blocks the escalation.
        if let Some(point_of_contact) = payload.get("pointOfContact").and_then(Value::as_str) {
            self.fetch_agent_profile(point_of_contact).await;
        }

        match self.bridge.make_chat(&self.identity, &payload).await {
            Ok(reply) if reply.is_success() => {
                match reply.body.get("chatSessionId").and_then(Value::as_str) {
                    Some(chat_session_id) => {
                        let waiting = {
                            let mut machine = self.machine.lock().await;
                            machine.chat_created(chat_session_id);
                            machine.should_poll()
                        };
                        // The no-agents timer can end the chat while the
                        // creation call is in flight; nothing to start then.
                        if waiting {
                            self.store
                                .set(
                                    &self.identity,
                                    keys::CHAT_ACTIVE,
                                    CHAT_ACTIVE_VALUE.to_string(),
                                )
                                .await;
                            self.store
                                .set(
                                    &self.identity,
                                    keys::CHAT_SESSION_ID,
                                    chat_session_id.to_string(),
                                )
                                .await;
                            tracing::info!(chat_session_id, "Chat created, waiting for agent");
                            self.spawn_poll_loop().await;
                        }
                    }
                    None => {
                        tracing::warn!("Chat creation reply carried no chatSessionId");
                        let effects = self.machine.lock().await.remote_error(reply.code);
                        self.run_effects(effects, false).await;
                    }
                }
            }
            Ok(reply) => {
                let effects = self.machine.lock().await.remote_error(reply.code);
                self.run_effects(effects, false).await;
            }
            Err(e) => {
                tracing::warn!("Chat creation failed: {e}");
                let effects = self.machine.lock().await.remote_error(0);
                self.run_effects(effects, false).await;
            }
        }
    }

    /// Pick up a chat that was live before a page reload: adopt the stored
    /// session id and resume polling without re-escalating.
    pub async fn resume_if_active(&self) -> bool {
        let active = self.store.get(&self.identity, keys::CHAT_ACTIVE).await;
        if active.as_deref() != Some(CHAT_ACTIVE_VALUE) {
            return false;
        }
        let Some(chat_session_id) = self.store.get(&self.identity, keys::CHAT_SESSION_ID).await
        else {
            return false;
        };

        tracing::info!(%chat_session_id, "Resuming live chat after reload");
        self.machine.lock().await.resume(chat_session_id);
        if let Some(point_of_contact) = self.config.point_of_contact.clone() {
            self.fetch_agent_profile(&point_of_contact).await;
        }
        self.spawn_poll_loop().await;
        true
    }

    /// Record the chatbot conversation id. A different id than the stored
    /// one means this client belongs to a new conversation, so the stale
    /// chat markers are dropped before any resume can adopt them.
    pub async fn note_conversation_id(&self, conversation_id: &str) {
        let stored = self.store.get(&self.identity, keys::CONVERSATION_ID).await;
        if stored.as_deref() == Some(conversation_id) {
            return;
        }
        if stored.is_some() {
            self.store.delete(&self.identity, keys::CHAT_ACTIVE).await;
            self.store
                .delete(&self.identity, keys::CHAT_SESSION_ID)
                .await;
        }
        self.store
            .set(
                &self.identity,
                keys::CONVERSATION_ID,
                conversation_id.to_string(),
            )
            .await;
    }

    /// Remember the name the user gave during escalation; used as the
    /// author label on relayed messages and transcripts.
    pub async fn note_user_display_name(&self, name: &str) {
        self.store
            .set(&self.identity, keys::USER_DISPLAY_NAME, name.to_string())
            .await;
    }

    /// Route one user message into the live chat. Quietly ignored when no
    /// chat session is open.
    pub async fn send_user_message(&self, text: &str) {
        let chat_session_id = {
            let machine = self.machine.lock().await;
            machine.chat_session_id().map(str::to_string)
        };
        let Some(chat_session_id) = chat_session_id else {
            return;
        };

        let label = self
            .store
            .get(&self.identity, keys::USER_DISPLAY_NAME)
            .await
            .unwrap_or_else(|| self.config.default_user_name.clone());
        let body = json!({ "label": label, "message": text });
        if let Err(e) = self
            .bridge
            .send_text(&self.identity, &chat_session_id, &body)
            .await
        {
            tracing::warn!("Failed to relay user message: {e}");
        }
    }

    /// The user closed the chat from the conversation side.
    pub async fn close_by_user(&self) {
        let effects = self.machine.lock().await.closed_by_user();
        self.run_effects(effects, false).await;
    }

    /// The conversation session itself reset: drop all pending timers.
    pub async fn reset(&self) {
        let mut tasks = self.tasks.lock().await;
        if let Some(handle) = tasks.poll.take() {
            handle.abort();
        }
        if let Some(handle) = tasks.no_agents.take() {
            handle.abort();
        }
    }

    async fn spawn_no_agents_timer(&self) {
        let Some(engine) = self.self_handle() else {
            return;
        };
        let handle = tokio::spawn(async move {
            tokio::time::sleep(engine.config.agent_wait_timeout).await;
            let effects = engine.machine.lock().await.no_agents_timeout();
            engine.run_effects(effects, false).await;
        });
        if let Some(previous) = self.tasks.lock().await.no_agents.replace(handle) {
            previous.abort();
        }
    }

    async fn spawn_poll_loop(&self) {
        let Some(engine) = self.self_handle() else {
            return;
        };
        let handle = tokio::spawn(async move {
            engine.poll_loop().await;
        });
        if let Some(previous) = self.tasks.lock().await.poll.replace(handle) {
            previous.abort();
        }
    }

    /// Fetch new messages while the chat is waiting or active. Each cycle
    /// fully applies its batch, in arrival order, before the next one is
    /// scheduled; the loop exits as soon as the machine goes terminal.
    async fn poll_loop(self: Arc<Self>) {
        loop {
            let chat_session_id = {
                let machine = self.machine.lock().await;
                if !machine.should_poll() {
                    return;
                }
                match machine.chat_session_id() {
                    Some(id) => id.to_string(),
                    None => return,
                }
            };

            let outcome = self
                .bridge
                .get_response(
                    &self.identity,
                    &chat_session_id,
                    self.config.message_wait_secs,
                )
                .await;
            let effects = self.digest_poll_outcome(outcome).await;
            self.run_effects(effects, true).await;

            let live_id = {
                let machine = self.machine.lock().await;
                if !machine.should_poll() {
                    return;
                }
                machine.chat_session_id().map(str::to_string)
            };
            // Keep the reload-recovery key tracking the live id.
            if let Some(id) = live_id {
                self.store
                    .set(&self.identity, keys::CHAT_SESSION_ID, id)
                    .await;
            }

            tokio::time::sleep(self.config.poll_think_time).await;
        }
    }

    async fn digest_poll_outcome(&self, outcome: Result<ApiReply, Error>) -> Vec<Effect> {
        let mut machine = self.machine.lock().await;
        match outcome {
            Ok(reply) if reply.is_recoverable_empty() => {
                machine.poll_succeeded(Utc::now());
                Vec::new()
            }
            // 204 is the canonical recoverable-empty signal; a stray 304
            // slipping past the client edge is flagged, not fatal.
            Ok(reply) if reply.code == 304 => {
                tracing::warn!("Poll returned non-canonical 304, treating as empty");
                machine.poll_succeeded(Utc::now());
                Vec::new()
            }
            Ok(reply) if reply.code == 404 => machine.remote_gone(),
            Ok(reply) if reply.is_success() => {
                machine.poll_succeeded(Utc::now());
                if let Some(id) = reply.body.get("chatSession").and_then(Value::as_str) {
                    machine.adopt_chat_session_id(id);
                }
                let mut effects = Vec::new();
                for message in parse_messages(&reply.body) {
                    effects.extend(machine.apply_message(&message));
                }
                effects
            }
            Ok(reply) => machine.remote_error(reply.code),
            Err(Error::Api(ApiError::Transport { .. })) => machine.transport_failure(),
            Err(e) => {
                tracing::warn!("Poll cycle failed: {e}");
                machine.remote_error(0)
            }
        }
    }

    /// Execute the machine's effects. `from_poll` marks calls made from
    /// inside the poll task itself, where stopping means returning from
    /// the loop rather than aborting our own handle.
    async fn run_effects(&self, effects: Vec<Effect>, from_poll: bool) {
        for effect in effects {
            match effect {
                Effect::Notice(notice) => self.surface.system_notice(notice).await,
                Effect::AgentMessage(text) => self.surface.agent_message(&text).await,
                Effect::Typing(active) => self.surface.typing_indicator(active).await,
                Effect::SetInput(enabled) => self.surface.set_input_enabled(enabled).await,
                Effect::Track(event) => self.surface.track(event).await,
                Effect::FlushTranscript => self.flush_transcript().await,
                Effect::CancelNoAgentsTimer => {
                    if let Some(handle) = self.tasks.lock().await.no_agents.take() {
                        handle.abort();
                    }
                }
                Effect::StopPolling => {
                    if !from_poll {
                        if let Some(handle) = self.tasks.lock().await.poll.take() {
                            handle.abort();
                        }
                    }
                }
                Effect::EndRemoteChat(chat_session_id) => {
                    if let Err(e) = self.bridge.end_chat(&self.identity, &chat_session_id).await {
                        tracing::warn!("Failed to end remote chat: {e}");
                    }
                }
                Effect::ClearSessionKeys => {
                    self.store.delete(&self.identity, keys::CHAT_ACTIVE).await;
                    self.store
                        .delete(&self.identity, keys::CHAT_SESSION_ID)
                        .await;
                    self.store
                        .delete(&self.identity, keys::CONVERSATION_ID)
                        .await;
                    // The credential dies with the chat.
                    self.bridge.forget_credentials(&self.identity).await;
                }
            }
        }
    }

    /// Send the bot conversation so far to the agent as one transcript
    /// message (the remote side flattens it).
    async fn flush_transcript(&self) {
        let chat_session_id = {
            let machine = self.machine.lock().await;
            machine.chat_session_id().map(str::to_string)
        };
        let Some(chat_session_id) = chat_session_id else {
            return;
        };

        let transcript = self.surface.conversation_transcript().await;
        if transcript.is_empty() {
            return;
        }

        let guest = self
            .store
            .get(&self.identity, keys::USER_DISPLAY_NAME)
            .await
            .unwrap_or_else(|| self.config.default_user_name.clone());
        let messages: Vec<Value> = transcript
            .iter()
            .map(|entry| json!({ "user": entry.user, "message": entry.message }))
            .collect();
        let body = json!({
            "messages": messages,
            "assistant": self.config.default_chatbot_name,
            "guest": guest,
            "system": self.config.default_system_name,
            "transcriptConversationText": self.config.transcript_title,
        });

        if let Err(e) = self
            .bridge
            .send_text(&self.identity, &chat_session_id, &body)
            .await
        {
            tracing::warn!("Failed to flush transcript: {e}");
        }
    }

    async fn fetch_agent_profile(&self, point_of_contact: &str) {
        match self.bridge.chat_profile(&self.identity, point_of_contact).await {
            Ok(reply) if reply.is_success() => {
                let Some(profiles) = reply.body.get("chatProfile").and_then(Value::as_object)
                else {
                    return;
                };
                for profile in profiles.values() {
                    if let Some(hero) = profile.get("heroImage").and_then(Value::as_str)
                        && !hero.is_empty()
                    {
                        self.surface.agent_profile(hero).await;
                        break;
                    }
                }
            }
            Ok(_) => {}
            Err(e) => tracing::debug!("Chat profile lookup failed: {e}"),
        }
    }
}
