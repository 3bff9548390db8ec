//! Lifecycle of one escalated chat.
//!
//! The machine is pure: it consumes polled messages, timer expirations,
//! and failure reports, mutates its own state, and hands back the effects
//! the engine must execute. All the I/O (surface callbacks, remote calls,
//! timer handles) stays in the engine, which keeps every transition
//! directly testable.

use chrono::{DateTime, Utc};

use super::surface::{SystemNotice, TrackingEvent};
use crate::remote::ChatMessage;

/// Control-channel text the remote sends when the session is over.
const SESSION_ENDED_SENTINEL: &str = "$Localized:ChatSessionEnded";

/// Scripted system question the remote opens with; never worth replaying.
const CANNED_GREETING: &str = "Hello, what is your name?";

/// Lifecycle states of one escalated chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    Idle,
    Escalating,
    WaitingForAgent,
    Active,
    Ended,
}

/// Why the chat reached [`ChatState::Ended`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The no-agents timer fired before an agent picked up.
    NoAgents,
    /// The remote signalled the agent/session is gone.
    AgentLeft,
    /// Repeated transport failures while polling.
    Disconnected,
    /// An agent/system message carried the out-of-time phrase.
    OutOfTime,
    /// Explicitly closed from the conversation side.
    ClosedByUser,
    /// A non-recoverable remote error code.
    RemoteError,
}

/// Work the engine must perform after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Notice(SystemNotice),
    AgentMessage(String),
    Typing(bool),
    SetInput(bool),
    Track(TrackingEvent),
    /// Send the buffered bot transcript to the agent side.
    FlushTranscript,
    /// Abort the pending no-agents timer.
    CancelNoAgentsTimer,
    /// Stop the poll loop; no further cycle may be scheduled.
    StopPolling,
    /// Close the given chat on the remote side.
    EndRemoteChat(String),
    /// Remove the active-flag/session-id keys from the session store.
    ClearSessionKeys,
}

/// State machine for one escalated chat session.
#[derive(Debug)]
pub struct ChatStateMachine {
    state: ChatState,
    end_reason: Option<EndReason>,
    chat_session_id: Option<String>,
    first_question: Option<String>,
    consecutive_errors: u32,
    last_poll_at: Option<DateTime<Utc>>,
    /// Phrase that means the department closed mid-chat.
    out_of_time_detection: String,
}

impl ChatStateMachine {
    pub fn new(out_of_time_detection: impl Into<String>) -> Self {
        Self {
            state: ChatState::Idle,
            end_reason: None,
            chat_session_id: None,
            first_question: None,
            consecutive_errors: 0,
            last_poll_at: None,
            out_of_time_detection: out_of_time_detection.into(),
        }
    }

    pub fn state(&self) -> ChatState {
        self.state
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.end_reason
    }

    pub fn chat_session_id(&self) -> Option<&str> {
        self.chat_session_id.as_deref()
    }

    pub fn last_poll_at(&self) -> Option<DateTime<Utc>> {
        self.last_poll_at
    }

    pub fn is_terminal(&self) -> bool {
        self.state == ChatState::Ended
    }

    /// The poll loop runs only in these states.
    pub fn should_poll(&self) -> bool {
        matches!(self.state, ChatState::WaitingForAgent | ChatState::Active)
    }

    /// External escalation request accepted; chat creation is underway.
    pub fn begin_escalation(&mut self) -> Vec<Effect> {
        self.state = ChatState::Escalating;
        self.end_reason = None;
        vec![
            Effect::Notice(SystemNotice::WaitForAgent),
            Effect::Typing(true),
            Effect::SetInput(false),
        ]
    }

    /// Chat creation returned a session id; now waiting for an agent.
    /// Inert when the chat already ended (the no-agents timer can beat a
    /// slow creation call).
    pub fn chat_created(&mut self, chat_session_id: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        self.chat_session_id = Some(chat_session_id.into());
        self.state = ChatState::WaitingForAgent;
    }

    /// Adopt a chat that was live before a page reload. No no-agents timer
    /// on this path; the agent may already be there.
    pub fn resume(&mut self, chat_session_id: impl Into<String>) {
        self.chat_session_id = Some(chat_session_id.into());
        self.state = ChatState::WaitingForAgent;
    }

    /// The remote reported a newer session id for this chat.
    pub fn adopt_chat_session_id(&mut self, chat_session_id: &str) {
        self.chat_session_id = Some(chat_session_id.to_string());
    }

    /// A poll cycle completed successfully.
    pub fn poll_succeeded(&mut self, now: DateTime<Utc>) {
        self.consecutive_errors = 0;
        self.last_poll_at = Some(now);
    }

    /// Apply one polled message. Messages within a batch must be applied
    /// in arrival order; later messages can depend on earlier ones.
    pub fn apply_message(&mut self, message: &ChatMessage) -> Vec<Effect> {
        if self.is_terminal() {
            return Vec::new();
        }

        // The out-of-time phrase in any message text ends the chat,
        // relaying the text itself.
        if let Some(text) = message.text.as_deref()
            && !self.out_of_time_detection.is_empty()
            && text.contains(&self.out_of_time_detection)
        {
            let mut effects = self.end_remote_effect();
            effects.push(Effect::AgentMessage(text.to_string()));
            effects.extend(self.end(EndReason::OutOfTime, None, true));
            return effects;
        }

        let mut effects = Vec::new();

        if message.kind.is_some() {
            match message.status.as_deref() {
                Some("Waiting") => effects.push(Effect::FlushTranscript),
                Some("Active") => effects.extend(self.agent_joined()),
                Some("Disconnected") => effects.push(Effect::StopPolling),
                _ => {}
            }
        }

        match (message.text.as_deref(), message.party_type.as_deref()) {
            (Some(text), Some("1")) | (Some(text), Some("Agent")) => {
                effects.push(Effect::Typing(false));
                effects.push(Effect::AgentMessage(text.to_string()));
            }
            (Some(text), Some("System")) => {
                if message.kind.as_deref() == Some("Ask") {
                    if text != CANNED_GREETING {
                        self.first_question = Some(text.to_string());
                    }
                } else if text == SESSION_ENDED_SENTINEL {
                    effects.extend(self.agent_left());
                }
            }
            (None, Some(_)) if message.kind.as_deref() == Some("AgentTyping") => {
                let typing = message.is_text_entered.as_deref() == Some("True")
                    || message.is_typing.as_deref() == Some("True");
                effects.push(Effect::Typing(typing));
            }
            _ => {}
        }

        effects
    }

    fn agent_joined(&mut self) -> Vec<Effect> {
        if self.state == ChatState::Active {
            return Vec::new();
        }
        self.state = ChatState::Active;

        let mut effects = vec![
            Effect::CancelNoAgentsTimer,
            Effect::Notice(SystemNotice::AgentJoined),
            Effect::Track(TrackingEvent::ChatAttended),
            Effect::Typing(false),
            Effect::SetInput(true),
        ];
        if let Some(question) = self.first_question.take() {
            effects.push(Effect::AgentMessage(question));
        }
        effects
    }

    /// The no-agents timer fired. A chat that already went Active (or
    /// ended) never reports a no-agents outcome, even though the timer was
    /// scheduled.
    pub fn no_agents_timeout(&mut self) -> Vec<Effect> {
        if !matches!(self.state, ChatState::Escalating | ChatState::WaitingForAgent) {
            return Vec::new();
        }
        let mut effects = vec![
            Effect::Notice(SystemNotice::NoAgents),
            Effect::Track(TrackingEvent::ChatNoAgents),
        ];
        effects.extend(self.end_remote_effect());
        // No enter-question prompt on this path; the no-agents notice is
        // the last word.
        effects.extend(self.end(EndReason::NoAgents, None, false));
        effects
    }

    /// A poll cycle failed at the transport level with no diagnostic body.
    /// The first failure retries on the normal schedule; the second in a
    /// row tears the session down.
    pub fn transport_failure(&mut self) -> Vec<Effect> {
        if self.is_terminal() {
            return Vec::new();
        }
        self.consecutive_errors += 1;
        if self.consecutive_errors < 2 {
            return Vec::new();
        }
        let mut effects = self.end_remote_effect();
        effects.extend(self.end(
            EndReason::Disconnected,
            Some(SystemNotice::Disconnection),
            false,
        ));
        effects
    }

    /// The remote answered 404 for the chat resource: agent/session gone.
    pub fn remote_gone(&mut self) -> Vec<Effect> {
        self.agent_left()
    }

    fn agent_left(&mut self) -> Vec<Effect> {
        if self.is_terminal() {
            return Vec::new();
        }
        self.end(EndReason::AgentLeft, Some(SystemNotice::AgentLeft), true)
    }

    /// A non-recoverable remote error code (400/401/500) while polling.
    pub fn remote_error(&mut self, code: u16) -> Vec<Effect> {
        if self.is_terminal() {
            return Vec::new();
        }
        tracing::warn!(code, "Remote error while polling, ending chat");
        let mut effects = vec![Effect::Notice(SystemNotice::GenericError)];
        effects.extend(self.end(EndReason::RemoteError, None, false));
        effects
    }

    /// The user closed the chat from the conversation side.
    pub fn closed_by_user(&mut self) -> Vec<Effect> {
        if self.is_terminal() {
            return Vec::new();
        }
        let mut effects = self.end_remote_effect();
        effects.extend(self.end(
            EndReason::ClosedByUser,
            Some(SystemNotice::ChatClosed),
            false,
        ));
        effects
    }

    /// Close-the-remote-chat effect, carrying the id before teardown
    /// clears it. Empty when no chat was ever created.
    fn end_remote_effect(&self) -> Vec<Effect> {
        self.chat_session_id
            .clone()
            .map(Effect::EndRemoteChat)
            .into_iter()
            .collect()
    }

    /// Common teardown: cancel timers, stop polling, clear local chat
    /// identifiers and the stored active markers.
    fn end(
        &mut self,
        reason: EndReason,
        notice: Option<SystemNotice>,
        enter_question: bool,
    ) -> Vec<Effect> {
        self.state = ChatState::Ended;
        self.end_reason = Some(reason);
        self.chat_session_id = None;
        self.first_question = None;

        let mut effects = vec![
            Effect::CancelNoAgentsTimer,
            Effect::StopPolling,
            Effect::ClearSessionKeys,
            Effect::Typing(false),
        ];
        if let Some(notice) = notice {
            effects.push(Effect::Notice(notice));
        }
        if enter_question {
            effects.push(Effect::Notice(SystemNotice::EnterQuestion));
        }
        effects.push(Effect::SetInput(true));
        effects
    }
}
