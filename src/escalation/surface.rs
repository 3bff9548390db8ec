//! The seam toward the chatbot widget.
//!
//! The engine never renders anything itself: everything user-visible goes
//! through [`ConversationSurface`], which the embedding chatbot SDK
//! implements. Notices are semantic; wording and translation live on the
//! surface side.

use async_trait::async_trait;

/// User-visible system notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemNotice {
    /// Escalation started, an agent is being looked for.
    WaitForAgent,
    AgentJoined,
    AgentLeft,
    NoAgents,
    /// The poll loop lost the connection and gave up.
    Disconnection,
    /// The chat was closed at the user's request.
    ChatClosed,
    /// Something went wrong upstream, invite the user to retry.
    GenericError,
    /// Prompt the user to type a new question after teardown.
    EnterQuestion,
    /// The operation is closed all day.
    OperationClosed,
    /// Outside today's opening intervals.
    OutOfHours,
}

/// Analytics events the chatbot side records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingEvent {
    ChatAttended,
    ChatNoAgents,
}

/// One entry of the bot conversation transcript.
///
/// `user` is one of the author roles (`assistant`, `guest`, `system`)
/// resolved to display labels when the transcript is flushed to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub user: String,
    pub message: String,
}

/// Callback surface of the conversation widget.
#[async_trait]
pub trait ConversationSurface: Send + Sync {
    async fn system_notice(&self, notice: SystemNotice);
    /// Show a message in the transcript as coming from the agent side.
    async fn agent_message(&self, text: &str);
    async fn typing_indicator(&self, active: bool);
    async fn set_input_enabled(&self, enabled: bool);
    /// The agent profile resolved an avatar image for the widget header.
    async fn agent_profile(&self, hero_image: &str);
    async fn track(&self, event: TrackingEvent);
    /// The bot conversation so far, oldest first.
    async fn conversation_transcript(&self) -> Vec<TranscriptEntry>;
}

#[cfg(test)]
pub mod testing {
    //! Recording surface for unit tests.

    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct RecordingSurface {
        pub events: Mutex<Vec<String>>,
        pub transcript: Mutex<Vec<TranscriptEntry>>,
    }

    impl RecordingSurface {
        pub fn new() -> Self {
            Self::default()
        }

        fn record(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }

        pub fn recorded(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        pub fn has_event(&self, needle: &str) -> bool {
            self.recorded().iter().any(|e| e == needle)
        }

        pub fn count_event(&self, needle: &str) -> usize {
            self.recorded().iter().filter(|e| *e == needle).count()
        }
    }

    #[async_trait]
    impl ConversationSurface for RecordingSurface {
        async fn system_notice(&self, notice: SystemNotice) {
            self.record(format!("notice:{notice:?}"));
        }

        async fn agent_message(&self, text: &str) {
            self.record(format!("agent:{text}"));
        }

        async fn typing_indicator(&self, active: bool) {
            self.record(format!("typing:{active}"));
        }

        async fn set_input_enabled(&self, enabled: bool) {
            self.record(format!("input:{enabled}"));
        }

        async fn agent_profile(&self, hero_image: &str) {
            self.record(format!("avatar:{hero_image}"));
        }

        async fn track(&self, event: TrackingEvent) {
            self.record(format!("track:{event:?}"));
        }

        async fn conversation_transcript(&self) -> Vec<TranscriptEntry> {
            self.transcript.lock().unwrap().clone()
        }
    }
}
