//! Escalation of a bot conversation into a live agent chat.
//!
//! [`gate`] authorizes the escalation, [`EscalationEngine`] creates the
//! chat and drives the [`ChatStateMachine`] from polled messages and
//! timers, and everything user-visible flows out through the
//! [`ConversationSurface`] seam.

mod engine;
pub mod gate;
mod machine;
mod surface;

pub use engine::EscalationEngine;
pub use gate::{DenialReason, GateDecision, authorize_escalation};
pub use machine::{ChatState, ChatStateMachine, Effect, EndReason};
pub use surface::{ConversationSurface, SystemNotice, TrackingEvent, TranscriptEntry};
