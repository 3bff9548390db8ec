//! Middleware bridging a chatbot widget with a contact-center live chat.
//!
//! The crate has two faces:
//!
//! - the [`gateway`]: a thin HTTP pass-through in front of the remote
//!   contact-center API, handling per-session credentials so the widget
//!   never sees them;
//! - the [`escalation`] engine: the client-side lifecycle of one
//!   escalated chat (availability gating, chat creation, message polling,
//!   teardown), embeddable behind any [`escalation::ConversationSurface`].
//!
//! Both sit on the same core: [`auth`] for the credential lifecycle,
//! [`session`] for per-identity state, [`remote`] for the fixed remote
//! operation set, and [`bridge`] for the pass-through operations.

pub mod auth;
pub mod bridge;
pub mod config;
pub mod error;
pub mod escalation;
pub mod gateway;
pub mod remote;
pub mod session;

pub use error::{Error, Result};
