//! # saatva-companion
//!
//! The wellness chat companion: a keyword-rule [`Responder`] and a
//! [`Conversation`] that posts its replies after a short simulated
//! thinking delay.

pub mod conversation;
pub mod error;
pub mod responder;

pub use conversation::{ChatMessage, Conversation, GREETING, PendingReply, Sender, ThinkingDelay};
pub use error::{CompanionError, Result};
pub use responder::{GENERAL_REPLIES, Responder, TOPICS, Topic};
