//! Bounded conversation state for long-running investigation transcripts.
//!
//! [`ConversationBudget::trim`] keeps the newest messages that fit an
//! estimated token budget and never resumes mid tool-turn.
//! [`ConversationBudget::rollback`] rewinds a transcript to its last
//! capability request after the provider reports a context overflow, so the
//! retried turn tells the model its tool results were lost instead of
//! silently dropping them.

use std::fmt::Display;

use tracing::{debug, warn};

use crate::llm::{ChatMessage, MessageRole};

/// Fixed per-message framing cost added to every estimate.
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Average characters per token used by [`estimate_tokens`].
const CHARS_PER_TOKEN: usize = 4;

/// Rough token count of a piece of text.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Estimated provider cost of one message: role + content + requested calls
/// + framing overhead.
pub fn message_tokens(message: &ChatMessage) -> usize {
    let calls: usize = message
        .tool_calls
        .iter()
        .map(|call| estimate_tokens(&call.function.name) + estimate_tokens(&call.function.arguments))
        .sum();

    estimate_tokens(message.role.as_str())
        + estimate_tokens(&message.content)
        + calls
        + MESSAGE_OVERHEAD_TOKENS
}

/// Estimated provider cost of a whole transcript.
pub fn history_tokens(history: &[ChatMessage]) -> usize {
    history.iter().map(message_tokens).sum()
}

/// Token budget applied to a transcript before every provider call.
#[derive(Debug, Clone, Copy)]
pub struct ConversationBudget {
    token_limit: usize,
}

impl ConversationBudget {
    /// Create a budget of `token_limit` estimated tokens.
    pub fn new(token_limit: usize) -> Self {
        Self { token_limit }
    }

    /// The configured limit.
    pub fn token_limit(&self) -> usize {
        self.token_limit
    }

    /// Newest suffix of `history` that fits the budget and starts with a
    /// user message. Empty when no such suffix exists.
    pub fn trim(&self, history: &[ChatMessage]) -> Vec<ChatMessage> {
        let mut total = 0;
        let mut kept = 0;

        for message in history.iter().rev() {
            let tokens = message_tokens(message);
            if total + tokens > self.token_limit {
                break;
            }
            total += tokens;
            kept += 1;
        }

        let suffix = &history[history.len() - kept..];

        match suffix.iter().position(|m| m.role == MessageRole::User) {
            Some(start) => {
                if kept < history.len() || start > 0 {
                    debug!(
                        original = history.len(),
                        kept = suffix.len() - start,
                        token_limit = self.token_limit,
                        "Trimmed conversation history"
                    );
                }
                suffix[start..].to_vec()
            }
            None => {
                if !history.is_empty() {
                    warn!(
                        original = history.len(),
                        "No user message fits the token budget; sending empty history"
                    );
                }
                Vec::new()
            }
        }
    }

    /// Rewind `history` to its most recent assistant message that requested
    /// capability calls and answer each of those calls with `error`.
    ///
    /// Returns an empty history when no such assistant message exists.
    pub fn rollback(mut history: Vec<ChatMessage>, error: &impl Display) -> Vec<ChatMessage> {
        while let Some(message) = history.pop() {
            if message.requests_tools() {
                let error_text = error.to_string();
                let replies: Vec<ChatMessage> = message
                    .tool_calls
                    .iter()
                    .map(|call| ChatMessage::tool(call.id.clone(), error_text.clone()))
                    .collect();

                debug!(
                    kept = history.len() + 1,
                    failed_calls = replies.len(),
                    "Rolled back history to last tool request"
                );

                history.push(message);
                history.extend(replies);
                return history;
            }
        }

        warn!("No tool calls found in history; rollback emptied the transcript");
        history
    }
}
