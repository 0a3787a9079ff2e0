//! Role-tagged chat messages and transcript rendering.
//!
//! Inbound requests carry a list of system/user/assistant messages. The
//! agent CLIs consume a single flattened prompt, so the transcript is
//! rendered with role prefixes joined by blank lines.

use serde::{Deserialize, Serialize};

/// Marker inserted when image-analysis context is spliced into a message.
pub(crate) const ANALYSIS_CONTEXT_MARKER: &str = "[Image Analysis Context:";

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "System"),
            Self::User => write!(f, "User"),
            Self::Assistant => write!(f, "Assistant"),
        }
    }
}

/// Renders messages into a single role-prefixed prompt body.
///
/// System messages are hoisted into a front block, keeping their relative
/// order. If the conversation does not end with a user turn, a
/// continuation nudge is appended so the agent knows it is expected to
/// respond.
pub(crate) fn render_transcript(messages: &[ChatMessage]) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(messages.len());
    let mut rest: Vec<String> = Vec::new();

    for msg in messages {
        let rendered = format!("{}: {}", msg.role, msg.content);
        if msg.role == Role::System {
            parts.push(rendered);
        } else {
            rest.push(rendered);
        }
    }
    parts.append(&mut rest);

    let mut transcript = parts.join("\n\n");

    if matches!(messages.last(), Some(m) if m.role != Role::User) {
        transcript.push_str("\n\nUser: Please continue.");
    }

    transcript
}

/// Concatenates all message content for format detection.
pub(crate) fn combined_text(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Returns true if any message carries spliced-in image-analysis context.
pub(crate) fn has_analysis_context(messages: &[ChatMessage]) -> bool {
    messages.iter().any(|m| {
        m.content.contains(ANALYSIS_CONTEXT_MARKER)
            || (m.role == Role::System && m.content.to_lowercase().contains("image analysis"))
    })
}

/// Content words (5+ letters) from the latest user message, lowercased.
/// Used by the suspicious-output heuristic in retry classification.
pub(crate) fn request_terms(messages: &[ChatMessage]) -> Vec<String> {
    let Some(last_user) = messages.iter().rev().find(|m| m.role == Role::User) else {
        return Vec::new();
    };

    let mut terms: Vec<String> = last_user
        .content
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 5)
        .map(str::to_lowercase)
        .collect();
    terms.sort();
    terms.dedup();
    terms
}
