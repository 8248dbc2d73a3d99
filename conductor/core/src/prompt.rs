//! Prompt Assembly
//!
//! Builds the message list sent to a provider from the system prompt,
//! retrieval context, recent history and the new user message.

use crate::messages::MessageRole;
use crate::provider::ChatMessage;
use crate::store::StoredMessage;

/// Default system prompt
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Answer clearly and concisely.";

/// Compose the prompt for one job
///
/// The system message carries the context when there is any. Stored system
/// turns are skipped; the current system prompt always wins.
#[must_use]
pub fn assemble_prompt(
    system_prompt: &str,
    context: &str,
    history: &[StoredMessage],
    user_message: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);

    let context = context.trim();
    let system = if context.is_empty() {
        system_prompt.to_string()
    } else {
        format!("{system_prompt}\n\nUse the following context when it is relevant:\n\n{context}")
    };
    messages.push(ChatMessage::system(system));

    messages.extend(
        history
            .iter()
            .filter(|turn| turn.role != MessageRole::System)
            .map(|turn| ChatMessage::new(turn.role, turn.content.clone())),
    );

    messages.push(ChatMessage::user(user_message));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn turn(role: MessageRole, content: &str) -> StoredMessage {
        StoredMessage {
            id: content.to_string(),
            conversation_id: "c".into(),
            user_id: None,
            role,
            content: content.to_string(),
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_plain_prompt() {
        let messages = assemble_prompt("sys", "", &[], "hi");
        assert_eq!(messages, vec![ChatMessage::system("sys"), ChatMessage::user("hi")]);
    }

    #[test]
    fn test_context_goes_into_system_message() {
        let messages = assemble_prompt("sys", "  the sky is blue ", &[], "why?");
        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.starts_with("sys\n\n"));
        assert!(messages[0].content.ends_with("the sky is blue"));
    }

    #[test]
    fn test_history_between_system_and_user() {
        let history = vec![
            turn(MessageRole::User, "q1"),
            turn(MessageRole::System, "old rules"),
            turn(MessageRole::Assistant, "a1"),
        ];
        let messages = assemble_prompt("sys", "", &history, "q2");
        assert_eq!(
            messages,
            vec![
                ChatMessage::system("sys"),
                ChatMessage::user("q1"),
                ChatMessage::assistant("a1"),
                ChatMessage::user("q2"),
            ]
        );
    }
}
