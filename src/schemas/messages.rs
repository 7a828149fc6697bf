use std::fmt;

use serde::{Deserialize, Serialize};

use super::MessageType;

/// Struct `Message` represents a chat message sent to an LLM provider.
///
/// # Usage
/// ```rust,ignore
/// let human_message = Message::new_human_message("Hello");
/// let system_message = Message::new_system_message("System Alert");
/// ```
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct Message {
    pub content: String,
    pub message_type: MessageType,
}

impl Message {
    pub fn new<T: fmt::Display>(message_type: MessageType, content: T) -> Self {
        Message {
            content: content.to_string(),
            message_type,
        }
    }

    pub fn new_system_message<T: fmt::Display>(content: T) -> Self {
        Message::new(MessageType::System, content)
    }

    pub fn new_human_message<T: fmt::Display>(content: T) -> Self {
        Message::new(MessageType::Human, content)
    }

    pub fn new_ai_message<T: fmt::Display>(content: T) -> Self {
        Message::new(MessageType::Ai, content)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.message_type, self.content)
    }
}

/// Builds the message list for an `llm` step: optional system prompt first,
/// then the rendered prompt as a human message.
pub fn messages_from_prompt(system: Option<&str>, prompt: &str) -> Vec<Message> {
    let mut messages = Vec::new();
    if let Some(system) = system {
        if !system.is_empty() {
            messages.push(Message::new_system_message(system));
        }
    }
    messages.push(Message::new_human_message(prompt));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_from_prompt() {
        let messages = messages_from_prompt(Some("be brief"), "hello");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].message_type, MessageType::System);
        assert_eq!(messages[1].content, "hello");

        let messages = messages_from_prompt(None, "hello");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_type, MessageType::Human);
    }
}
