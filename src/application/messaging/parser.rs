//! Message parser - Turns raw platform text and button presses into messages

use crate::domain::entities::{Content, Message, MessageType, User};

/// Parses incoming updates into structured Message objects
pub struct MessageParser {
    command_prefix: String,
}

impl MessageParser {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            command_prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.command_prefix
    }

    /// Parse a text message
    pub fn parse(&self, chat_id: impl Into<String>, text: impl Into<String>, sender: Option<User>) -> Message {
        let text = text.into();
        let chat_id = chat_id.into();

        if text.starts_with('/') || (!self.command_prefix.is_empty() && text.starts_with(&self.command_prefix)) {
            return self.parse_command(chat_id, text, sender);
        }

        Message::new(chat_id, Content::Text(text))
            .with_message_type(MessageType::Text)
            .with_sender_opt(sender)
    }

    fn parse_command(&self, chat_id: String, text: String, sender: Option<User>) -> Message {
        let cmd_text = if let Some(rest) = text.strip_prefix('/') {
            rest
        } else {
            text.strip_prefix(self.command_prefix.as_str()).unwrap_or(&text)
        };

        let mut parts = cmd_text.split_whitespace();
        // Telegram appends @botname in groups
        let name = parts
            .next()
            .map(|n| n.split('@').next().unwrap_or(n))
            .unwrap_or("")
            .to_string();
        let args = parts.map(str::to_string).collect();

        Message::new(chat_id, Content::Command { name, args })
            .with_message_type(MessageType::Command)
            .with_sender_opt(sender)
    }

    /// Parse a callback query (inline button press)
    pub fn parse_callback(
        &self,
        chat_id: impl Into<String>,
        callback_id: impl Into<String>,
        data: impl Into<String>,
        sender: Option<User>,
    ) -> Message {
        Message::from_callback(chat_id, data)
            .with_id(callback_id)
            .with_sender_opt(sender)
    }
}

impl Message {
    /// Helper to set sender as Option
    pub fn with_sender_opt(mut self, user: Option<User>) -> Self {
        if let Some(u) = user {
            self.sender = Some(u);
        }
        self
    }

    pub fn with_message_type(mut self, mt: MessageType) -> Self {
        self.message_type = mt;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_with_args() {
        let parser = MessageParser::new("!");
        let msg = parser.parse("1", "/start ref_42 extra", None);

        assert_eq!(msg.message_type, MessageType::Command);
        assert_eq!(
            msg.content,
            Content::Command { name: "start".into(), args: vec!["ref_42".into(), "extra".into()] }
        );
    }

    #[test]
    fn test_parse_custom_prefix_and_bot_suffix() {
        let parser = MessageParser::new("!");
        let msg = parser.parse("1", "!help", None);
        assert!(msg.content.is_command());

        let msg = parser.parse("1", "/help@shop_bot", None);
        assert_eq!(msg.content, Content::Command { name: "help".into(), args: vec![] });
    }

    #[test]
    fn test_parse_plain_text() {
        let parser = MessageParser::new("/");
        let msg = parser.parse("1", "hello", Some(User::new("7")));

        assert_eq!(msg.content.text(), Some("hello"));
        assert_eq!(msg.sender.map(|u| u.id), Some("7".to_string()));
    }

    #[test]
    fn test_parse_callback_keeps_query_id() {
        let parser = MessageParser::new("/");
        let msg = parser.parse_callback("1", "cbq-9", "mod:alpha:go", None);

        assert!(msg.is_callback());
        assert_eq!(msg.id, "cbq-9");
        assert_eq!(msg.content.callback_data(), Some("mod:alpha:go"));
    }
}
