//! Console adapter for development/testing
//!
//! Lines starting with `cb:` are treated as inline button presses, so module
//! callbacks can be exercised without Telegram.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::application::errors::BotError;
use crate::application::messaging::Dispatcher;
use crate::domain::entities::{Message, User};
use crate::domain::traits::{Bot, BotInfo, KeyboardButton};

pub const CONSOLE_CHAT_ID: &str = "console";
const CALLBACK_PREFIX: &str = "cb:";

/// Console bot adapter for local development
pub struct ConsoleAdapter {
    info: BotInfo,
}

impl ConsoleAdapter {
    pub fn new() -> Self {
        Self {
            info: BotInfo {
                id: "console".to_string(),
                name: "shop-bot".to_string(),
                username: "console".to_string(),
            },
        }
    }

    /// Turn one input line into an update
    pub fn parse_line(dispatcher: &Dispatcher, line: &str, seq: u64) -> Option<Message> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let sender = Some(User::new(CONSOLE_CHAT_ID).with_username("console"));
        let message = match line.strip_prefix(CALLBACK_PREFIX) {
            Some(data) => dispatcher.parser().parse_callback(
                CONSOLE_CHAT_ID,
                format!("console-cb-{}", seq),
                data.trim(),
                sender,
            ),
            None => dispatcher.parser().parse(CONSOLE_CHAT_ID, line, sender),
        };
        Some(message.with_platform("console"))
    }

    /// Read stdin until EOF, feeding every line to the dispatcher
    pub async fn run(self: Arc<Self>, dispatcher: Arc<Dispatcher>) -> Result<(), BotError> {
        tracing::info!("Starting console bot (dev mode)");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut seq = 0u64;

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| BotError::Internal(format!("stdin: {}", e)))?
        {
            seq += 1;
            let Some(message) = Self::parse_line(&dispatcher, &line, seq) else {
                continue;
            };
            let outcome = dispatcher.feed(message.clone()).await;
            super::deliver(self.as_ref(), &message, outcome).await;
        }

        tracing::info!("Console input closed");
        Ok(())
    }
}

impl Default for ConsoleAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bot for ConsoleAdapter {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<String, BotError> {
        println!("[BOT -> {}] {}", chat_id, text);
        Ok("console_msg".to_string())
    }

    async fn send_with_keyboard(&self, chat_id: &str, text: &str, buttons: Vec<Vec<KeyboardButton>>) -> Result<String, BotError> {
        println!("[BOT -> {}] {}", chat_id, text);
        for row in buttons {
            let row_text: Vec<String> = row.iter().map(|b| b.text.clone()).collect();
            println!("  [Buttons] {}", row_text.join(" | "));
        }
        Ok("console_msg".to_string())
    }

    async fn answer_callback(&self, _callback_id: &str, _text: Option<&str>) -> Result<(), BotError> {
        Ok(())
    }

    fn bot_info(&self) -> BotInfo {
        self.info.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{Content, MessageType};

    #[test]
    fn test_parse_line_command_and_callback() {
        let dispatcher = Dispatcher::new("root", "/");

        let cmd = ConsoleAdapter::parse_line(&dispatcher, "/start now", 1).unwrap();
        assert_eq!(cmd.message_type, MessageType::Command);
        assert_eq!(cmd.platform, "console");

        let cb = ConsoleAdapter::parse_line(&dispatcher, "cb: mod:example_module:ping", 2).unwrap();
        assert!(cb.is_callback());
        assert_eq!(cb.id, "console-cb-2");
        assert_eq!(cb.content, Content::CallbackData("mod:example_module:ping".into()));

        assert!(ConsoleAdapter::parse_line(&dispatcher, "   ", 3).is_none());
    }
}
