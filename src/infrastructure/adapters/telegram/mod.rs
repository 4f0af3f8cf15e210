//! Telegram adapter

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

use crate::application::errors::BotError;
use crate::application::messaging::{Dispatcher, MessageParser};
use crate::domain::entities;
use crate::domain::traits::{Bot, BotInfo, KeyboardButton};

/// Telegram API base URL
const API_BASE: &str = "https://api.telegram.org";

/// Long-poll timeout for getUpdates, in seconds
const POLL_TIMEOUT: i64 = 30;

/// Telegram update type
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

impl User {
    fn to_entity(&self) -> entities::User {
        let mut user = entities::User::new(self.id.to_string());
        user.username = self.username.clone();
        user.first_name = self.first_name.clone();
        user
    }
}

impl Update {
    /// Convert to a dispatcher message. Updates without text or callback
    /// data (stickers, joins, ...) yield `None`.
    pub fn to_message(&self, parser: &MessageParser) -> Option<entities::Message> {
        if let Some(msg) = &self.message {
            let text = msg.text.as_deref()?;
            let sender = msg.from.as_ref().map(User::to_entity);
            return Some(
                parser
                    .parse(msg.chat.id.to_string(), text, sender)
                    .with_platform("telegram"),
            );
        }

        if let Some(cb) = &self.callback_query {
            let data = cb.data.as_deref()?;
            // Fall back to the presser's private chat when the source message is gone
            let chat_id = cb
                .message
                .as_ref()
                .map(|m| m.chat.id)
                .unwrap_or(cb.from.id)
                .to_string();
            return Some(
                parser
                    .parse_callback(chat_id, cb.id.clone(), data, Some(cb.from.to_entity()))
                    .with_platform("telegram"),
            );
        }

        None
    }
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Deserialize)]
struct MessageResult {
    message_id: i64,
}

#[derive(Serialize)]
struct InlineKeyboardButton {
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

#[derive(Serialize)]
struct ReplyMarkup {
    inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<ReplyMarkup>,
}

/// Telegram bot adapter
pub struct TelegramAdapter {
    token: String,
    client: Client,
    info: RwLock<BotInfo>,
}

impl TelegramAdapter {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            client: Client::new(),
            info: RwLock::new(BotInfo {
                id: "unknown".to_string(),
                name: "shop-bot".to_string(),
                username: "shop_bot".to_string(),
            }),
        }
    }

    /// Get the API URL for a method
    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", API_BASE, self.token, method)
    }

    async fn call<B: Serialize + ?Sized, T: for<'de> Deserialize<'de>>(&self, method: &str, body: &B) -> Result<T, BotError> {
        let response = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| BotError::Network(e.to_string()))?;

        let status = response.status();
        let data: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| BotError::Parse(e.to_string()))?;

        match (data.ok, data.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(BotError::Network(format!(
                "Telegram API error ({}): {}",
                status,
                data.description.unwrap_or_else(|| "no description".to_string())
            ))),
        }
    }

    /// Fetch bot info from Telegram API
    pub async fn fetch_bot_info(&self) -> Result<BotInfo, BotError> {
        #[derive(Deserialize)]
        struct BotInfoResponse {
            id: i64,
            first_name: String,
            username: String,
        }

        let me: BotInfoResponse = self.call("getMe", &serde_json::json!({})).await?;
        let info = BotInfo {
            id: me.id.to_string(),
            name: me.first_name,
            username: me.username,
        };
        *self.info.write().unwrap_or_else(PoisonError::into_inner) = info.clone();
        Ok(info)
    }

    /// Get updates from Telegram using getUpdates API
    pub async fn get_updates(&self, offset: i64, timeout: i64) -> Result<Vec<Update>, BotError> {
        #[derive(Serialize)]
        struct GetUpdatesRequest {
            offset: i64,
            timeout: i64,
            allowed_updates: Vec<String>,
        }

        let request = GetUpdatesRequest {
            offset,
            timeout,
            allowed_updates: vec!["message".to_string(), "callback_query".to_string()],
        };
        self.call("getUpdates", &request).await
    }

    /// Get the next update offset
    pub fn get_next_offset(updates: &[Update], current: i64) -> i64 {
        updates
            .iter()
            .map(|u| u.update_id + 1)
            .max()
            .unwrap_or(current)
    }

    /// Send with HTML formatting, falling back to plain text
    async fn send(&self, chat_id: &str, text: &str, reply_markup: Option<ReplyMarkup>) -> Result<String, BotError> {
        let request = SendMessageRequest {
            chat_id,
            text,
            parse_mode: Some("HTML"),
            reply_markup,
        };
        let sent: Result<MessageResult, BotError> = self.call("sendMessage", &request).await;
        let sent = match sent {
            Ok(sent) => sent,
            Err(e) => {
                tracing::warn!("HTML send failed, using plain text: {}", e);
                let plain = SendMessageRequest {
                    parse_mode: None,
                    ..request
                };
                self.call("sendMessage", &plain).await?
            }
        };
        Ok(sent.message_id.to_string())
    }

    /// Register bot commands with Telegram
    pub async fn register_commands(&self) -> Result<(), BotError> {
        #[derive(Serialize)]
        struct Command {
            command: &'static str,
            description: &'static str,
        }

        let commands = [
            Command { command: "start", description: "Start the bot" },
            Command { command: "help", description: "Show help message" },
            Command { command: "version", description: "Show bot version" },
        ];

        let _: bool = self
            .call("setMyCommands", &serde_json::json!({ "commands": commands }))
            .await?;
        tracing::info!("Registered bot commands with Telegram");
        Ok(())
    }

    /// Long-poll updates and feed them to the dispatcher until the task is cancelled
    pub async fn run(self: Arc<Self>, dispatcher: Arc<Dispatcher>) -> Result<(), BotError> {
        let info = self.fetch_bot_info().await?;
        tracing::info!("Bot started: @{}", info.username);

        if let Err(e) = self.register_commands().await {
            tracing::warn!("Failed to register commands: {}", e);
        }

        let mut offset: i64 = 0;
        tracing::info!("Starting message loop...");

        loop {
            match self.get_updates(offset, POLL_TIMEOUT).await {
                Ok(updates) => {
                    if !updates.is_empty() {
                        tracing::debug!("Received {} updates", updates.len());
                    }
                    for update in &updates {
                        let Some(message) = update.to_message(dispatcher.parser()) else {
                            continue;
                        };
                        let outcome = dispatcher.feed(message.clone()).await;
                        super::deliver(self.as_ref(), &message, outcome).await;
                    }
                    offset = Self::get_next_offset(&updates, offset);
                }
                Err(e) => {
                    tracing::error!("Failed to get updates: {}", e);
                    tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
                }
            }
        }
    }
}

#[async_trait]
impl Bot for TelegramAdapter {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<String, BotError> {
        tracing::debug!("Sending to {}: {}", chat_id, text);
        self.send(chat_id, text, None).await
    }

    async fn send_with_keyboard(&self, chat_id: &str, text: &str, buttons: Vec<Vec<KeyboardButton>>) -> Result<String, BotError> {
        tracing::debug!("Sending with keyboard to {}: {}", chat_id, text);

        let inline_keyboard = buttons
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|btn| InlineKeyboardButton {
                        text: btn.text,
                        callback_data: btn.callback_data,
                        url: btn.url,
                    })
                    .collect()
            })
            .collect();

        self.send(chat_id, text, Some(ReplyMarkup { inline_keyboard })).await
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<(), BotError> {
        #[derive(Serialize)]
        struct AnswerRequest<'a> {
            callback_query_id: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            text: Option<&'a str>,
        }

        let _: bool = self
            .call(
                "answerCallbackQuery",
                &AnswerRequest {
                    callback_query_id: callback_id,
                    text,
                },
            )
            .await?;
        Ok(())
    }

    fn bot_info(&self) -> BotInfo {
        self.info.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{Content, MessageType};

    fn parse_update(json: &str) -> Update {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_text_update_becomes_command() {
        let parser = MessageParser::new("/");
        let update = parse_update(
            r#"{"update_id": 7, "message": {"message_id": 1, "from": {"id": 42, "username": "buyer"},
                "chat": {"id": 42}, "text": "/start@shop_bot"}}"#,
        );

        let message = update.to_message(&parser).unwrap();
        assert_eq!(message.chat_id, "42");
        assert_eq!(message.message_type, MessageType::Command);
        assert_eq!(message.platform, "telegram");
        assert_eq!(message.sender.unwrap().username.as_deref(), Some("buyer"));
    }

    #[test]
    fn test_callback_update_keeps_query_id() {
        let parser = MessageParser::new("/");
        let update = parse_update(
            r#"{"update_id": 8, "callback_query": {"id": "cb-1", "from": {"id": 42},
                "message": {"message_id": 3, "chat": {"id": -100}}, "data": "mod:example_module:ping"}}"#,
        );

        let message = update.to_message(&parser).unwrap();
        assert!(message.is_callback());
        assert_eq!(message.id, "cb-1");
        assert_eq!(message.chat_id, "-100");
        assert_eq!(message.content, Content::CallbackData("mod:example_module:ping".into()));
    }

    #[test]
    fn test_update_without_payload_is_skipped() {
        let parser = MessageParser::new("/");
        let update = parse_update(r#"{"update_id": 9, "message": {"message_id": 4, "chat": {"id": 1}}}"#);
        assert!(update.to_message(&parser).is_none());
    }

    #[test]
    fn test_next_offset() {
        let updates = vec![
            parse_update(r#"{"update_id": 10}"#),
            parse_update(r#"{"update_id": 12}"#),
        ];
        assert_eq!(TelegramAdapter::get_next_offset(&updates, 0), 13);
        assert_eq!(TelegramAdapter::get_next_offset(&[], 13), 13);
    }
}
