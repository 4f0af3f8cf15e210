//! Platform adapters
//!
//! Each adapter turns platform updates into messages for the dispatcher and
//! implements [`Bot`] so handlers and the safety layer can reply.

pub mod console;
pub mod telegram;

use crate::application::errors::BotError;
use crate::application::messaging::DispatchOutcome;
use crate::domain::entities::Message;
use crate::domain::traits::Bot;

/// Send whatever a dispatch produced back to the chat. Handled callbacks are
/// answered by their handler; the rest are answered here so the client stops
/// its spinner.
pub async fn deliver(bot: &dyn Bot, message: &Message, outcome: Result<DispatchOutcome, BotError>) {
    let (handled, reply) = match outcome {
        Ok(DispatchOutcome::Handled { response, .. }) => (true, response),
        Ok(DispatchOutcome::Unhandled) => (false, None),
        Err(e) => {
            tracing::error!("Dispatch failed for chat {}: {}", message.chat_id, e);
            (false, None)
        }
    };

    if message.is_callback() && !handled {
        if let Err(e) = bot.answer_callback(&message.id, None).await {
            tracing::warn!("Failed to answer callback {}: {}", message.id, e);
        }
    }

    if let Some(text) = reply.filter(|t| !t.is_empty()) {
        if let Err(e) = bot.send_message(&message.chat_id, &text).await {
            tracing::error!("Failed to send reply to {}: {}", message.chat_id, e);
        }
    }
}
