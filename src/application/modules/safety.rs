//! Failure isolation for module handler groups

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use crate::application::errors::BotError;
use crate::application::messaging::{Context, Middleware, MiddlewareError, MiddlewareResult, Next};

/// Longest error text kept in the registry and sent to admins
pub const ERROR_TEXT_LIMIT: usize = 180;

/// Where handler faults are reported
pub trait FaultReporter: Send + Sync {
    /// Flag the module as failed with `message`
    fn record_fault(&self, module_id: &str, message: &str) -> Result<(), BotError>;

    /// Chat ids to notify about faults
    fn admin_ids(&self) -> Vec<String>;
}

/// Cut `text` to at most `limit` characters
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Wraps a module's handlers: keeps other modules' callbacks out and turns
/// handler failures into an `error` status plus an admin notification.
pub struct SafetyMiddleware {
    module_id: String,
    reporter: Arc<dyn FaultReporter>,
}

impl SafetyMiddleware {
    pub fn new(module_id: impl Into<String>, reporter: Arc<dyn FaultReporter>) -> Self {
        Self {
            module_id: module_id.into(),
            reporter,
        }
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// Callback payloads must be scoped `<id>:` or `mod:<id>:`
    pub fn is_allowed_callback(&self, data: &str) -> bool {
        let data = data.trim();
        if data.is_empty() {
            return false;
        }
        data.starts_with(&format!("{}:", self.module_id))
            || data.starts_with(&format!("mod:{}:", self.module_id))
    }

    async fn handle_fault(&self, ctx: &Context, error: String) {
        tracing::error!("Module handler error ({}): {}", self.module_id, error);

        let message = truncate_chars(&error, ERROR_TEXT_LIMIT);
        if let Err(e) = self.reporter.record_fault(&self.module_id, &message) {
            tracing::warn!("Failed to record fault for {}: {}", self.module_id, e);
        }

        let Some(bot) = ctx.bot.as_ref() else {
            return;
        };
        let text = format!(
            "⚠️ Module error: <b>{}</b>\nCause: <code>{}</code>",
            self.module_id, message
        );
        for admin_id in self.reporter.admin_ids() {
            if let Err(e) = bot.send_message(&admin_id, &text).await {
                tracing::debug!("Admin notification to {} failed: {}", admin_id, e);
            }
        }
    }
}

#[async_trait]
impl Middleware for SafetyMiddleware {
    async fn process(&self, ctx: Context, next: Next) -> MiddlewareResult {
        if ctx.message.is_callback() {
            let data = ctx.message.content.callback_data().unwrap_or("");
            if !self.is_allowed_callback(data) {
                return Err(MiddlewareError::Skipped);
            }
        }

        let snapshot = ctx.clone();
        let outcome = AssertUnwindSafe(next.run(ctx)).catch_unwind().await;

        let error = match outcome {
            Ok(Ok(ctx)) => return Ok(ctx),
            Ok(Err(MiddlewareError::Handler(msg))) | Ok(Err(MiddlewareError::Internal(msg))) => msg,
            Ok(Err(other)) => return Err(other),
            Err(panic) => panic_message(panic.as_ref()),
        };

        self.handle_fault(&snapshot, error).await;
        Ok(snapshot)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
