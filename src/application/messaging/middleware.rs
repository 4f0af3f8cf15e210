//! Middleware system for message processing pipeline

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::application::errors::BotError;
use crate::domain::entities::Message;
use crate::domain::traits::Bot;

/// Context key holding the text a handler wants sent back
pub const RESPONSE_KEY: &str = "response";

/// Context passed through middleware chain
#[derive(Clone)]
pub struct Context {
    pub message: Message,
    pub chat_id: String,
    pub user_id: Option<String>,
    pub data: HashMap<String, String>,
    /// Bot the update arrived through, if the dispatcher has one bound
    pub bot: Option<Arc<dyn Bot>>,
}

impl Context {
    pub fn new(message: Message) -> Self {
        let chat_id = message.chat_id.clone();
        let user_id = message.sender.as_ref().map(|u| u.id.clone());

        Self {
            message,
            chat_id,
            user_id,
            data: HashMap::new(),
            bot: None,
        }
    }

    pub fn with_bot(mut self, bot: Option<Arc<dyn Bot>>) -> Self {
        self.bot = bot;
        self
    }

    /// Get data from context
    pub fn get(&self, key: &str) -> Option<&String> {
        self.data.get(key)
    }

    /// Set data in context
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data.insert(key.into(), value.into());
    }

    pub fn response(&self) -> Option<&String> {
        self.get(RESPONSE_KEY)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("message", &self.message)
            .field("chat_id", &self.chat_id)
            .field("user_id", &self.user_id)
            .field("data", &self.data)
            .field("bot", &self.bot.as_ref().map(|b| b.bot_info().username))
            .finish()
    }
}

/// Result of a handler: optional reply text
pub type HandlerResult = Result<Option<String>, BotError>;

/// Async handler function type
pub type Handler = Arc<dyn Fn(Context) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Box an async closure into a [`Handler`]
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Middleware trait - processors that can intercept and modify message handling
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Process a message and optionally modify the context
    async fn process(&self, ctx: Context, next: Next) -> MiddlewareResult;
}

/// Result of middleware processing
pub type MiddlewareResult = Result<Context, MiddlewareError>;

/// Middleware errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiddlewareError {
    /// Not meant for this handler group; the dispatcher keeps propagating
    Skipped,
    /// Stop processing and reply with the given text
    Blocked(String),
    /// The handler itself returned an error
    Handler(String),
    /// Internal error
    Internal(String),
}

impl std::fmt::Display for MiddlewareError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MiddlewareError::Skipped => write!(f, "Skipped"),
            MiddlewareError::Blocked(msg) => write!(f, "Blocked: {}", msg),
            MiddlewareError::Handler(msg) => write!(f, "Handler error: {}", msg),
            MiddlewareError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for MiddlewareError {}

/// Remainder of a middleware chain, ending in the matched handler
#[derive(Clone)]
pub struct Next {
    chain: Arc<Vec<Arc<dyn Middleware>>>,
    index: usize,
    endpoint: Handler,
}

impl Next {
    pub fn new(chain: Vec<Arc<dyn Middleware>>, endpoint: Handler) -> Self {
        Self {
            chain: Arc::new(chain),
            index: 0,
            endpoint,
        }
    }

    /// Run the next middleware, or the handler once the chain is exhausted
    pub async fn run(self, mut ctx: Context) -> MiddlewareResult {
        if let Some(middleware) = self.chain.get(self.index).cloned() {
            let next = Next {
                chain: Arc::clone(&self.chain),
                index: self.index + 1,
                endpoint: Arc::clone(&self.endpoint),
            };
            return middleware.process(ctx, next).await;
        }

        match (self.endpoint)(ctx.clone()).await {
            Ok(Some(response)) => {
                ctx.set(RESPONSE_KEY, response);
                Ok(ctx)
            }
            Ok(None) => Ok(ctx),
            Err(e) => Err(MiddlewareError::Handler(e.to_string())),
        }
    }
}

/// Logging middleware for debugging
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn process(&self, ctx: Context, next: Next) -> MiddlewareResult {
        let preview = match &ctx.message.content {
            crate::domain::entities::Content::Text(text) => text.chars().take(50).collect::<String>(),
            crate::domain::entities::Content::Command { name, .. } => format!("/{}", name),
            crate::domain::entities::Content::CallbackData(data) => format!("[callback] {}", data),
            crate::domain::entities::Content::Empty => "[empty]".to_string(),
        };
        let chat_id = ctx.chat_id.clone();

        tracing::debug!("[{}] {}", chat_id, preview);

        let result = next.run(ctx).await;

        match &result {
            Ok(_) => tracing::debug!("[{}] Processed OK", chat_id),
            Err(e) => tracing::warn!("[{}] Error: {}", chat_id, e),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Message;

    struct Tag(&'static str);

    #[async_trait]
    impl Middleware for Tag {
        async fn process(&self, mut ctx: Context, next: Next) -> MiddlewareResult {
            let trail = ctx.get("trail").cloned().unwrap_or_default();
            ctx.set("trail", format!("{}{}", trail, self.0));
            next.run(ctx).await
        }
    }

    #[tokio::test]
    async fn test_chain_runs_in_order_then_handler() {
        let endpoint = handler(|ctx: Context| async move {
            Ok(ctx.get("trail").cloned())
        });
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(Tag("a")), Arc::new(Tag("b"))];

        let ctx = Context::new(Message::from_text("1", "hi"));
        let ctx = Next::new(chain, endpoint).run(ctx).await.unwrap();

        assert_eq!(ctx.response().map(String::as_str), Some("ab"));
    }

    #[tokio::test]
    async fn test_handler_error_maps_to_handler_variant() {
        let endpoint = handler(|_ctx: Context| async move {
            Err(BotError::Internal("boom".to_string()))
        });

        let ctx = Context::new(Message::from_text("1", "hi"));
        let err = Next::new(Vec::new(), endpoint).run(ctx).await.unwrap_err();

        assert_eq!(err, MiddlewareError::Handler("Internal error: boom".to_string()));
    }
}
