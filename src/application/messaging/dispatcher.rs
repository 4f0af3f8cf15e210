//! Message dispatcher - Routes updates through attached handler groups
//!
//! A [`Dispatcher`] owns an ordered list of [`HandlerGroup`]s. Groups can be
//! attached and detached while the dispatcher is running; every update takes
//! a snapshot of the list, so a detach never races an in-flight update.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use thiserror::Error;

use crate::application::errors::BotError;
use crate::domain::entities::{Content, Message};
use crate::domain::traits::Bot;
use super::middleware::{handler, Context, Handler, HandlerResult, Middleware, MiddlewareError, Next};
use super::parser::MessageParser;

/// Which updates a handler accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// `/name ...` commands
    Command(String),
    /// Callback whose payload equals the value
    CallbackEquals(String),
    /// Everything routed to the observer
    Any,
}

impl Filter {
    pub fn matches(&self, message: &Message) -> bool {
        match (self, &message.content) {
            (Filter::Any, _) => true,
            (Filter::Command(expected), Content::Command { name, .. }) => {
                expected.eq_ignore_ascii_case(name)
            }
            (Filter::CallbackEquals(expected), Content::CallbackData(data)) => data == expected,
            _ => false,
        }
    }
}

struct Route {
    filter: Filter,
    handler: Handler,
}

/// One event pipeline of a handler group: routes plus the middleware that
/// wraps whichever route matches.
#[derive(Default)]
pub struct Observer {
    routes: Vec<Route>,
    middleware: RwLock<Vec<Arc<dyn Middleware>>>,
}

impl Observer {
    fn register(&mut self, filter: Filter, handler: Handler) {
        self.routes.push(Route { filter, handler });
    }

    /// Wrap every handler of this observer with `middleware`.
    /// Middleware added first runs outermost.
    pub fn add_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.middleware
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(middleware);
    }

    /// Wrap every handler with `middleware`, outside anything added so far
    pub fn add_outer_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.middleware
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(0, middleware);
    }

    pub fn middleware_count(&self) -> usize {
        self.middleware.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn find(&self, message: &Message) -> Option<Handler> {
        self.routes
            .iter()
            .find(|route| route.filter.matches(message))
            .map(|route| Arc::clone(&route.handler))
    }

    /// Run the first matching route. `Ok(None)` means nothing here took the update.
    async fn trigger(&self, ctx: Context) -> Result<Option<Context>, MiddlewareError> {
        let Some(endpoint) = self.find(&ctx.message) else {
            return Ok(None);
        };
        let chain = self
            .middleware
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match Next::new(chain, endpoint).run(ctx).await {
            Ok(ctx) => Ok(Some(ctx)),
            Err(MiddlewareError::Skipped) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Bot-side unit of handlers a module (or the host) contributes
pub struct HandlerGroup {
    name: String,
    pub message: Observer,
    pub callback_query: Observer,
    parent: Mutex<Option<String>>,
}

impl HandlerGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: Observer::default(),
            callback_query: Observer::default(),
            parent: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn on_command<F, Fut>(mut self, command: impl Into<String>, f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.message.register(Filter::Command(command.into()), handler(f));
        self
    }

    pub fn on_callback<F, Fut>(mut self, data: impl Into<String>, f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.callback_query.register(Filter::CallbackEquals(data.into()), handler(f));
        self
    }

    pub fn on_any_callback<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.callback_query.register(Filter::Any, handler(f));
        self
    }

    /// Name of the dispatcher this group is attached to
    pub fn parent(&self) -> Option<String> {
        self.parent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_parent(&self, parent: Option<String>) {
        *self.parent.lock().unwrap_or_else(PoisonError::into_inner) = parent;
    }

    async fn propagate(&self, ctx: Context) -> Result<Option<Context>, MiddlewareError> {
        if ctx.message.is_callback() {
            self.callback_query.trigger(ctx).await
        } else {
            self.message.trigger(ctx).await
        }
    }
}

impl std::fmt::Debug for HandlerGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerGroup")
            .field("name", &self.name)
            .field("parent", &self.parent())
            .finish()
    }
}

/// Attach errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AttachError {
    #[error("Handler group '{group}' is already attached to '{parent}'")]
    AlreadyAttached { group: String, parent: String },
}

/// Outcome of feeding one update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled { group: String, response: Option<String> },
    Unhandled,
}

/// Message dispatcher - routes updates to the first handler group that takes them
pub struct Dispatcher {
    name: String,
    parser: MessageParser,
    sub_groups: RwLock<Vec<Arc<HandlerGroup>>>,
    bot: RwLock<Option<Arc<dyn Bot>>>,
}

impl Dispatcher {
    pub fn new(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parser: MessageParser::new(prefix),
            sub_groups: RwLock::new(Vec::new()),
            bot: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parser(&self) -> &MessageParser {
        &self.parser
    }

    /// Bind the bot handlers reply and notify through
    pub fn set_bot(&self, bot: Arc<dyn Bot>) {
        *self.bot.write().unwrap_or_else(PoisonError::into_inner) = Some(bot);
    }

    pub fn bot(&self) -> Option<Arc<dyn Bot>> {
        self.bot.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Attach a handler group. A group can only have one parent at a time.
    pub fn include_group(&self, group: Arc<HandlerGroup>) -> Result<(), AttachError> {
        let mut groups = self.sub_groups.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = group.parent() {
            return Err(AttachError::AlreadyAttached {
                group: group.name().to_string(),
                parent,
            });
        }
        group.set_parent(Some(self.name.clone()));
        groups.push(group);
        Ok(())
    }

    /// Detach a handler group and clear its parent link.
    /// Returns false if it was not attached here.
    pub fn detach_group(&self, group: &Arc<HandlerGroup>) -> bool {
        let mut groups = self.sub_groups.write().unwrap_or_else(PoisonError::into_inner);
        let before = groups.len();
        groups.retain(|g| !Arc::ptr_eq(g, group));
        let removed = groups.len() != before;
        if removed {
            group.set_parent(None);
        }
        removed
    }

    pub fn contains_group(&self, group: &Arc<HandlerGroup>) -> bool {
        self.sub_groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|g| Arc::ptr_eq(g, group))
    }

    /// Snapshot of attached groups, in dispatch order
    pub fn sub_groups(&self) -> Vec<Arc<HandlerGroup>> {
        self.sub_groups.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Process a raw text message
    pub async fn process_text(&self, chat_id: impl Into<String>, text: impl Into<String>) -> Result<DispatchOutcome, BotError> {
        let message = self.parser.parse(chat_id, text, None);
        self.feed(message).await
    }

    /// Route one update through the attached groups
    pub async fn feed(&self, message: Message) -> Result<DispatchOutcome, BotError> {
        let bot = self.bot();

        for group in self.sub_groups() {
            let ctx = Context::new(message.clone()).with_bot(bot.clone());
            match group.propagate(ctx).await {
                Ok(Some(ctx)) => {
                    return Ok(DispatchOutcome::Handled {
                        group: group.name().to_string(),
                        response: ctx.response().cloned(),
                    });
                }
                Ok(None) | Err(MiddlewareError::Skipped) => continue,
                Err(MiddlewareError::Blocked(msg)) => {
                    return Ok(DispatchOutcome::Handled {
                        group: group.name().to_string(),
                        response: Some(msg),
                    });
                }
                Err(MiddlewareError::Handler(msg)) | Err(MiddlewareError::Internal(msg)) => {
                    return Err(BotError::Internal(msg));
                }
            }
        }

        tracing::debug!("Update {} not handled", message.id);
        Ok(DispatchOutcome::Unhandled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_group(name: &str) -> HandlerGroup {
        let reply = name.to_string();
        HandlerGroup::new(name).on_command("ping", move |_ctx| {
            let reply = reply.clone();
            async move { Ok(Some(reply)) }
        })
    }

    #[test]
    fn test_include_twice_reports_already_attached() {
        let dispatcher = Dispatcher::new("main", "/");
        let group = Arc::new(echo_group("alpha"));

        dispatcher.include_group(Arc::clone(&group)).unwrap();
        let err = dispatcher.include_group(Arc::clone(&group)).unwrap_err();

        assert_eq!(err, AttachError::AlreadyAttached { group: "alpha".into(), parent: "main".into() });
        assert_eq!(dispatcher.sub_groups().len(), 1);
    }

    #[test]
    fn test_detach_clears_parent() {
        let dispatcher = Dispatcher::new("main", "/");
        let group = Arc::new(echo_group("alpha"));

        dispatcher.include_group(Arc::clone(&group)).unwrap();
        assert_eq!(group.parent().as_deref(), Some("main"));

        assert!(dispatcher.detach_group(&group));
        assert!(group.parent().is_none());
        assert!(!dispatcher.contains_group(&group));
        assert!(!dispatcher.detach_group(&group));

        let other = Dispatcher::new("other", "/");
        assert!(other.include_group(group).is_ok());
    }

    #[tokio::test]
    async fn test_first_matching_group_wins() {
        let dispatcher = Dispatcher::new("main", "/");
        dispatcher.include_group(Arc::new(echo_group("alpha"))).unwrap();
        dispatcher.include_group(Arc::new(echo_group("beta"))).unwrap();

        let outcome = dispatcher.process_text("42", "/ping").await.unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Handled { group: "alpha".into(), response: Some("alpha".into()) }
        );

        let outcome = dispatcher.process_text("42", "hello").await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Unhandled);
    }

    #[tokio::test]
    async fn test_callbacks_use_callback_observer() {
        let dispatcher = Dispatcher::new("main", "/");
        let group = HandlerGroup::new("alpha")
            .on_callback("alpha:go", |_ctx| async { Ok(Some("went".to_string())) });
        dispatcher.include_group(Arc::new(group)).unwrap();

        let outcome = dispatcher.feed(Message::from_callback("42", "alpha:go")).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Handled { .. }));

        // Same payload as a text message never reaches the callback route
        let outcome = dispatcher.feed(Message::from_text("42", "alpha:go")).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Unhandled);
    }

    #[test]
    fn test_filter_matching() {
        assert!(Filter::Command("help".into()).matches(&Message::from_command("1", "HELP", vec![])));
        assert!(Filter::CallbackEquals("mod:a:x".into()).matches(&Message::from_callback("1", "mod:a:x")));
        assert!(!Filter::CallbackEquals("mod:a:x".into()).matches(&Message::from_text("1", "mod:a:x")));
        assert!(Filter::Any.matches(&Message::from_callback("1", "x")));
    }
}
