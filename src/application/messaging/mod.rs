//! Message handling - Event-driven message processing

pub mod dispatcher;
pub mod middleware;
pub mod parser;

pub use dispatcher::{AttachError, DispatchOutcome, Dispatcher, Filter, HandlerGroup, Observer};
pub use middleware::{
    handler, Context, Handler, HandlerResult, LoggingMiddleware, Middleware, MiddlewareError,
    MiddlewareResult, Next,
};
pub use parser::MessageParser;
