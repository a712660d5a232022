//! The request handler callback.
//!
//! The server core has no routing: one [`Handler`] is invoked for every request of every
//! connection. For each request it either drives the body streams of the
//! [`HttpContext`] (or one of its `send_*` helpers) so that exactly the declared content
//! lengths are consumed and produced, or it upgrades the connection with
//! [`accept_websocket`](HttpContext::accept_websocket) and drives the session.

use std::error::Error;

use async_trait::async_trait;
use futures::future::BoxFuture;
use http::StatusCode;

use crate::connection::HttpContext;
use crate::protocol::HttpError;

/// The error a handler may fail with.
///
/// The connection walks its `source()` chain for the first [`HttpError`] to pick the
/// status of the error response; anything else is reported as a 500.
pub type HandlerError = Box<dyn Error + Send + Sync>;

#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, ctx: &mut HttpContext<'_>) -> Result<(), HandlerError>;
}

/// A [`Handler`] built from a closure, see [`make_handler`].
#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F> Handler for HandlerFn<F>
where
    F: for<'a, 'b> Fn(&'a mut HttpContext<'b>) -> BoxFuture<'a, Result<(), HandlerError>> + Send + Sync,
{
    async fn call(&self, ctx: &mut HttpContext<'_>) -> Result<(), HandlerError> {
        (self.f)(ctx).await
    }
}

/// Adapts a closure returning a boxed future into a [`Handler`].
///
/// ```
/// use futures::FutureExt;
/// use mirror_http::handler::{make_handler, HandlerError};
///
/// let handler = make_handler(|ctx| {
///     async move {
///         ctx.send_response("pong").await?;
///         Ok::<(), HandlerError>(())
///     }
///     .boxed()
/// });
/// # let _ = handler;
/// ```
pub fn make_handler<F>(f: F) -> HandlerFn<F>
where
    F: for<'a, 'b> Fn(&'a mut HttpContext<'b>) -> BoxFuture<'a, Result<(), HandlerError>> + Send + Sync,
{
    HandlerFn { f }
}

/// The handler of a server nobody installed a handler on: every request gets a 503.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHandler;

#[async_trait]
impl Handler for NoHandler {
    async fn call(&self, _ctx: &mut HttpContext<'_>) -> Result<(), HandlerError> {
        Err(HttpError::status(StatusCode::SERVICE_UNAVAILABLE, "no request handler installed").with_keep_open().into())
    }
}
