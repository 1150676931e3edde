//! Handler and middleware types.
//!
//! A [`Handler`] turns a [`Context`] into an optional response. A
//! [`Middleware`] decorates a handler with another handler; the router
//! composes each route's chain once, when the route or the global list
//! changes, and stores the result.
//!
//! Closures become middleware through [`from_fn`]:
//!
//! ```
//! use std::sync::Arc;
//!
//! use wireroute::{
//!     middleware::{Handler, from_fn},
//!     router::{Context, Router},
//! };
//!
//! let router: Router = Router::new();
//! router.use_middleware(Arc::new(from_fn(|mut ctx: Context, next: Handler| async move {
//!     ctx.set("authenticated", true);
//!     next(ctx).await
//! })));
//! ```

use std::{future::Future, pin::Pin, sync::Arc};

use crate::{
    codec::{BincodeCodec, Codec},
    message::Message,
    router::Context,
};

mod logging;
mod recover;

pub use logging::LogRequests;
pub use recover::{HandlerPanicked, Recover};

/// Error returned by a handler. The router logs it and sends no response.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// `Ok(None)` means the request succeeded without a response.
pub type HandlerResult = Result<Option<Message>, HandlerError>;

/// Boxed future produced by a [`Handler`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Type-erased asynchronous route handler.
pub type Handler<C = BincodeCodec> = Arc<dyn Fn(Context<C>) -> HandlerFuture + Send + Sync>;

/// Box an async function into a [`Handler`].
pub fn handler<C, F, Fut>(f: F) -> Handler<C>
where
    C: Codec,
    F: Fn(Context<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |ctx: Context<C>| -> HandlerFuture { Box::pin(f(ctx)) })
}

/// Decorates a handler with cross-cutting behaviour.
///
/// `wrap` runs at composition time, not per request. The returned handler
/// decides whether and when to call `next`.
pub trait Middleware<C = BincodeCodec>: Send + Sync {
    fn wrap(&self, next: Handler<C>) -> Handler<C>;
}

/// Middleware built from an async closure taking the context and the next
/// handler.
pub struct FromFn<F> {
    f: Arc<F>,
}

/// Turn `f` into a [`Middleware`].
pub fn from_fn<C, F, Fut>(f: F) -> FromFn<F>
where
    C: Codec,
    F: Fn(Context<C>, Handler<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    FromFn { f: Arc::new(f) }
}

impl<C, F, Fut> Middleware<C> for FromFn<F>
where
    C: Codec,
    F: Fn(Context<C>, Handler<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn wrap(&self, next: Handler<C>) -> Handler<C> {
        let f = Arc::clone(&self.f);
        Arc::new(move |ctx: Context<C>| -> HandlerFuture { Box::pin(f(ctx, Arc::clone(&next))) })
    }
}
