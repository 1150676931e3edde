//! Message routing.
//!
//! A [`Router`] maps message ids to handlers and runs each request through
//! the global middleware list, the route's own middlewares and finally the
//! handler:
//!
//! ```text
//! global[0](global[1](.. route[0](route[1](.. handler))))
//! ```
//!
//! Chains are composed when a route is registered or the global list
//! changes, never per request. Ids without a route fall back to the
//! not-found handler, or to a handler returning no response when none is
//! set; the fallback is wrapped by the global middlewares like any route.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, PoisonError, RwLock},
};

use log::{debug, info, warn};

use crate::{
    codec::{BincodeCodec, Codec},
    message::{Id, Message},
    metrics,
    middleware::{Handler, HandlerResult, Middleware, handler},
    session::Session,
};

mod context;

pub use context::Context;

struct Route<C> {
    handler: Handler<C>,
    middlewares: Vec<Arc<dyn Middleware<C>>>,
    composed: Handler<C>,
}

struct RouteTable<C> {
    routes: HashMap<Id, Route<C>>,
    globals: Vec<Arc<dyn Middleware<C>>>,
    not_found: Option<Handler<C>>,
    fallback: Handler<C>,
}

impl<C: Codec> RouteTable<C> {
    fn compose(&self, middlewares: &[Arc<dyn Middleware<C>>], handler: &Handler<C>) -> Handler<C> {
        self.globals
            .iter()
            .chain(middlewares)
            .rev()
            .fold(Arc::clone(handler), |next, mw| mw.wrap(next))
    }

    fn recompose_fallback(&mut self) {
        let base = self.not_found.clone().unwrap_or_else(no_response);
        self.fallback = self.compose(&[], &base);
    }

    fn recompose_all(&mut self) {
        let composed: Vec<(Id, Handler<C>)> = self
            .routes
            .iter()
            .map(|(id, route)| (id.clone(), self.compose(&route.middlewares, &route.handler)))
            .collect();
        for (id, handler) in composed {
            if let Some(route) = self.routes.get_mut(&id) {
                route.composed = handler;
            }
        }
        self.recompose_fallback();
    }
}

fn no_response<C: Codec>() -> Handler<C> { handler(|_ctx: Context<C>| async { Ok(None) }) }

/// Route table shared by every session of a server.
///
/// Registration and dispatch may run concurrently; dispatch clones the
/// composed handler out of the table before awaiting it.
pub struct Router<C = BincodeCodec> {
    table: RwLock<RouteTable<C>>,
}

impl<C: Codec> Default for Router<C> {
    fn default() -> Self {
        Self {
            table: RwLock::new(RouteTable {
                routes: HashMap::new(),
                globals: Vec::new(),
                not_found: None,
                fallback: no_response(),
            }),
        }
    }
}

impl<C: Codec> Router<C> {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Route `id` to `f` with no per-route middleware.
    pub fn register<F, Fut>(&self, id: impl Into<Id>, f: F)
    where
        F: Fn(Context<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register_handler(id, handler(f), Vec::new());
    }

    /// Route `id` to `f` wrapped by `middlewares`, outermost first.
    pub fn register_with<F, Fut>(
        &self,
        id: impl Into<Id>,
        f: F,
        middlewares: Vec<Arc<dyn Middleware<C>>>,
    ) where
        F: Fn(Context<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register_handler(id, handler(f), middlewares);
    }

    /// Route `id` to an already boxed handler.
    ///
    /// Registering an id again replaces the previous route.
    pub fn register_handler(
        &self,
        id: impl Into<Id>,
        handler: Handler<C>,
        middlewares: Vec<Arc<dyn Middleware<C>>>,
    ) {
        let id = id.into();
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        let composed = table.compose(&middlewares, &handler);
        let route = Route {
            handler,
            middlewares,
            composed,
        };
        if table.routes.insert(id.clone(), route).is_some() {
            debug!("route replaced: id={id}");
        }
    }

    /// Append a global middleware. It wraps every route, inside the
    /// globals added before it.
    pub fn use_middleware(&self, mw: Arc<dyn Middleware<C>>) {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        table.globals.push(mw);
        table.recompose_all();
    }

    /// Handle ids without a route with `f`.
    pub fn set_not_found_handler<F, Fut>(&self, f: F)
    where
        F: Fn(Context<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        table.not_found = Some(handler(f));
        table.recompose_fallback();
    }

    /// Run `msg` through its composed chain and return the handler's result.
    ///
    /// # Errors
    ///
    /// Returns whatever error the chain produced.
    pub async fn dispatch(&self, session: &Arc<Session<C>>, msg: Message) -> HandlerResult {
        let chain = {
            let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
            table
                .routes
                .get(msg.id())
                .map_or_else(|| Arc::clone(&table.fallback), |route| Arc::clone(&route.composed))
        };
        chain(Context::new(Arc::clone(session), msg)).await
    }

    /// Dispatch `msg` and queue any response on `session`.
    ///
    /// Handler errors are logged and produce no response; the session stays
    /// open.
    pub async fn handle(&self, session: &Arc<Session<C>>, msg: Message) {
        let id = msg.id().clone();
        match self.dispatch(session, msg).await {
            Ok(Some(resp)) => {
                if let Err(e) = session.send(resp).await {
                    debug!(
                        "response dropped: id={id}, session_id={}, error={e}",
                        session.id()
                    );
                }
            }
            Ok(None) => {}
            Err(e) => {
                metrics::inc_errors();
                warn!("handler error: id={id}, session_id={}, error={e}", session.id());
            }
        }
    }

    /// Registered ids in ascending order.
    #[must_use]
    pub fn routes(&self) -> Vec<Id> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<Id> = table.routes.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Log every registered route at info level.
    pub fn log_routes(&self) {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        let mut routes: Vec<(&Id, usize)> = table
            .routes
            .iter()
            .map(|(id, route)| (id, route.middlewares.len()))
            .collect();
        routes.sort();
        for (id, middlewares) in routes {
            info!(
                "route: id={id}, middlewares={}",
                table.globals.len() + middlewares
            );
        }
    }
}
