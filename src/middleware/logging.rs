//! Request logging middleware.

use std::{sync::Arc, time::Instant};

use log::debug;

use super::{Handler, HandlerFuture, Middleware};
use crate::{codec::Codec, router::Context};

/// Logs each request's id, session and elapsed time at debug level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogRequests;

impl<C: Codec> Middleware<C> for LogRequests {
    fn wrap(&self, next: Handler<C>) -> Handler<C> {
        Arc::new(move |ctx: Context<C>| -> HandlerFuture {
            let next = Arc::clone(&next);
            Box::pin(async move {
                let id = ctx.request().id().clone();
                let session_id = ctx.session().id();
                let started = Instant::now();
                let result = next(ctx).await;
                let elapsed = started.elapsed();
                match &result {
                    Ok(Some(resp)) => debug!(
                        "request handled: id={id}, session_id={session_id}, response_id={}, elapsed={elapsed:?}",
                        resp.id()
                    ),
                    Ok(None) => debug!(
                        "request handled: id={id}, session_id={session_id}, response_id=None, elapsed={elapsed:?}"
                    ),
                    Err(e) => debug!(
                        "request failed: id={id}, session_id={session_id}, error={e}, elapsed={elapsed:?}"
                    ),
                }
                result
            })
        })
    }
}
