//! Panic recovery for handlers.

use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use log::error;
use thiserror::Error;

use super::{Handler, HandlerFuture, Middleware};
use crate::{codec::Codec, metrics, panic::format_panic, router::Context};

/// Error returned in place of a response when a handler panicked.
#[derive(Debug, Error)]
#[error("handler panicked: {message}")]
pub struct HandlerPanicked {
    /// Rendered panic payload.
    pub message: String,
}

/// Catches panics raised by the wrapped chain.
///
/// The panic is logged and becomes a [`HandlerPanicked`] error, so the
/// router sends no response and the session stays open. Without this
/// middleware a panicking handler takes down the session's dispatch task.
#[derive(Clone, Copy, Debug, Default)]
pub struct Recover;

impl<C: Codec> Middleware<C> for Recover {
    fn wrap(&self, next: Handler<C>) -> Handler<C> {
        Arc::new(move |ctx: Context<C>| -> HandlerFuture {
            let next = Arc::clone(&next);
            Box::pin(async move {
                let id = ctx.request().id().clone();
                let session_id = ctx.session().id();
                let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| next(ctx))) {
                    Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
                    Err(panic) => Err(panic),
                };
                match outcome {
                    Ok(result) => result,
                    Err(panic) => {
                        metrics::inc_panics();
                        let panic_msg = format_panic(panic.as_ref());
                        error!("handler panicked: panic={panic_msg}, id={id}, session_id={session_id}");
                        tracing::error!(panic = %panic_msg, %id, session_id = session_id.as_u64(), "handler panicked");
                        Err(HandlerPanicked {
                            message: panic_msg.to_string(),
                        }
                        .into())
                    }
                }
            })
        })
    }
}
