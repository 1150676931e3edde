//! Concurrent registry of live sessions.
//!
//! The server inserts each stream session on creation and removes it once
//! its loops exit. Lookups hand out `Arc`s so callers never hold a map
//! guard across an `.await`.

use std::sync::Arc;

use dashmap::DashMap;
use log::debug;

use super::{Session, SessionError, SessionId};
use crate::{
    codec::{BincodeCodec, Codec},
    message::Message,
};

/// Live sessions keyed by [`SessionId`].
pub struct SessionRegistry<C = BincodeCodec>(DashMap<SessionId, Arc<Session<C>>>);

impl<C> Default for SessionRegistry<C> {
    fn default() -> Self { Self(DashMap::new()) }
}

impl<C: Codec> SessionRegistry<C> {
    /// Add `session`, replacing any entry with the same id.
    pub fn insert(&self, session: Arc<Session<C>>) { self.0.insert(session.id(), session); }

    /// Remove the session with `id`, returning it if present.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session<C>>> {
        self.0.remove(id).map(|(_, session)| session)
    }

    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<Arc<Session<C>>> {
        self.0.get(id).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Ids of all registered sessions in arbitrary order.
    #[must_use]
    pub fn ids(&self) -> Vec<SessionId> { self.0.iter().map(|entry| *entry.key()).collect() }

    /// Snapshot of all registered sessions.
    #[must_use]
    pub fn sessions(&self) -> Vec<Arc<Session<C>>> {
        self.0.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Queue `msg` on the session with `id`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] if no session has `id`, or the
    /// error from [`Session::send`].
    pub async fn send_to(&self, id: SessionId, msg: Message) -> Result<(), SessionError> {
        let session = self.get(&id).ok_or(SessionError::NotFound(id))?;
        session.send(msg).await
    }

    /// Queue a copy of `msg` on every open session without waiting.
    ///
    /// Sessions whose queue is full or that are closing are skipped. Returns
    /// the number of sessions the message was queued on.
    pub fn broadcast(&self, msg: &Message) -> usize {
        self.sessions()
            .iter()
            .filter(|session| match session.try_send(msg.clone()) {
                Ok(()) => true,
                Err(e) => {
                    debug!("broadcast skipped session: session_id={}, error={e}", session.id());
                    false
                }
            })
            .count()
    }

    /// Fire the close signal of every registered session.
    pub fn close_all(&self) {
        for session in self.sessions() {
            session.close();
        }
    }
}
