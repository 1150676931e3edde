//! Per-request context handed through the middleware chain.

use std::{fmt, sync::Arc};

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    codec::{BincodeCodec, Codec, CodecError},
    message::{Id, Message},
    session::{Session, SessionError},
    values::Values,
};

/// Session, request and a key/value store for one dispatch.
///
/// The context is moved through the chain, so values a middleware sets
/// before calling `next` are visible to everything it wraps.
pub struct Context<C = BincodeCodec> {
    session: Arc<Session<C>>,
    request: Message,
    values: Values,
}

impl<C> Clone for Context<C> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            request: self.request.clone(),
            values: self.values.clone(),
        }
    }
}

impl<C: Codec> Context<C> {
    #[must_use]
    pub fn new(session: Arc<Session<C>>, request: Message) -> Self {
        Self {
            session,
            request,
            values: Values::default(),
        }
    }

    /// Session the request arrived on.
    #[must_use]
    pub fn session(&self) -> &Arc<Session<C>> { &self.session }

    #[must_use]
    pub fn request(&self) -> &Message { &self.request }

    /// Decode the request payload with the session's codec.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Missing`] without a codec, or the codec's
    /// decode error. Neither closes the session.
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        let codec = self.session.codec().ok_or(CodecError::Missing)?;
        codec.decode(self.request.data())
    }

    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> { self.values.get(key) }

    pub fn set<T: Send + Sync + 'static>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key, value);
    }

    pub fn remove(&mut self, key: &str) -> bool { self.values.remove(key) }

    /// Build a response whose payload is `value` encoded by the session's
    /// codec.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Missing`] without a codec, or the codec's
    /// encode error.
    pub fn encode_response<T>(&self, id: impl Into<Id>, value: &T) -> Result<Message, CodecError>
    where
        T: Serialize + ?Sized,
    {
        let codec = self.session.codec().ok_or(CodecError::Missing)?;
        Ok(Message::new(id, codec.encode(value)?))
    }

    /// Build a response carrying `data` unchanged.
    #[must_use]
    pub fn raw_response(&self, id: impl Into<Id>, data: impl Into<Bytes>) -> Message {
        Message::new(id, data)
    }

    /// Build a response whose payload is the `Display` rendering of `value`.
    #[must_use]
    pub fn display_response(&self, id: impl Into<Id>, value: &impl fmt::Display) -> Message {
        Message::new(id, value.to_string())
    }

    /// Push `msg` to this request's session outside the response path.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] if the session has closed.
    pub async fn send(&self, msg: Message) -> Result<(), SessionError> { self.session.send(msg).await }

    /// Push `msg` to another session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] if `session` has closed.
    pub async fn send_to(&self, session: &Session<C>, msg: Message) -> Result<(), SessionError> {
        session.send(msg).await
    }
}

impl<C: Codec> fmt::Debug for Context<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("session_id", &self.session.id())
            .field("request_id", self.request.id())
            .field("values", &self.values)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde::{Deserialize, Serialize};

    use super::Context;
    use crate::{
        codec::{BincodeCodec, CodecError, JsonCodec},
        message::{Id, Message},
        packer::DefaultPacker,
        session::{Session, SessionConfig},
    };

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Greeting {
        name: String,
    }

    fn json_context(payload: &'static [u8]) -> Context<JsonCodec> {
        let session = Session::new(Arc::new(DefaultPacker::default()), SessionConfig::default())
            .with_codec(Some(Arc::new(JsonCodec)));
        Context::new(Arc::new(session), Message::new(1u32, payload))
    }

    #[test]
    fn bind_decodes_with_session_codec() {
        let ctx = json_context(br#"{"name":"ada"}"#);
        let greeting: Greeting = ctx.bind().expect("valid json");
        assert_eq!(greeting.name, "ada");
    }

    #[test]
    fn encode_response_uses_codec() {
        let ctx = json_context(b"{}");
        let resp = ctx
            .encode_response(2u32, &Greeting { name: "bo".into() })
            .expect("encode");
        assert_eq!(resp.id(), &Id::Numeric(2));
        assert_eq!(resp.data().as_ref(), br#"{"name":"bo"}"#);
    }

    #[test]
    fn codec_helpers_fail_without_codec() {
        let session: Session<BincodeCodec> =
            Session::new(Arc::new(DefaultPacker::default()), SessionConfig::default());
        let ctx = Context::new(Arc::new(session), Message::new(1u32, "x"));
        assert!(matches!(ctx.bind::<String>(), Err(CodecError::Missing)));
        assert!(matches!(
            ctx.encode_response(1u32, "x"),
            Err(CodecError::Missing)
        ));
        assert_eq!(ctx.display_response(3u32, &42).data().as_ref(), b"42");
        assert_eq!(ctx.raw_response(3u32, "raw").data().as_ref(), b"raw");
    }

    #[test]
    fn values_are_scoped_to_the_context() {
        let mut ctx = json_context(b"{}");
        ctx.set("user", String::from("ada"));
        let copy = ctx.clone();
        assert!(ctx.remove("user"));
        assert!(ctx.get::<String>("user").is_none());
        assert_eq!(copy.get::<String>("user").as_deref().map(String::as_str), Some("ada"));
    }
}
