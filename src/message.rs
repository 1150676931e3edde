//! Message envelope exchanged between the framework and application code.
//!
//! A [`Message`] pairs a routing [`Id`] with raw payload bytes. Packers build
//! messages when reading and consume them when writing; handlers build them
//! as responses. The optional [`Values`] metadata travels with the message
//! through the pipeline but is never written to the wire.

use std::fmt;

use bytes::Bytes;

use crate::values::Values;

/// Message identifier used as the routing key.
///
/// Wire formats disagree on how identifiers are represented, so the id is a
/// small closed variant rather than a fixed integer. Numeric ids of every
/// width convert into [`Id::Numeric`], which keeps a `u16` id read by one
/// packer equal to the same `u32` id registered on the router.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Id {
    /// Unsigned integer identifier.
    Numeric(u64),
    /// Textual identifier.
    Text(String),
}

impl Id {
    /// Return the numeric value, if this id is numeric.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Id::Numeric(value) => Some(*value),
            Id::Text(_) => None,
        }
    }

    /// Narrow to a `u32`, returning `None` when the value does not fit or the
    /// id is textual.
    ///
    /// ```
    /// use wireroute::message::Id;
    ///
    /// assert_eq!(Id::from(7u64).to_u32(), Some(7));
    /// assert_eq!(Id::from(u64::MAX).to_u32(), None);
    /// assert_eq!(Id::from("login").to_u32(), None);
    /// ```
    #[must_use]
    pub fn to_u32(&self) -> Option<u32> { self.as_u64().and_then(|v| u32::try_from(v).ok()) }

    /// Narrow to a `u16`, returning `None` when the value does not fit or the
    /// id is textual.
    #[must_use]
    pub fn to_u16(&self) -> Option<u16> { self.as_u64().and_then(|v| u16::try_from(v).ok()) }

    /// Return the text, if this id is textual.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Id::Numeric(_) => None,
            Id::Text(text) => Some(text),
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Numeric(value) => write!(f, "{value}"),
            Id::Text(text) => f.write_str(text),
        }
    }
}

macro_rules! numeric_id_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Id {
                fn from(value: $ty) -> Self { Id::Numeric(u64::from(value)) }
            }
        )*
    };
}

numeric_id_from!(u8, u16, u32, u64);

impl From<&str> for Id {
    fn from(value: &str) -> Self { Id::Text(value.to_owned()) }
}

impl From<String> for Id {
    fn from(value: String) -> Self { Id::Text(value) }
}

/// Identifier, payload and side metadata for one request or response.
#[derive(Clone, Debug)]
pub struct Message {
    id: Id,
    data: Bytes,
    metadata: Values,
}

impl Message {
    /// Construct a message from an id and payload.
    ///
    /// ```
    /// use wireroute::message::{Id, Message};
    ///
    /// let msg = Message::new(1u32, "ping");
    /// assert_eq!(msg.id(), &Id::Numeric(1));
    /// assert_eq!(msg.data().as_ref(), b"ping");
    /// ```
    #[must_use]
    pub fn new(id: impl Into<Id>, data: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            data: data.into(),
            metadata: Values::default(),
        }
    }

    /// Attach a metadata value, returning the updated message.
    #[must_use]
    pub fn with_metadata<T>(mut self, key: impl Into<String>, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.metadata.insert(key, value);
        self
    }

    #[must_use]
    pub fn id(&self) -> &Id { &self.id }

    #[must_use]
    pub fn data(&self) -> &Bytes { &self.data }

    #[must_use]
    pub fn metadata(&self) -> &Values { &self.metadata }

    /// Mutable access to the metadata store.
    pub fn metadata_mut(&mut self) -> &mut Values { &mut self.metadata }

    /// Consume the message, returning its id and payload.
    #[must_use]
    pub fn into_parts(self) -> (Id, Bytes) { (self.id, self.data) }
}
