//! Payload codecs turning message bytes into application values.
//!
//! A [`Codec`] is independent of the [`Packer`](crate::packer::Packer): the
//! packer frames bytes on the wire, the codec interprets the payload inside a
//! frame. Handlers reach the configured codec through
//! [`Context::bind`](crate::router::Context::bind) and
//! [`Context::encode_response`](crate::router::Context::encode_response).
//!
//! # Object Safety
//!
//! `Codec` is generic over the value type and therefore not object-safe.
//! Servers, sessions and routers carry the codec as a type parameter instead.

use std::error::Error;

use bincode::config;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Errors produced while encoding or decoding payloads.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// Serialising a value failed.
    #[error("{codec} encode failed: {source}")]
    Encode {
        codec: &'static str,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// Deserialising a payload failed.
    #[error("{codec} decode failed: {source}")]
    Decode {
        codec: &'static str,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The session has no codec configured.
    #[error("no codec configured for this session")]
    Missing,
}

/// Bidirectional transform between payload bytes and application values.
pub trait Codec: Send + Sync + 'static {
    /// Serialise `value` into payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the value cannot be represented.
    fn encode<T>(&self, value: &T) -> Result<Vec<u8>, CodecError>
    where
        T: Serialize + ?Sized;

    /// Deserialise a value from payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if `data` does not hold a valid `T`.
    fn decode<T>(&self, data: &[u8]) -> Result<T, CodecError>
    where
        T: DeserializeOwned;

    /// Short name used in error messages and logs.
    fn name(&self) -> &'static str;
}

/// Codec using `bincode` with its standard configuration.
///
/// ```
/// use wireroute::codec::{BincodeCodec, Codec};
///
/// let bytes = BincodeCodec.encode(&(7u32, "seven")).expect("encode");
/// let (n, s): (u32, String) = BincodeCodec.decode(&bytes).expect("decode");
/// assert_eq!((n, s.as_str()), (7, "seven"));
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn encode<T>(&self, value: &T) -> Result<Vec<u8>, CodecError>
    where
        T: Serialize + ?Sized,
    {
        bincode::serde::encode_to_vec(value, config::standard()).map_err(|e| CodecError::Encode {
            codec: self.name(),
            source: Box::new(e),
        })
    }

    fn decode<T>(&self, data: &[u8]) -> Result<T, CodecError>
    where
        T: DeserializeOwned,
    {
        bincode::serde::decode_from_slice(data, config::standard())
            .map(|(value, _)| value)
            .map_err(|e| CodecError::Decode {
                codec: self.name(),
                source: Box::new(e),
            })
    }

    fn name(&self) -> &'static str { "bincode" }
}

/// Codec using JSON via `serde_json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T>(&self, value: &T) -> Result<Vec<u8>, CodecError>
    where
        T: Serialize + ?Sized,
    {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode {
            codec: self.name(),
            source: Box::new(e),
        })
    }

    fn decode<T>(&self, data: &[u8]) -> Result<T, CodecError>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(data).map_err(|e| CodecError::Decode {
            codec: self.name(),
            source: Box::new(e),
        })
    }

    fn name(&self) -> &'static str { "json" }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::{BincodeCodec, Codec, CodecError, JsonCodec};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Login {
        user: String,
        attempt: u8,
    }

    #[test]
    fn json_codec_produces_readable_payload() {
        let bytes = JsonCodec
            .encode(&Login {
                user: "alice".into(),
                attempt: 1,
            })
            .expect("encode");
        assert_eq!(bytes, br#"{"user":"alice","attempt":1}"#);
    }

    #[test]
    fn decode_failure_names_the_codec() {
        let err = JsonCodec
            .decode::<Login>(b"not json")
            .expect_err("invalid payload");
        assert!(matches!(err, CodecError::Decode { codec: "json", .. }));
        assert!(err.to_string().starts_with("json decode failed"));
    }

    #[test]
    fn bincode_codec_round_trips_struct() {
        let login = Login {
            user: "bob".into(),
            attempt: 3,
        };
        let bytes = BincodeCodec.encode(&login).expect("encode");
        assert_eq!(BincodeCodec.decode::<Login>(&bytes).expect("decode"), login);
    }
}
