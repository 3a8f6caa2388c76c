use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Translates typed messages to and from transport payloads.
pub trait Codec<T>: Send + Sync + 'static {
	fn encode(&self, message: &T) -> Result<Bytes>;
	fn decode(&self, payload: Bytes) -> Result<T>;
}

/// JSON payloads via serde.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> Codec<T> for JsonCodec
where
	T: Serialize + DeserializeOwned,
{
	fn encode(&self, message: &T) -> Result<Bytes> {
		serde_json::to_vec(message).map(Bytes::from).map_err(|e| Error::Codec(e.to_string()))
	}

	fn decode(&self, payload: Bytes) -> Result<T> {
		serde_json::from_slice(&payload).map_err(|e| Error::Codec(e.to_string()))
	}
}

/// Request and response codecs for one call.
pub struct CodecPair<Req, Resp> {
	pub request: Arc<dyn Codec<Req>>,
	pub response: Arc<dyn Codec<Resp>>,
}

impl<Req, Resp> CodecPair<Req, Resp> {
	/// Uses one codec value for both directions.
	pub fn new<K>(codec: K) -> Self
	where
		K: Codec<Req> + Codec<Resp> + Clone,
	{
		Self {
			request: Arc::new(codec.clone()),
			response: Arc::new(codec),
		}
	}
}

impl<Req, Resp> Clone for CodecPair<Req, Resp> {
	fn clone(&self) -> Self {
		Self {
			request: Arc::clone(&self.request),
			response: Arc::clone(&self.response),
		}
	}
}

impl<Req, Resp> fmt::Debug for CodecPair<Req, Resp> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CodecPair").finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn json_codec_rejects_mismatched_payload() {
		let codec = JsonCodec;
		let payload = Codec::<String>::encode(&codec, &"hello".to_string()).unwrap();
		assert_eq!(&payload[..], b"\"hello\"");

		let err = Codec::<u32>::decode(&codec, payload).unwrap_err();
		assert!(matches!(err, Error::Codec(_)));
	}
}
