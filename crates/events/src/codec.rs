//! Envelope codec: wire envelope -> raw bytes -> JSON.
//!
//! Every failure here is a `DecodeError`, and a `DecodeError` is always
//! permanent: malformed input never becomes valid on redelivery.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::envelope::{PushMessage, PushRequest};

#[derive(Debug, Error)]
pub enum DecodeError {
    /// The HTTP body is not a push request.
    #[error("malformed push request: {0}")]
    Request(#[source] serde_json::Error),

    /// `message.data` is not valid base64.
    #[error("message data is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The decoded bytes are not JSON, or not the shape the handler declares.
    #[error("message payload does not match the expected shape: {0}")]
    Payload(#[source] serde_json::Error),
}

/// Parse an HTTP body into a push request.
pub fn decode_request(body: &[u8]) -> Result<PushRequest, DecodeError> {
    serde_json::from_slice(body).map_err(DecodeError::Request)
}

/// Decode `message.data` into raw bytes.
pub fn decode_bytes(message: &PushMessage) -> Result<Vec<u8>, DecodeError> {
    Ok(STANDARD.decode(message.data.trim())?)
}

/// Decode `message.data` into an untyped JSON value.
pub fn decode_value(message: &PushMessage) -> Result<JsonValue, DecodeError> {
    decode::<JsonValue>(message)
}

/// Decode `message.data` into the caller's declared payload shape.
pub fn decode<T: DeserializeOwned>(message: &PushMessage) -> Result<T, DecodeError> {
    let bytes = decode_bytes(message)?;
    serde_json::from_slice(&bytes).map_err(DecodeError::Payload)
}

/// Check an already-decoded JSON value against a declared payload shape.
pub fn conform<T: DeserializeOwned>(value: JsonValue) -> Result<T, DecodeError> {
    serde_json::from_value(value).map_err(DecodeError::Payload)
}

/// Encode a payload as JSON and wrap it into a wire envelope.
pub fn encode<T: Serialize + ?Sized>(
    message_id: impl Into<String>,
    payload: &T,
) -> Result<PushMessage, serde_json::Error> {
    let bytes = serde_json::to_vec(payload)?;
    Ok(encode_bytes(message_id, &bytes))
}

/// Wrap raw bytes into a wire envelope.
pub fn encode_bytes(message_id: impl Into<String>, bytes: &[u8]) -> PushMessage {
    PushMessage::new(message_id, STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct Upvote {
        user_id: String,
        comment_id: String,
    }

    #[test]
    fn decodes_typed_payload() {
        let msg = encode("1", &serde_json::json!({ "userId": "u2", "commentId": "c1" })).unwrap();
        let decoded: Upvote = decode(&msg).unwrap();
        assert_eq!(
            decoded,
            Upvote {
                user_id: "u2".into(),
                comment_id: "c1".into()
            }
        );
    }

    #[test]
    fn untyped_decode_keeps_the_whole_document() {
        let payload = serde_json::json!({ "userId": "u2", "extra": [1, null, "x"] });
        let msg = encode("1", &payload).unwrap();
        assert_eq!(decode_value(&msg).unwrap(), payload);
        assert_eq!(decode::<JsonValue>(&msg).unwrap(), payload);
    }

    #[test]
    fn invalid_base64_is_a_decode_error() {
        let msg = PushMessage::new("1", "%%% not base64 %%%");
        assert!(matches!(decode_value(&msg), Err(DecodeError::Base64(_))));
    }

    #[test]
    fn invalid_json_is_a_decode_error() {
        let msg = encode_bytes("1", b"{ not json");
        assert!(matches!(decode_value(&msg), Err(DecodeError::Payload(_))));
    }

    #[test]
    fn shape_mismatch_is_a_decode_error() {
        let msg = encode("1", &serde_json::json!({ "userId": "u2" })).unwrap();
        assert!(matches!(decode::<Upvote>(&msg), Err(DecodeError::Payload(_))));
    }

    #[test]
    fn body_without_message_is_a_request_error() {
        assert!(matches!(
            decode_request(br#"{"data":"e30="}"#),
            Err(DecodeError::Request(_))
        ));
        assert!(matches!(decode_request(b""), Err(DecodeError::Request(_))));
    }

    proptest! {
        /// Arbitrary bytes never panic the codec; they either decode to JSON or
        /// produce a `DecodeError`.
        #[test]
        fn arbitrary_payload_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            let msg = encode_bytes("p", &bytes);
            match decode_value(&msg) {
                Ok(v) => prop_assert_eq!(v, serde_json::from_slice::<JsonValue>(&bytes).unwrap()),
                Err(e) => prop_assert!(matches!(e, DecodeError::Payload(_))),
            }
        }

        /// Strings outside the base64 alphabet are always rejected.
        #[test]
        fn non_base64_data_is_rejected(data in "[!@#$%^&*(){}]{1,64}") {
            let msg = PushMessage::new("p", data);
            prop_assert!(matches!(decode_value(&msg), Err(DecodeError::Base64(_))));
        }
    }
}
