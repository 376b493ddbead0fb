//! Decrypted signaling payloads: the offer/answer session descriptions
//! exchanged to bring up a media-transport peer connection.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("malformed signaling payload: {0}")]
pub struct SignalingError(String);

/// A session description, tagged `"offer"` or `"answer"` on the wire.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Signaling {
    Offer { sdp: String },
    Answer { sdp: String },
}

impl Signaling {
    pub fn sdp(&self) -> &str {
        match self {
            Signaling::Offer { sdp } | Signaling::Answer { sdp } => sdp,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("signaling serialization is infallible")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SignalingError> {
        serde_json::from_slice(bytes).map_err(|e| SignalingError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_round_trip() {
        let msg = Signaling::Offer { sdp: "v=0".into() };
        let decoded = Signaling::decode(&msg.encode()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn tag_values_are_lowercase() {
        let encoded = Signaling::Answer { sdp: "v=0".into() }.encode();
        let text = String::from_utf8(encoded).unwrap();
        assert!(text.contains(r#""type":"answer""#));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(Signaling::decode(br#"{"type":"candidate","sdp":"x"}"#).is_err());
    }
}
