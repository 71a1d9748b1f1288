//! First frame a subscriber-side client sends on an egress stream.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub subscriber_id: String,
    /// Restricts the stream to one application; `None` means the firehose.
    #[serde(default)]
    pub app_id: Option<String>,
}

impl SubscribeRequest {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("subscribe requests always serialize")
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_and_decodes() {
        let request = SubscribeRequest {
            subscriber_id: "operator-7".to_string(),
            app_id: Some("app-1".to_string()),
        };
        assert_eq!(SubscribeRequest::decode(&request.encode()), Some(request));
    }
}
