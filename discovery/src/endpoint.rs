use serde::{Deserialize, Serialize};

/// An aggregator's advertised record, as stored under the structured prefix.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub host: String,
    pub ws_port: u16,
    pub grpc_port: u16,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub protocols: Vec<String>,
}

impl Endpoint {
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.host, self.ws_port)
    }

    /// Address of the streaming ingest/egress listener.
    pub fn stream_addr(&self) -> String {
        format!("{}:{}", self.host, self.grpc_port)
    }
}
