//! First-generation envelope schema.
//!
//! Emitters on a host address the agent with these records. The schema is an
//! external contract; absent optional fields must decode to their defaults so
//! that older emitters keep working.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single tagged record with its routing identity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub origin: String,
    #[serde(default)]
    pub deployment: String,
    #[serde(default)]
    pub job: String,
    #[serde(default)]
    pub index: String,
    #[serde(default)]
    pub ip: String,
    /// Nanoseconds since the epoch.
    pub timestamp: i64,
    pub event: Event,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Event {
    HttpStart(HttpStart),
    HttpStop(HttpStop),
    HttpStartStop(HttpStartStop),
    LogMessage(LogMessage),
    ValueMetric(ValueMetric),
    CounterEvent(CounterEvent),
    Error(Error),
    ContainerMetric(ContainerMetric),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Out,
    Err,
}

impl Default for MessageType {
    fn default() -> Self {
        Self::Out
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    pub message: Vec<u8>,
    #[serde(default)]
    pub message_type: MessageType,
    pub timestamp: i64,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub source_type: String,
    #[serde(default)]
    pub source_instance: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueMetric {
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub unit: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CounterEvent {
    pub name: String,
    pub delta: u64,
    #[serde(default)]
    pub total: u64,
}

/// Resource usage of a single application instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContainerMetric {
    pub application_id: String,
    pub instance_index: i32,
    pub cpu_percentage: f64,
    pub memory_bytes: u64,
    pub disk_bytes: u64,
    #[serde(default)]
    pub memory_bytes_quota: u64,
    #[serde(default)]
    pub disk_bytes_quota: u64,
}

/// Opening half of a traced request, correlated with [HttpStop] by id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HttpStart {
    pub timestamp: i64,
    pub request_id: Uuid,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub remote_address: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub instance_index: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HttpStop {
    pub timestamp: i64,
    pub request_id: Uuid,
    #[serde(default)]
    pub uri: String,
    pub status_code: i32,
    #[serde(default)]
    pub content_length: i64,
}

/// A paired request trace, produced by the agent's aggregation stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HttpStartStop {
    pub start_timestamp: i64,
    pub stop_timestamp: i64,
    pub request_id: Uuid,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub remote_address: String,
    #[serde(default)]
    pub user_agent: String,
    pub status_code: i32,
    #[serde(default)]
    pub content_length: i64,
    #[serde(default)]
    pub instance_index: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Error {
    pub source: String,
    pub code: i32,
    pub message: String,
}

impl Envelope {
    /// Application the envelope belongs to, when the variant carries one.
    pub fn app_id(&self) -> Option<&str> {
        match &self.event {
            Event::LogMessage(log) if !log.app_id.is_empty() => Some(&log.app_id),
            Event::ContainerMetric(metric) => Some(&metric.application_id),
            _ => None,
        }
    }
}
