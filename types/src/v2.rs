//! Second-generation envelope schema.
//!
//! v2 flattens the routing identity into a tag map and addresses the owner
//! with `source_id`. Gauges are a named map so a single envelope can carry a
//! whole instrument snapshot.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const TAG_ORIGIN: &str = "origin";
pub const TAG_DEPLOYMENT: &str = "deployment";
pub const TAG_JOB: &str = "job";
pub const TAG_INDEX: &str = "index";
pub const TAG_IP: &str = "ip";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Nanoseconds since the epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub source_id: String,
    #[serde(default)]
    pub instance_id: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    pub message: Message,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Log(Log),
    Counter(Counter),
    Gauge(Gauge),
    Timer(Timer),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogType {
    Out,
    Err,
}

impl Default for LogType {
    fn default() -> Self {
        Self::Out
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Log {
    pub payload: Vec<u8>,
    #[serde(default)]
    pub log_type: LogType,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    pub name: String,
    pub delta: u64,
    #[serde(default)]
    pub total: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gauge {
    #[serde(default)]
    pub metrics: HashMap<String, GaugeValue>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GaugeValue {
    #[serde(default)]
    pub unit: String,
    pub value: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Timer {
    pub name: String,
    pub start: i64,
    pub stop: i64,
}

impl Envelope {
    pub fn tag(&self, name: &str) -> &str {
        self.tags.get(name).map(String::as_str).unwrap_or_default()
    }
}
