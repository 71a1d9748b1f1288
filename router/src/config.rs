use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

#[derive(Clone, Debug, Deserialize)]
pub struct TlsFiles {
    #[serde(rename = "CertFile")]
    pub cert_file: String,
    #[serde(rename = "KeyFile")]
    pub key_file: String,
    #[serde(rename = "CAFile")]
    pub ca_file: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(rename = "EtcdUrls", default)]
    pub etcd_urls: Vec<String>,
    #[serde(rename = "EtcdRequireTLS", default)]
    pub etcd_require_tls: bool,
    #[serde(rename = "EtcdTLSClientConfig", default)]
    pub etcd_tls_client_config: Option<TlsFiles>,
    #[serde(rename = "EtcdMaxConcurrentRequests", default = "default_etcd_concurrency")]
    pub etcd_max_concurrent_requests: usize,

    #[serde(rename = "OutgoingPort", default = "default_outgoing_port")]
    pub outgoing_port: u16,
    #[serde(rename = "MessageDrainBufferSize", default = "default_drain_buffer")]
    pub message_drain_buffer_size: usize,
    #[serde(rename = "WebsocketWriteTimeoutSeconds", default = "default_write_timeout")]
    pub websocket_write_timeout_seconds: u64,
    #[serde(rename = "SinkDialTimeoutSeconds", default = "default_dial_timeout")]
    pub sink_dial_timeout_seconds: u64,

    #[serde(rename = "GRPC", default)]
    pub grpc: Option<TlsFiles>,
}

fn default_etcd_concurrency() -> usize {
    10
}

fn default_outgoing_port() -> u16 {
    8080
}

fn default_drain_buffer() -> usize {
    100
}

fn default_write_timeout() -> u64 {
    30
}

fn default_dial_timeout() -> u64 {
    5
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read(path)?;
        let config: Config = serde_json::from_slice(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.etcd_urls.is_empty() {
            return Err(ConfigError::Invalid("need at least one etcd url"));
        }
        if self.etcd_require_tls && self.etcd_tls_client_config.is_none() {
            return Err(ConfigError::Invalid("invalid etcd TLS client configuration"));
        }
        if self.message_drain_buffer_size == 0 {
            return Err(ConfigError::Invalid("need MessageDrainBufferSize >= 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_cover_the_tuning_knobs() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"EtcdUrls": ["http://127.0.0.1:4001"]}"#)
            .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.message_drain_buffer_size, 100);
        assert_eq!(config.websocket_write_timeout_seconds, 30);
        assert_eq!(config.sink_dial_timeout_seconds, 5);
    }
}
