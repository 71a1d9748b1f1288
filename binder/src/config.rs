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
    #[serde(rename = "InstanceName")]
    pub instance_name: String,
    #[serde(rename = "DrainUrlTtlSeconds", default = "default_drain_ttl")]
    pub drain_url_ttl_seconds: u64,
    #[serde(rename = "UpdateIntervalSeconds", default = "default_update_interval")]
    pub update_interval_seconds: u64,

    #[serde(rename = "EtcdMaxConcurrentRequests", default = "default_etcd_concurrency")]
    pub etcd_max_concurrent_requests: usize,
    #[serde(rename = "EtcdUrls", default)]
    pub etcd_urls: Vec<String>,
    #[serde(rename = "EtcdRequireTLS", default)]
    pub etcd_require_tls: bool,
    #[serde(rename = "EtcdTLSClientConfig", default)]
    pub etcd_tls_client_config: Option<TlsFiles>,

    /// Local agent the binder emits its poll metrics to.
    #[serde(rename = "MetronAddress")]
    pub metron_address: String,

    #[serde(rename = "CloudControllerAddress")]
    pub cloud_controller_address: String,
    #[serde(rename = "BulkApiUsername", default)]
    pub bulk_api_username: String,
    #[serde(rename = "BulkApiPassword", default)]
    pub bulk_api_password: String,
    #[serde(rename = "PollingBatchSize", default = "default_batch_size")]
    pub polling_batch_size: usize,

    #[serde(rename = "SkipCertVerify", default)]
    pub skip_cert_verify: bool,
}

fn default_drain_ttl() -> u64 {
    60
}

fn default_update_interval() -> u64 {
    15
}

fn default_etcd_concurrency() -> usize {
    10
}

fn default_batch_size() -> usize {
    1000
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read(path)?;
        let config: Config = serde_json::from_slice(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.metron_address.is_empty() {
            return Err(ConfigError::Invalid("need Metron address (host:port)"));
        }
        if self.etcd_max_concurrent_requests < 1 {
            return Err(ConfigError::Invalid("need EtcdMaxConcurrentRequests >= 1"));
        }
        if self.etcd_urls.is_empty() {
            return Err(ConfigError::Invalid("need at least one etcd url"));
        }
        if self.etcd_require_tls && self.etcd_tls_client_config.is_none() {
            return Err(ConfigError::Invalid("invalid etcd TLS client configuration"));
        }
        if self.cloud_controller_address.is_empty() {
            return Err(ConfigError::Invalid("need CloudControllerAddress"));
        }
        if self.polling_batch_size == 0 {
            return Err(ConfigError::Invalid("need PollingBatchSize >= 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(contents: &str) -> Result<Config, ConfigError> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        Config::from_file(file.path())
    }

    #[test]
    fn parses_a_complete_config() {
        let config = parse(
            r#"{
                "InstanceName": "binder-0",
                "DrainUrlTtlSeconds": 60,
                "UpdateIntervalSeconds": 15,
                "EtcdMaxConcurrentRequests": 10,
                "EtcdUrls": ["http://127.0.0.1:4001"],
                "MetronAddress": "127.0.0.1:3457",
                "CloudControllerAddress": "https://api.example.com",
                "BulkApiUsername": "user",
                "BulkApiPassword": "pass",
                "PollingBatchSize": 1000,
                "SkipCertVerify": true
            }"#,
        )
        .unwrap();
        assert_eq!(config.instance_name, "binder-0");
        assert!(config.skip_cert_verify);
        assert_eq!(config.polling_batch_size, 1000);
    }

    #[test]
    fn requires_a_metron_address() {
        let result = parse(
            r#"{
                "InstanceName": "binder-0",
                "EtcdUrls": ["http://127.0.0.1:4001"],
                "MetronAddress": "",
                "CloudControllerAddress": "https://api.example.com"
            }"#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
