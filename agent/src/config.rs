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

    #[serde(rename = "IncomingUDPPort")]
    pub incoming_udp_port: u16,
    /// Static streaming target, used only while discovery has nothing better.
    #[serde(rename = "DopplerAddr", default)]
    pub doppler_addr: String,
    #[serde(rename = "DopplerAddrUDP")]
    pub doppler_addr_udp: String,
    #[serde(rename = "SharedSecret", default)]
    pub shared_secret: String,
    #[serde(rename = "GRPC", default)]
    pub grpc: Option<TlsFiles>,

    #[serde(rename = "Zone", default)]
    pub zone: String,
    #[serde(rename = "Deployment", default)]
    pub deployment: String,
    #[serde(rename = "Job", default)]
    pub job: String,
    #[serde(rename = "Index", default = "default_index")]
    pub index: String,
}

fn default_etcd_concurrency() -> usize {
    10
}

fn default_index() -> String {
    "0".to_string()
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read(path)?;
        let config: Config = serde_json::from_slice(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.incoming_udp_port == 0 {
            return Err(ConfigError::Invalid("need IncomingUDPPort"));
        }
        if self.doppler_addr_udp.is_empty() {
            return Err(ConfigError::Invalid("need DopplerAddrUDP (host:port)"));
        }
        if self.etcd_urls.is_empty() {
            return Err(ConfigError::Invalid("need at least one etcd url"));
        }
        if self.etcd_require_tls && self.etcd_tls_client_config.is_none() {
            return Err(ConfigError::Invalid("invalid etcd TLS client configuration"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parses_the_documented_fields() {
        let file = write_config(
            r#"{
                "EtcdUrls": ["http://127.0.0.1:4001"],
                "EtcdMaxConcurrentRequests": 5,
                "IncomingUDPPort": 3457,
                "DopplerAddrUDP": "doppler.example.com:3457",
                "SharedSecret": "very-secret",
                "Zone": "z1",
                "Deployment": "cf",
                "Job": "diego_cell",
                "Index": "2"
            }"#,
        );

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.incoming_udp_port, 3457);
        assert_eq!(config.zone, "z1");
        assert_eq!(config.index, "2");
        assert_eq!(config.etcd_max_concurrent_requests, 5);
    }

    #[test]
    fn rejects_a_missing_destination() {
        let file = write_config(
            r#"{
                "EtcdUrls": ["http://127.0.0.1:4001"],
                "IncomingUDPPort": 3457,
                "DopplerAddrUDP": ""
            }"#,
        );
        assert!(Config::from_file(file.path()).is_err());
    }
}
