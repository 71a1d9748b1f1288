//! Dialing the aggregator tier, optionally over mutual TLS.

use crate::frame::{framed, FramedStream};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("dial: {0}")]
    Io(#[from] std::io::Error),
    #[error("tls: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("handshake deadline exceeded")]
    Deadline,
}

/// Opens framed streams to aggregator endpoints.
#[derive(Clone)]
pub enum Connector {
    Plain,
    Tls(TlsClient),
}

#[derive(Clone)]
pub struct TlsClient {
    connector: tokio_native_tls::TlsConnector,
    /// Expected peer name on the aggregator's certificate.
    domain: String,
}

impl Connector {
    /// Builds a mutual-TLS connector from PEM files, verifying the peer
    /// presents `domain`.
    pub async fn mutual_tls(
        cert_file: &str,
        key_file: &str,
        ca_file: &str,
        domain: &str,
    ) -> Result<Self, ConnectError> {
        let cert = tokio::fs::read(cert_file).await?;
        let key = tokio::fs::read(key_file).await?;
        let ca = tokio::fs::read(ca_file).await?;

        let connector = native_tls::TlsConnector::builder()
            .identity(native_tls::Identity::from_pkcs8(&cert, &key)?)
            .add_root_certificate(native_tls::Certificate::from_pem(&ca)?)
            .build()?;
        Ok(Self::Tls(TlsClient {
            connector: tokio_native_tls::TlsConnector::from(connector),
            domain: domain.to_string(),
        }))
    }

    /// Connects and completes any handshake within `deadline`.
    pub async fn dial(&self, addr: &str, deadline: Duration) -> Result<FramedStream, ConnectError> {
        tokio::time::timeout(deadline, self.dial_inner(addr))
            .await
            .map_err(|_| ConnectError::Deadline)?
    }

    async fn dial_inner(&self, addr: &str) -> Result<FramedStream, ConnectError> {
        let tcp = TcpStream::connect(addr).await?;
        tcp.set_nodelay(true)?;
        match self {
            Self::Plain => Ok(framed(tcp)),
            Self::Tls(tls) => {
                let stream = tls.connector.connect(&tls.domain, tcp).await?;
                Ok(framed(stream))
            }
        }
    }
}
