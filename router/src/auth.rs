//! Subscriber authorization seam.
//!
//! The real decision lives in the platform's identity service; the proxy only
//! needs the verdict. Deployments wire in their own implementation.

use async_trait::async_trait;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Granted,
    Denied,
    /// The tenant does not exist, as opposed to not being allowed.
    UnknownApp,
}

#[async_trait]
pub trait Authorizer: Send + Sync + 'static {
    async fn authorize(&self, token: &str, app_id: Option<&str>) -> Access;
}

/// Grants everything; the stand-in when access control is disabled.
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _token: &str, _app_id: Option<&str>) -> Access {
        Access::Granted
    }
}
