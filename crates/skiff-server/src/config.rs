//! Server configuration.

use std::net::{Ipv4Addr, SocketAddr};

/// Default max body size for payload requests (10 MB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to.
    pub bind_address: SocketAddr,

    /// Maximum request body size in bytes. Default: 10 MB.
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind address.
    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = addr;
        self
    }

    /// Set the maximum request body size.
    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }
}

impl TryFrom<&skiff_config::ServerConfig> for ServerConfig {
    type Error = crate::ServerError;

    fn try_from(config: &skiff_config::ServerConfig) -> crate::Result<Self> {
        let address = config.address();
        let bind_address = address.parse().map_err(|e| {
            crate::ServerError::Config(format!("Invalid bind address '{address}': {e}"))
        })?;
        Ok(Self::default().with_bind_address(bind_address))
    }
}
