//! TCP listener setup.
//!
//! # Responsibilities
//! - Parse and bind the configured address
//! - Report a contended port distinctly so startup can fail loudly

use std::io::ErrorKind;
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::config::ListenerConfig;

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// The bind address could not be parsed.
    #[error("invalid bind address '{address}': {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: std::net::AddrParseError,
    },
    /// Another process already holds the port.
    #[error("Port {port} is already in use! Please stop other proxy instances.")]
    AddrInUse { port: u16 },
    /// Any other bind failure.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Bind the gateway's listening socket.
pub async fn bind(config: &ListenerConfig) -> Result<TcpListener, ListenerError> {
    let address: SocketAddr =
        config
            .bind_address
            .parse()
            .map_err(|source| ListenerError::InvalidAddress {
                address: config.bind_address.clone(),
                source,
            })?;

    let listener = TcpListener::bind(address).await.map_err(|source| {
        if source.kind() == ErrorKind::AddrInUse {
            ListenerError::AddrInUse {
                port: address.port(),
            }
        } else {
            ListenerError::Bind { address, source }
        }
    })?;

    if let Ok(local_addr) = listener.local_addr() {
        tracing::info!(address = %local_addr, "Listener bound");
    }

    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn contended_port_is_reported() {
        let holder = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = holder.local_addr().unwrap().port();

        let config = ListenerConfig {
            bind_address: format!("127.0.0.1:{port}"),
        };
        match bind(&config).await {
            Err(ListenerError::AddrInUse { port: reported }) => assert_eq!(reported, port),
            other => panic!("expected AddrInUse, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn garbage_address_is_rejected() {
        let config = ListenerConfig {
            bind_address: "nowhere".into(),
        };
        assert!(matches!(
            bind(&config).await,
            Err(ListenerError::InvalidAddress { .. })
        ));
    }
}
