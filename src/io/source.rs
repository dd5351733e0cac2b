//! Portal byte sources
//!
//! A portal is wired either to a local serial port or to a serial-to-Ethernet
//! converter reachable over TCP. Either way the decoder only sees an
//! `AsyncRead`; the driver opens a fresh source for every connection attempt.

use crate::infra::config::{Config, SourceMode};
use anyhow::Context;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tokio_serial::SerialPortBuilderExt;
use tracing::info;

/// Byte stream handed to the reader task
pub type PortalStream = Box<dyn AsyncRead + Send + Unpin>;

/// Open the configured portal source
pub async fn open_source(config: &Config) -> anyhow::Result<PortalStream> {
    match config.source_mode() {
        SourceMode::Serial => {
            let port = tokio_serial::new(config.serial_device(), config.serial_baud())
                .timeout(Duration::from_millis(100))
                .open_native_async()
                .with_context(|| format!("Failed to open serial port {}", config.serial_device()))?;
            info!(
                device = %config.serial_device(),
                baud = %config.serial_baud(),
                "portal_source_opened"
            );
            Ok(Box::new(port))
        }
        SourceMode::Tcp => {
            let connect = TcpStream::connect(config.tcp_addr());
            let stream = tokio::time::timeout(config.connect_timeout(), connect)
                .await
                .with_context(|| format!("Timed out connecting to {}", config.tcp_addr()))?
                .with_context(|| format!("Failed to connect to {}", config.tcp_addr()))?;
            stream.set_nodelay(true).ok();
            info!(addr = %config.tcp_addr(), "portal_source_opened");
            Ok(Box::new(stream))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::framer::LineFramer;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_open_tcp_source_reads_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"GB,1,2,3,4\n").await.unwrap();
        });

        let config = Config::default().with_tcp_source(&addr.to_string());
        let stream = open_source(&config).await.unwrap();
        let mut framer = LineFramer::new(stream);
        assert_eq!(framer.next_line().await.unwrap().as_deref(), Some("GB,1,2,3,4"));
    }

    #[tokio::test]
    async fn test_open_tcp_source_refused() {
        // Bind then drop to get a port nobody listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let config = Config::default().with_tcp_source(&addr.to_string());
        assert!(open_source(&config).await.is_err());
    }
}
