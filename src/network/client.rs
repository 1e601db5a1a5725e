//! Network Client
//!
//! TCP client for calling other sites. Every call opens its own
//! connection, so calls to different sites never share state.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{read_message, write_message, Message, Transport};
use crate::error::{Error, Result};

/// Network client for calling peer sites
#[derive(Debug, Clone)]
pub struct NetworkClient {
    /// Connection timeout
    connect_timeout: Duration,
    /// Request timeout (whole exchange, including connect)
    request_timeout: Duration,
}

impl NetworkClient {
    /// Create a new network client
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }

    /// Send a message to a peer and wait for response
    pub async fn send(&self, address: &str, message: Message) -> Result<Message> {
        let result = timeout(
            self.request_timeout,
            self.send_inner(address, message),
        ).await;

        match result {
            Ok(inner_result) => inner_result,
            Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
        }
    }

    /// Send without timeout wrapper
    async fn send_inner(&self, address: &str, message: Message) -> Result<Message> {
        let mut stream = self.connect(address).await?;
        let (mut reader, mut writer) = stream.split();

        tracing::trace!("Sending {} to {}", message.type_name(), address);
        write_message(&mut writer, &message).await?;
        let response = read_message(&mut reader).await?;

        Ok(response)
    }

    /// Connect to an address
    async fn connect(&self, address: &str) -> Result<TcpStream> {
        let result = timeout(
            self.connect_timeout,
            TcpStream::connect(address),
        ).await;

        match result {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            Ok(Err(e)) => Err(Error::ConnectionFailed {
                address: address.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
        }
    }
}

#[async_trait]
impl Transport for NetworkClient {
    async fn call(&self, address: &str, request: Message) -> Result<Message> {
        self.send(address, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connection_failure() {
        // Grab a free port, then close it so nothing is listening there
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = NetworkClient::new(
            Duration::from_millis(100),
            Duration::from_millis(500),
        );

        let result = client.send(&address, Message::StatusRequest).await;
        assert!(result.unwrap_err().is_unreachable());
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        // Accept and hold the socket without ever replying
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            futures::future::pending::<()>().await;
        });

        let client = NetworkClient::new(
            Duration::from_millis(200),
            Duration::from_millis(100),
        );

        let result = client.send(&address, Message::Ping { requester_id: 1 }).await;
        assert!(matches!(result, Err(Error::ConnectionTimeout(_))));
    }
}
