//! Network Module
//!
//! Handles TCP communication between sites.

pub mod protocol;
mod server;
mod client;

pub use protocol::{ErrorCode, FrameHeader, Message};
pub use server::NetworkServer;
pub use client::NetworkClient;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Point-to-point request/response delivery between sites
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request to the site at `address` and wait for its reply
    async fn call(&self, address: &str, request: Message) -> Result<Message>;
}

/// Call a peer, giving up after `limit`
pub async fn call_with_timeout(
    transport: &dyn Transport,
    address: &str,
    request: Message,
    limit: Duration,
) -> Result<Message> {
    match tokio::time::timeout(limit, transport.call(address, request)).await {
        Ok(result) => result,
        Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
    }
}

/// Read a framed message from a reader
pub async fn read_message<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
    use tokio::io::AsyncReadExt;

    // Read header
    let mut header_bytes = [0u8; FrameHeader::SIZE];
    reader.read_exact(&mut header_bytes).await?;
    let header = FrameHeader::from_bytes(&header_bytes);

    if header.length > protocol::MAX_FRAME_SIZE {
        return Err(Error::Protocol(format!(
            "frame of {} bytes exceeds limit",
            header.length
        )));
    }

    // Read body
    let mut body = vec![0u8; header.length as usize];
    reader.read_exact(&mut body).await?;

    // Verify checksum
    let computed_checksum = crc32fast::hash(&body);
    if computed_checksum != header.checksum {
        return Err(Error::Protocol("Message checksum mismatch".into()));
    }

    let message = Message::deserialize(&body)?;
    Ok(message)
}

/// Write a framed message to a writer
pub async fn write_message<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let body = message.serialize()?;
    let header = FrameHeader::new(&body);

    writer.write_all(&header.to_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_frame_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        write_message(&mut a, &Message::Ping { requester_id: 2 }).await.unwrap();
        let received = read_message(&mut b).await.unwrap();

        assert_eq!(received, Message::Ping { requester_id: 2 });
    }

    #[tokio::test]
    async fn test_checksum_mismatch() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        let body = Message::Election { invoker_id: 1 }.serialize().unwrap();
        let mut header = FrameHeader::new(&body);
        header.checksum ^= 0xdead_beef;
        a.write_all(&header.to_bytes()).await.unwrap();
        a.write_all(&body).await.unwrap();

        let result = read_message(&mut b).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_oversized_frame() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        let header = FrameHeader {
            length: protocol::MAX_FRAME_SIZE + 1,
            checksum: 0,
        };
        a.write_all(&header.to_bytes()).await.unwrap();

        let result = read_message(&mut b).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    struct Stalled;

    #[async_trait]
    impl Transport for Stalled {
        async fn call(&self, _address: &str, _request: Message) -> Result<Message> {
            futures::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_call_with_timeout() {
        let result = call_with_timeout(
            &Stalled,
            "10.0.0.9:3000",
            Message::Ping { requester_id: 1 },
            Duration::from_millis(20),
        )
        .await;

        assert!(matches!(result, Err(Error::ConnectionTimeout(ref a)) if a == "10.0.0.9:3000"));
    }
}
