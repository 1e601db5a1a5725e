//! Network Server
//!
//! TCP server for accepting calls from other sites.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use super::{read_message, write_message};
use crate::error::{Error, Result};
use crate::state::ElectionEngine;

/// Network server serving the election protocol
pub struct NetworkServer {
    /// Bound listener
    listener: TcpListener,
    /// Engine that answers inbound requests
    engine: Arc<ElectionEngine>,
    /// Shutdown signal
    shutdown: watch::Sender<bool>,
}

impl NetworkServer {
    /// Bind the listening endpoint.
    ///
    /// Failure here is fatal for the site: it cannot take part in
    /// elections without being reachable.
    pub async fn bind(bind_address: &str, engine: Arc<ElectionEngine>) -> Result<Self> {
        let listener = TcpListener::bind(bind_address)
            .await
            .map_err(|source| Error::Bind {
                address: bind_address.to_string(),
                source,
            })?;
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            listener,
            engine,
            shutdown,
        })
    }

    /// Address actually bound (useful when binding port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle that stops the accept loop when sent `true`
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown.clone()
    }

    /// Accept connections until shut down
    pub async fn serve(&self) -> Result<()> {
        tracing::info!(
            "Site {} serving election protocol on {}",
            self.engine.site_id(),
            self.local_addr()?
        );

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let peer_addr = addr.to_string();
                            let engine = Arc::clone(&self.engine);

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(socket, peer_addr.clone(), engine).await {
                                    tracing::warn!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Network server stopped");
        Ok(())
    }

    /// Stop the server
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Handle a single connection
async fn handle_connection(
    socket: TcpStream,
    peer_addr: String,
    engine: Arc<ElectionEngine>,
) -> Result<()> {
    let (mut reader, mut writer) = socket.into_split();

    loop {
        match read_message(&mut reader).await {
            Ok(message) => {
                tracing::trace!("Received {} from {}", message.type_name(), peer_addr);

                let response = engine.dispatch(message).await;
                write_message(&mut writer, &response).await?;
            }
            Err(Error::Io(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                // Connection closed
                break;
            }
            Err(e) => {
                tracing::warn!("Error reading message from {}: {}", peer_addr, e);
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::network::{Message, NetworkClient};
    use crate::state::{
        CoordinatorClient, ElectionConfig, ElectionOutcome, ElectionPhase, HeartbeatOutcome,
        PeerRegistry, Site,
    };

    fn engine_for(site_id: u32, sites: Vec<Site>) -> Arc<ElectionEngine> {
        let registry = Arc::new(PeerRegistry::new(sites).unwrap());
        let transport = Arc::new(NetworkClient::new(
            Duration::from_millis(200),
            Duration::from_millis(500),
        ));
        Arc::new(ElectionEngine::new(
            site_id,
            registry.highest(),
            registry,
            transport,
            ElectionConfig {
                call_timeout: Duration::from_millis(500),
            },
        ).unwrap())
    }

    #[tokio::test]
    async fn test_bind_conflict_is_fatal() {
        let engine = engine_for(1, vec![Site::new(1, "127.0.0.1:0")]);
        let first = NetworkServer::bind("127.0.0.1:0", Arc::clone(&engine)).await.unwrap();
        let taken = first.local_addr().unwrap().to_string();

        let err = NetworkServer::bind(&taken, engine).await.err().unwrap();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_status_over_tcp() {
        let engine = engine_for(1, vec![Site::new(1, "127.0.0.1:0"), Site::new(2, "127.0.0.1:0")]);
        let server = Arc::new(NetworkServer::bind("127.0.0.1:0", engine).await.unwrap());
        let address = server.local_addr().unwrap().to_string();

        let serving = Arc::clone(&server);
        let handle = tokio::spawn(async move { serving.serve().await });

        let client = NetworkClient::new(Duration::from_millis(200), Duration::from_millis(500));
        let reply = client.send(&address, Message::StatusRequest).await.unwrap();
        assert_eq!(
            reply,
            Message::StatusResponse {
                site_id: 1,
                coordinator_id: 2,
                phase: ElectionPhase::Idle,
                epoch: 0,
            }
        );

        let reply = client.send(&address, Message::Ping { requester_id: 2 }).await.unwrap();
        assert_eq!(reply, Message::PingResponse { ok: true });

        server.stop();
        handle.await.unwrap().unwrap();
    }

    /// Pick a free local port by binding and releasing it
    async fn free_address() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_election_over_tcp() {
        let mut sites = Vec::new();
        for id in 1..=4 {
            sites.push(Site::new(id, free_address().await));
        }

        // Site 4 is configured as coordinator but nothing listens there
        let mut engines = Vec::new();
        let mut servers = Vec::new();
        for site in &sites[..3] {
            let engine = engine_for(site.id, sites.clone());
            let server = Arc::new(NetworkServer::bind(&site.address, Arc::clone(&engine)).await.unwrap());
            let serving = Arc::clone(&server);
            let handle = tokio::spawn(async move { serving.serve().await });
            engines.push(engine);
            servers.push((server, handle));
        }

        let client = CoordinatorClient::new(Arc::clone(&engines[0]));
        match client.heartbeat().await {
            HeartbeatOutcome::Failed { coordinator_id, election } => {
                assert_eq!(coordinator_id, 4);
                assert!(!matches!(election, ElectionOutcome::Promoted { .. }));
            }
            other => panic!("expected failure, got {:?}", other),
        }

        let mut settled = false;
        for _ in 0..100 {
            let mut agreed = true;
            for engine in &engines {
                let snapshot = engine.snapshot().await;
                if snapshot.coordinator_id != 3 || snapshot.phase == ElectionPhase::ElectionInProgress {
                    agreed = false;
                }
            }
            if agreed {
                settled = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(settled, "sites never agreed on coordinator 3");

        assert_eq!(engines[2].phase().await, ElectionPhase::Coordinator);
        assert_eq!(engines[0].phase().await, ElectionPhase::Idle);
        assert_eq!(engines[1].phase().await, ElectionPhase::Idle);
        assert_eq!(client.heartbeat().await, HeartbeatOutcome::Alive { coordinator_id: 3 });

        for (server, handle) in servers {
            server.stop();
            handle.await.unwrap().unwrap();
        }
    }
}
