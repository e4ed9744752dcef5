//! TCP server dispatching framed messages to a handler.

use crate::error::{NetworkError, Result};
use crate::network::rpc::{read_frame, write_frame, Message};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Handler for incoming messages.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle an incoming message and return the response frame.
    async fn handle(&self, msg: Message) -> Message;
}

/// TCP server shared by the node and proxy tiers.
///
/// Each accepted connection runs on its own task; requests on different
/// connections are processed in parallel. Shutdown closes open connections
/// as well as the listener.
pub struct NetworkServer {
    listener: TcpListener,

    local_addr: SocketAddr,

    handler: Arc<dyn MessageHandler>,

    /// Shutdown signal receiver.
    shutdown_rx: mpsc::Receiver<()>,
}

impl NetworkServer {
    /// Bind a listener. Use port 0 to let the OS pick one.
    pub async fn bind(
        bind_addr: SocketAddr,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(Self, mpsc::Sender<()>)> {
        let listener = TcpListener::bind(bind_addr).await.map_err(NetworkError::Io)?;
        let local_addr = listener.local_addr().map_err(NetworkError::Io)?;
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let server = Self {
            listener,
            local_addr,
            handler,
            shutdown_rx,
        };

        Ok((server, shutdown_tx))
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until a shutdown signal arrives.
    pub async fn run(mut self) -> Result<()> {
        info!(addr = %self.local_addr, "Network server listening");
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            debug!(peer = %peer_addr, "Accepted connection");
                            let handler = self.handler.clone();
                            connections.spawn(async move {
                                if let Err(e) = Self::handle_connection(stream, handler).await {
                                    debug!(peer = %peer_addr, error = %e, "Connection handler error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = self.shutdown_rx.recv() => {
                    info!(addr = %self.local_addr, "Network server shutting down");
                    break;
                }
            }
        }

        connections.shutdown().await;
        Ok(())
    }

    async fn handle_connection(mut stream: TcpStream, handler: Arc<dyn MessageHandler>) -> Result<()> {
        stream.set_nodelay(true).map_err(NetworkError::Io)?;
        while let Some(msg) = read_frame(&mut stream).await? {
            let response = handler.handle(msg).await;
            write_frame(&mut stream, &response).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::rpc::{NodeRequest, NodeResponse};
    use crate::types::NodeHealth;

    struct HealthyHandler;

    #[async_trait]
    impl MessageHandler for HealthyHandler {
        async fn handle(&self, _msg: Message) -> Message {
            Message::NodeResponse(NodeResponse::Health(NodeHealth {
                healthy: true,
                message: "ok".into(),
            }))
        }
    }

    #[tokio::test]
    async fn test_server_serves_multiple_frames_per_connection() {
        let (server, shutdown_tx) =
            NetworkServer::bind("127.0.0.1:0".parse().unwrap(), Arc::new(HealthyHandler))
                .await
                .unwrap();
        let addr = server.local_addr();
        let server_handle = tokio::spawn(server.run());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        for _ in 0..3 {
            write_frame(&mut stream, &Message::NodeRequest(NodeRequest::Health))
                .await
                .unwrap();
            let reply = read_frame(&mut stream).await.unwrap();
            assert!(matches!(
                reply,
                Some(Message::NodeResponse(NodeResponse::Health(NodeHealth { healthy: true, .. })))
            ));
        }

        let _ = shutdown_tx.send(()).await;
        let _ = server_handle.await;

        // The open connection is closed along with the listener.
        let closed = write_frame(&mut stream, &Message::NodeRequest(NodeRequest::Health)).await;
        let reply = match closed {
            Ok(()) => read_frame(&mut stream).await,
            Err(e) => Err(e),
        };
        assert!(!matches!(reply, Ok(Some(_))));
    }
}
