use std::collections::HashMap;

use log::error;
use tokio::net::TcpStream;
use tokio::runtime::Handle;

use crate::messages::Message;
use crate::net::protocol::{handshake_version, Connection};
use crate::net::WorkerError;
use crate::worker::PeerSender;

/// Looks up a peer worker's address by id and fires a one-shot
/// connection at it. `send` itself is synchronous (the `PeerSender`
/// contract doesn't allow awaiting), so the actual I/O runs on a
/// spawned task; failures are logged rather than surfaced to the
/// caller, matching a fire-and-forget peer request.
pub struct TcpPeerSender {
    addresses: HashMap<String, String>,
    runtime: Handle,
}

impl TcpPeerSender {
    pub fn new(addresses: HashMap<String, String>, runtime: Handle) -> Self {
        TcpPeerSender { addresses, runtime }
    }
}

impl PeerSender for TcpPeerSender {
    fn send(&self, peer_id: &str, msg: Message) -> Result<(), WorkerError> {
        let addr = self
            .addresses
            .get(peer_id)
            .ok_or_else(|| WorkerError::UnknownPeer(peer_id.to_string()))?
            .clone();
        let peer_id = peer_id.to_string();
        self.runtime.spawn(async move {
            if let Err(e) = deliver(&addr, msg).await {
                error!("failed to deliver message to peer {peer_id} at {addr}: {e}");
            }
        });
        Ok(())
    }
}

async fn deliver(addr: &str, msg: Message) -> Result<(), WorkerError> {
    let stream = TcpStream::connect(addr).await?;
    let peer_addr = stream.peer_addr()?;
    let (_tx, mut shutdown) = tokio::sync::broadcast::channel(1);
    let mut con = Connection::new(stream, peer_addr, &mut shutdown).await?;
    handshake_version(&mut con, &mut shutdown).await?;
    con.write_message(&msg).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::QueryRequest;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn delivers_message_after_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, peer_addr) = listener.accept().await.unwrap();
            let (_tx, mut shutdown) = tokio::sync::broadcast::channel(1);
            let mut con = Connection::new(stream, peer_addr, &mut shutdown).await.unwrap();
            handshake_version(&mut con, &mut shutdown).await.unwrap();
            con.read_message(&mut shutdown).await.unwrap()
        });

        let mut addresses = HashMap::new();
        addresses.insert("peer-a".to_string(), addr.to_string());
        let sender = TcpPeerSender::new(addresses, tokio::runtime::Handle::current());
        sender
            .send(
                "peer-a",
                Message::Query(QueryRequest::Equality {
                    dims: vec![0],
                    vals: vec![1.0],
                }),
            )
            .unwrap();

        let received = server.await.unwrap();
        assert!(matches!(received, Message::Query(QueryRequest::Equality { .. })));
    }

    #[test]
    fn unknown_peer_fails_without_connecting() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let sender = TcpPeerSender::new(HashMap::new(), rt.handle().clone());
        let err = sender
            .send("nobody", Message::Error { message: "x".into() })
            .unwrap_err();
        assert!(matches!(err, WorkerError::UnknownPeer(_)));
    }
}
