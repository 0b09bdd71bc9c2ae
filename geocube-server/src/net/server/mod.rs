mod connection;

use std::sync::Arc;

use log::{error, info};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::broadcast::Receiver;

use crate::net::server::connection::handle_connection;
use crate::net::WorkerError;
use crate::worker::Worker;

/// Accepts connections until `shutdown_receiver` fires, then stops
/// accepting and waits for in-flight connections to finish (a second
/// shutdown signal force-closes them instead).
pub async fn serve<A>(
    addr: A,
    worker: Arc<Worker>,
    mut shutdown_receiver: Receiver<()>,
) -> Result<(), WorkerError>
where
    A: ToSocketAddrs,
{
    let listener = TcpListener::bind(addr).await?;
    info!("ready to accept connections at {}", listener.local_addr()?);

    let (connections_alive_sender, mut connections_alive_receiver) = tokio::sync::mpsc::channel::<()>(1);
    let (connection_shutdown_broadcast, _) = tokio::sync::broadcast::channel(1);

    loop {
        let accepted = tokio::select! {
            _ = shutdown_receiver.recv() => {
                info!("shutdown: no longer accepting new connections");
                drop(listener);

                info!("shutdown: waiting for connected clients to disconnect (press again to force-close)");
                drop(connections_alive_sender);
                loop {
                    tokio::select! {
                        _ = connections_alive_receiver.recv() => {
                            info!("shutdown: all connections closed");
                            return Ok(());
                        }
                        _ = shutdown_receiver.recv() => {
                            info!("shutdown: force-closing connections");
                            connection_shutdown_broadcast.send(()).ok();
                        }
                    }
                }
            }
            a = listener.accept() => a,
        };

        let (stream, addr) = accepted?;
        let worker = Arc::clone(&worker);
        let connections_alive_sender = connections_alive_sender.clone();
        let connection_shutdown_receiver = connection_shutdown_broadcast.subscribe();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, worker, connection_shutdown_receiver).await {
                error!("{addr}: {e}");
            }
            info!("{addr}: disconnect");
            drop(connections_alive_sender);
        });
    }
}
