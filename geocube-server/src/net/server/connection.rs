use std::net::SocketAddr;
use std::sync::Arc;

use log::info;
use tokio::net::TcpStream;
use tokio::sync::broadcast::Receiver;

use crate::messages::Message;
use crate::net::protocol::{handshake_version, Connection};
use crate::net::WorkerError;
use crate::worker::Worker;

pub async fn handle_connection(
    con: TcpStream,
    worker: Arc<Worker>,
    mut shutdown: Receiver<()>,
) -> Result<(), WorkerError> {
    let addr: SocketAddr = con.peer_addr()?;
    info!("new connection: {addr}");
    con.set_nodelay(true)?;

    let mut con = Connection::new(con, addr, &mut shutdown).await?;
    handshake_version(&mut con, &mut shutdown).await?;

    while let Some(msg) = con.read_message_or_eof(&mut shutdown).await? {
        match worker.handle_message(msg).await {
            Ok(Some(reply)) => con.write_message(&reply).await?,
            Ok(None) => {}
            Err(e) => {
                con.write_message(&Message::Error {
                    message: e.to_string(),
                })
                .await?;
            }
        }
    }
    Ok(())
}
