use std::io::ErrorKind;
use std::net::SocketAddr;

use bytes::{Buf, BytesMut};
use log::trace;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::broadcast::Receiver;

use crate::messages::Message;
use crate::net::{WorkerError, PROTOCOL_VERSION};

pub struct Connection<Stream> {
    stream: Stream,
    peer_addr: SocketAddr,
    buffer: BytesMut,
}

const HEADER_SIZE: usize = 8;
const MAGIC_NUMBER: &[u8] = "geocube wire protocol".as_bytes();

#[derive(Error, Debug)]
#[error("the connection was closed unexpectedly")]
struct ConnectionClosedError;

#[derive(Error, Debug)]
#[error("protocol mismatch: the peer does not speak the geocube wire protocol")]
struct ProtocolMismatchError;

impl<Stream> Connection<Stream>
where
    Stream: AsyncRead + AsyncWrite + Unpin,
{
    pub async fn new(
        stream: Stream,
        peer_addr: SocketAddr,
        shutdown: &mut Receiver<()>,
    ) -> Result<Self, WorkerError> {
        let mut con = Connection {
            stream,
            peer_addr,
            buffer: BytesMut::new(),
        };
        con.write_magic_number().await?;
        con.read_magic_number(shutdown).await?;
        Ok(con)
    }

}

impl<Stream> Connection<Stream>
where
    Stream: AsyncRead + Unpin,
{
    async fn read_magic_number(&mut self, shutdown: &mut Receiver<()>) -> Result<(), WorkerError> {
        let mut read_buffer = vec![0; MAGIC_NUMBER.len()];
        tokio::select! {
            result = self.stream.read_exact(read_buffer.as_mut_slice()) => match result {
                Ok(_) => {}
                Err(e) => {
                    if e.kind() == ErrorKind::UnexpectedEof {
                        return Err(WorkerError::WireProtocol(Box::new(e)));
                    } else {
                        return Err(WorkerError::Net(e));
                    }
                }
            },
            _ = shutdown.recv() => return Err(WorkerError::ServerShutdown),
        }
        if MAGIC_NUMBER != read_buffer {
            return Err(WorkerError::WireProtocol(Box::new(ProtocolMismatchError)));
        }
        Ok(())
    }

    fn try_read_frame(&mut self) -> Option<Result<Message, WorkerError>> {
        let len = if self.buffer.len() >= HEADER_SIZE {
            let mut len_bytes = [0_u8; HEADER_SIZE];
            len_bytes.copy_from_slice(&self.buffer[..HEADER_SIZE]);
            u64::from_le_bytes(len_bytes) as usize
        } else {
            return None;
        };

        if self.buffer.len() < HEADER_SIZE + len {
            return None;
        }
        let data = &self.buffer[HEADER_SIZE..HEADER_SIZE + len];
        let message: Result<Message, WorkerError> = serde_json::from_slice(data)
            .map_err(|e| WorkerError::WireProtocol(Box::new(e)));
        self.buffer.advance(HEADER_SIZE + len);

        trace!("{}: receive message: {:?}", &self.peer_addr, &message);
        match message {
            Ok(Message::Error { message }) => Some(Err(WorkerError::PeerError(message))),
            other => Some(other),
        }
    }

    pub async fn read_message_or_eof(
        &mut self,
        shutdown: &mut Receiver<()>,
    ) -> Result<Option<Message>, WorkerError> {
        loop {
            if let Some(result) = self.try_read_frame() {
                return result.map(Some);
            }

            let bytes_read = tokio::select! {
                read_buf_result = self.stream.read_buf(&mut self.buffer) => read_buf_result?,
                _ = shutdown.recv() => return Err(WorkerError::ServerShutdown),
            };
            if bytes_read == 0 {
                return if !self.buffer.is_empty() {
                    Err(WorkerError::WireProtocol(Box::new(ConnectionClosedError)))
                } else {
                    Ok(None)
                };
            }
        }
    }

    pub async fn read_message(&mut self, shutdown: &mut Receiver<()>) -> Result<Message, WorkerError> {
        match self.read_message_or_eof(shutdown).await? {
            Some(msg) => Ok(msg),
            None => Err(WorkerError::Protocol(format!("{}", ConnectionClosedError))),
        }
    }
}

impl<Stream> Connection<Stream>
where
    Stream: AsyncWrite + Unpin,
{
    async fn write_magic_number(&mut self) -> Result<(), WorkerError> {
        self.stream.write_all(MAGIC_NUMBER).await?;
        Ok(())
    }

    pub async fn write_message(&mut self, message: &Message) -> Result<(), WorkerError> {
        trace!("send to {}: {:?}", &self.peer_addr, message);

        let payload = serde_json::to_vec(message)
            .map_err(|e| WorkerError::WireProtocol(Box::new(e)))?;
        let len = payload.len() as u64;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);

        self.stream.write_all(&data).await?;
        Ok(())
    }
}

impl Connection<TcpStream> {
    pub fn into_split(self) -> (Connection<OwnedReadHalf>, Connection<OwnedWriteHalf>) {
        let (read_half, write_half) = self.stream.into_split();
        (
            Connection {
                stream: read_half,
                peer_addr: self.peer_addr,
                buffer: self.buffer,
            },
            Connection {
                stream: write_half,
                peer_addr: self.peer_addr,
                buffer: Default::default(),
            },
        )
    }
}

/// Exchanges `Hello` messages right after the magic-number handshake and
/// checks that both sides speak the same protocol version.
pub async fn handshake_version<Stream>(
    con: &mut Connection<Stream>,
    shutdown: &mut Receiver<()>,
) -> Result<(), WorkerError>
where
    Stream: AsyncRead + AsyncWrite + Unpin,
{
    con.write_message(&Message::Hello {
        protocol_version: PROTOCOL_VERSION,
    })
    .await?;
    match con.read_message(shutdown).await? {
        Message::Hello { protocol_version } if protocol_version == PROTOCOL_VERSION => Ok(()),
        Message::Hello { protocol_version } => Err(WorkerError::Protocol(format!(
            "protocol version mismatch (ours: {PROTOCOL_VERSION}, peer's: {protocol_version})"
        ))),
        _ => Err(WorkerError::Protocol("expected a Hello message".into())),
    }
}
