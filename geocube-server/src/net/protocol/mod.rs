mod connection;

pub use connection::{handshake_version, Connection};
