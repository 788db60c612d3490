pub mod connection;
pub mod framing;
pub mod protocol;
pub mod sync;
pub mod tls;
pub mod transport;
pub mod world_session;
