//! Wire bridge between driver and remote.
//!
//! Everything that crosses the loopback socket goes through here:
//!
//! - **channel**: packet-count-handshake framing over a byte stream
//! - **protocol**: command/result wire strings and the operation table

pub mod channel;
pub mod protocol;
