//! Client side of the chat protocol: the join handshake state machine and a
//! WebSocket client that drives it.

pub mod connection;
pub mod state;
