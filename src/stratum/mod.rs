//! Stratum mining protocol client.
//!
//! Zcash pools speak a Stratum dialect: JSON-RPC 1.0 over TCP with
//! newline-delimited messages. The client here is an active async task
//! that owns the connection, walks the subscribe/authorize handshake, and
//! pushes typed events to the coordinator via channels:
//!
//! - **Client requests**: `mining.subscribe`, `mining.authorize`,
//!   `mining.submit`
//! - **Server notifications**: `mining.set_target`, `mining.notify`
//! - **Server responses**: results for client requests
//!
//! Transient failures re-enter a reconnect loop; only conditions the
//! miner cannot recover from (a nonce prefix the solver cannot work
//! with, a protocol invariant violation) escape as fatal errors.

mod client;
mod connection;
mod error;
mod messages;

pub use client::{PoolConfig, SessionState, StratumClient};
pub use error::{StratumError, StratumResult};
pub use messages::{
    decode_message, parse_notify, parse_set_target, ClientCommand, ClientEvent, NotifyJob,
    Request, StratumMessage, SubmitParams,
};
