//! In-memory broadcast relay for line-oriented TCP peers.
//!
//! Every peer announces a numeric identity on its first line. After that each
//! line it sends is tagged with that identity, kept in a bounded replay
//! history and written to every other connected peer. See `README.md` for the
//! wire protocol.
//!
//! - [`relay`] is the dispatcher loop: accepts connections, runs their reader
//!   tasks and feeds the operator console.
//! - [`router`] owns the [`registry`] and the [`history`] and decides what a
//!   line means: `health`, `viewlist` or a broadcast.
//! - [`protocol`] holds the handshake parser, line classification and
//!   bounded line reads.
//! - [`console`] interprets operator commands from stdin.
//! - [`cli`] and [`config`] turn flags and environment variables into a
//!   validated [`config::RelayConfig`].
//! - [`client`] is a minimal terminal peer.

pub mod cli;
pub mod client;
pub mod config;
pub mod console;
pub mod history;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod router;
