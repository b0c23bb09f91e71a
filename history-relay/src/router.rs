//! Line dispatch for registered connections.
//!
//! [`Router`] owns the client registry and the history buffer and is the only
//! code that mutates either. The multiplexer hands it every line read from a
//! registered connection.

use std::num::NonZeroUsize;

use tokio::io::AsyncWrite;
use tracing::{debug, warn};

use crate::{
    history::HistoryBuffer,
    protocol::{ClientId, END_MARKER, HEALTH_REPLY, Request, format_broadcast},
    registry::{ClientRegistry, Connection, ConnectionId, RegistryError},
};

/// Delivery summary for one broadcast line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteReport {
    pub delivered: usize,
    pub failed: usize,
}

/// What the router did with a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Health,
    Replayed { entries: usize },
    Broadcast(RouteReport),
    /// The sender is not registered, so the line was dropped.
    UnknownSender,
}

pub struct Router<W> {
    registry: ClientRegistry<W>,
    history: HistoryBuffer,
}

impl<W> Router<W> {
    pub fn new(history_capacity: NonZeroUsize, max_connections: usize) -> Self {
        Self {
            registry: ClientRegistry::new(max_connections),
            history: HistoryBuffer::new(history_capacity),
        }
    }

    pub fn registry(&self) -> &ClientRegistry<W> {
        &self.registry
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn admit(
        &mut self,
        handle: ConnectionId,
        connection: Connection<W>,
    ) -> Result<(), RegistryError> {
        self.registry.register(handle, connection)
    }

    pub fn release(&mut self, handle: ConnectionId) -> Option<ClientId> {
        self.registry.release(handle)
    }

    /// Closes every connection and drops the history. Returns
    /// `(connections closed, history entries released)`.
    pub fn shutdown(mut self) -> (usize, usize) {
        self.registry.for_each_active(|handle, connection| {
            debug!(%handle, identity = %connection.identity(), "closing connection");
        });
        (self.registry.release_all(), self.history.len())
    }
}

impl<W: AsyncWrite + Unpin> Router<W> {
    pub async fn dispatch(&mut self, sender: ConnectionId, line: &[u8]) -> Dispatched {
        if self.registry.lookup(sender).is_none() {
            debug!(%sender, "dropping line from unregistered connection");
            return Dispatched::UnknownSender;
        }

        match Request::classify(line) {
            Request::Health => {
                self.reply(sender, HEALTH_REPLY.as_bytes()).await;
                Dispatched::Health
            }
            Request::ViewList => self.replay(sender).await,
            Request::Chat(text) => match self.route(sender, text).await {
                Some(report) => Dispatched::Broadcast(report),
                None => Dispatched::UnknownSender,
            },
        }
    }

    /// Records `line` in the history and writes it to every active connection
    /// except `sender`. The bytes are relayed as received.
    ///
    /// Writes happen one peer at a time; a peer that stops reading stalls
    /// the whole fan-out until its socket buffer drains.
    pub async fn route(&mut self, sender: ConnectionId, line: &[u8]) -> Option<RouteReport> {
        let identity = self.registry.lookup(sender)?;
        let message = format_broadcast(identity, line);
        self.history.append(identity, line);

        let mut report = RouteReport::default();
        for (&handle, connection) in self.registry.iter_mut() {
            if handle == sender {
                continue;
            }
            match connection.send(&message).await {
                Ok(()) => report.delivered += 1,
                Err(error) => {
                    warn!(%handle, ?error, "failed to deliver broadcast");
                    report.failed += 1;
                }
            }
        }

        Some(report)
    }

    /// Sends the history to `requester`, terminated by the end marker.
    pub async fn replay(&mut self, requester: ConnectionId) -> Dispatched {
        let mut listing = self.history.render();
        listing.extend_from_slice(END_MARKER.as_bytes());
        self.reply(requester, &listing).await;

        Dispatched::Replayed {
            entries: self.history.len(),
        }
    }

    async fn reply(&mut self, handle: ConnectionId, bytes: &[u8]) {
        let Some(connection) = self.registry.get_mut(handle) else {
            return;
        };
        if let Err(error) = connection.send(bytes).await {
            warn!(%handle, ?error, "failed to reply to client");
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, DuplexStream, duplex};

    use super::*;

    fn router(history: usize, connections: usize) -> Router<DuplexStream> {
        Router::new(
            NonZeroUsize::new(history).expect("non-zero history"),
            connections,
        )
    }

    /// Registers a peer and returns the far end of its socket.
    fn join(router: &mut Router<DuplexStream>, handle: u64, identity: u32) -> DuplexStream {
        let (server_side, client_side) = duplex(4096);
        router
            .admit(
                ConnectionId(handle),
                Connection::new(ClientId(identity), server_side),
            )
            .expect("registration");
        client_side
    }

    async fn drain(mut peer: DuplexStream) -> Vec<u8> {
        let mut received = Vec::new();
        peer.read_to_end(&mut received)
            .await
            .expect("read from peer");
        received
    }

    #[tokio::test]
    async fn broadcast_skips_the_sender() {
        let mut router = router(10, 8);
        let sender = join(&mut router, 1, 42);
        let first = join(&mut router, 2, 7);
        let second = join(&mut router, 3, 8);

        let outcome = router.dispatch(ConnectionId(1), b"hello\n").await;
        assert_eq!(
            outcome,
            Dispatched::Broadcast(RouteReport {
                delivered: 2,
                failed: 0
            })
        );
        drop(router);

        assert_eq!(drain(sender).await, b"");
        assert_eq!(drain(first).await, b"cli-0042 says: hello\n");
        assert_eq!(drain(second).await, b"cli-0042 says: hello\n");
    }

    #[tokio::test]
    async fn broken_peer_does_not_block_the_rest() {
        let mut router = router(10, 8);
        let _sender = join(&mut router, 1, 1);
        let healthy = join(&mut router, 2, 2);
        drop(join(&mut router, 3, 3));
        let also_healthy = join(&mut router, 4, 4);

        let outcome = router.dispatch(ConnectionId(1), b"still here\n").await;
        assert_eq!(
            outcome,
            Dispatched::Broadcast(RouteReport {
                delivered: 2,
                failed: 1
            })
        );
        assert_eq!(router.history().len(), 1);
        drop(router);

        assert_eq!(drain(healthy).await, b"cli-0001 says: still here\n");
        assert_eq!(drain(also_healthy).await, b"cli-0001 says: still here\n");
    }

    #[tokio::test]
    async fn health_replies_without_touching_history() {
        let mut router = router(10, 8);
        let asker = join(&mut router, 1, 1);
        let bystander = join(&mut router, 2, 2);

        assert_eq!(
            router.dispatch(ConnectionId(1), b"health\n").await,
            Dispatched::Health
        );
        assert!(router.history().is_empty());
        drop(router);

        assert_eq!(drain(asker).await, b"OK\n");
        assert_eq!(drain(bystander).await, b"");
    }

    #[tokio::test]
    async fn replay_of_empty_history_sends_sentinel_and_marker() {
        let mut router = router(10, 8);
        let asker = join(&mut router, 1, 1);

        assert_eq!(
            router.dispatch(ConnectionId(1), b"viewlist\n").await,
            Dispatched::Replayed { entries: 0 }
        );
        drop(router);

        assert_eq!(drain(asker).await, b"(empty)\n<END>\n");
    }

    #[tokio::test]
    async fn replay_lists_only_the_retained_window() {
        let mut router = router(3, 8);
        let _peers: Vec<_> = (1..=4).map(|n| join(&mut router, n, n as u32)).collect();
        let asker = join(&mut router, 5, 5);

        for n in 1..=4 {
            router
                .dispatch(ConnectionId(n), format!("line from {n}\n").as_bytes())
                .await;
        }
        assert_eq!(
            router.replay(ConnectionId(5)).await,
            Dispatched::Replayed { entries: 3 }
        );
        drop(router);

        assert_eq!(
            drain(asker).await,
            b"cli-0001 says: line from 1\n\
             cli-0002 says: line from 2\n\
             cli-0003 says: line from 3\n\
             cli-0004 says: line from 4\n\
             cli-0002 says: line from 2\n\
             cli-0003 says: line from 3\n\
             cli-0004 says: line from 4\n\
             <END>\n"
        );
    }

    #[tokio::test]
    async fn lines_from_unknown_connections_are_dropped() {
        let mut router = router(10, 8);
        let peer = join(&mut router, 1, 1);

        assert_eq!(
            router.dispatch(ConnectionId(9), b"ghost\n").await,
            Dispatched::UnknownSender
        );
        assert!(router.history().is_empty());
        drop(router);

        assert_eq!(drain(peer).await, b"");
    }

    #[tokio::test]
    async fn non_utf8_lines_are_relayed_and_replayed_verbatim() {
        let mut router = router(10, 8);
        let _sender = join(&mut router, 1, 1);
        let receiver = join(&mut router, 2, 2);

        router.dispatch(ConnectionId(1), b"caf\xe9\n").await;
        router.replay(ConnectionId(2)).await;
        drop(router);

        assert_eq!(
            drain(receiver).await,
            b"cli-0001 says: caf\xe9\ncli-0001 says: caf\xe9\n<END>\n"
        );
    }
}
