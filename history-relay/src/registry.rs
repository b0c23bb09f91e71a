use std::{
    collections::{HashMap, hash_map},
    fmt,
};

use thiserror::Error;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    task::AbortHandle,
};

use crate::protocol::ClientId;

/// Handle assigned to every accepted connection. Never reused within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("relay is full ({capacity} active connections)")]
    Full { capacity: usize },
    #[error("connection {0} is already registered")]
    Duplicate(ConnectionId),
}

/// An active connection: its identity, the write half the router delivers
/// to, and the reader task feeding the dispatcher.
///
/// Dropping a connection closes it: the writer is dropped and the reader task
/// is aborted.
pub struct Connection<W> {
    identity: ClientId,
    writer: W,
    reader: Option<AbortHandle>,
}

impl<W> Connection<W> {
    pub fn new(identity: ClientId, writer: W) -> Self {
        Self {
            identity,
            writer,
            reader: None,
        }
    }

    pub fn with_reader(mut self, reader: AbortHandle) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn identity(&self) -> ClientId {
        self.identity
    }
}

impl<W: AsyncWrite + Unpin> Connection<W> {
    pub async fn send(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await
    }
}

impl<W> Drop for Connection<W> {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Capacity-bounded table of active connections keyed by handle.
pub struct ClientRegistry<W> {
    connections: HashMap<ConnectionId, Connection<W>>,
    capacity: usize,
}

impl<W> ClientRegistry<W> {
    pub fn new(capacity: usize) -> Self {
        Self {
            connections: HashMap::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Admits `connection` under `handle`.
    ///
    /// On error the connection is dropped, which closes it without telling
    /// the peer anything.
    pub fn register(
        &mut self,
        handle: ConnectionId,
        connection: Connection<W>,
    ) -> Result<(), RegistryError> {
        if self.connections.contains_key(&handle) {
            return Err(RegistryError::Duplicate(handle));
        }
        if self.connections.len() >= self.capacity {
            return Err(RegistryError::Full {
                capacity: self.capacity,
            });
        }

        self.connections.insert(handle, connection);
        Ok(())
    }

    /// Removes and closes the connection. Unknown handles are ignored.
    pub fn release(&mut self, handle: ConnectionId) -> Option<ClientId> {
        self.connections
            .remove(&handle)
            .map(|connection| connection.identity)
    }

    pub fn lookup(&self, handle: ConnectionId) -> Option<ClientId> {
        self.connections
            .get(&handle)
            .map(|connection| connection.identity)
    }

    pub fn get_mut(&mut self, handle: ConnectionId) -> Option<&mut Connection<W>> {
        self.connections.get_mut(&handle)
    }

    /// Visits every active connection once, in no particular order.
    pub fn for_each_active<F>(&self, mut visit: F)
    where
        F: FnMut(ConnectionId, &Connection<W>),
    {
        for (&handle, connection) in &self.connections {
            visit(handle, connection);
        }
    }

    pub fn iter_mut(&mut self) -> hash_map::IterMut<'_, ConnectionId, Connection<W>> {
        self.connections.iter_mut()
    }

    /// Closes every connection and returns how many were active.
    pub fn release_all(&mut self) -> usize {
        let released = self.connections.len();
        self.connections.clear();
        released
    }
}
