//! Connection multiplexer.
//!
//! One dispatcher loop owns the [`Router`] and waits on four sources at once:
//! the shutdown signal, the listening socket, events from connection reader
//! tasks, and the operator console input. Reader tasks only read their half
//! of a socket and forward what they see; every write and every change to the
//! registry or history happens in the dispatcher.
//!
//! A connection moves through three states: connecting (accepted, reader
//! task waiting for the handshake line), active (registered with the router)
//! and closed. Connecting and active connections together never exceed the
//! configured capacity; anything accepted past that is closed immediately.
//!
//! Lines are carried as raw bytes from the socket to every receiver.

use std::{collections::HashMap, future::Future, net::SocketAddr};

use anyhow::Result;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader},
    net::{TcpListener, TcpStream, tcp::OwnedWriteHalf},
    select,
    sync::mpsc,
    task::AbortHandle,
};
use tracing::{debug, info, warn};

use crate::{
    config::RelayConfig,
    console::OperatorConsole,
    protocol::{ClientId, MAX_HANDSHAKE, MAX_LINE, parse_handshake, read_bounded_line},
    registry::{Connection, ConnectionId, RegistryError},
    router::Router,
};

/// Reader tasks block on a full queue, so a flood from one peer cannot grow
/// memory without bound.
const EVENT_QUEUE: usize = 256;

enum Event {
    Joined {
        connection: ConnectionId,
        identity: ClientId,
        writer: OwnedWriteHalf,
    },
    Line {
        connection: ConnectionId,
        line: Vec<u8>,
    },
    Closed {
        connection: ConnectionId,
    },
}

pub struct Relay {
    listener: TcpListener,
    router: Router<OwnedWriteHalf>,
    connecting: HashMap<ConnectionId, AbortHandle>,
    next_connection: u64,
}

impl Relay {
    pub fn new(listener: TcpListener, config: &RelayConfig) -> Self {
        Self {
            listener,
            router: Router::new(config.history_capacity, config.max_connections),
            connecting: HashMap::new(),
            next_connection: 1,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs without an operator console until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.run_with_console(shutdown, tokio::io::empty(), tokio::io::sink())
            .await
    }

    /// Runs with the operator console on stdin/stdout until Ctrl-C.
    pub async fn run_until_ctrl_c(self) -> Result<()> {
        let shutdown = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        };
        self.run_with_console(shutdown, tokio::io::stdin(), tokio::io::stdout())
            .await
    }

    pub async fn run_with_console<F, I, O>(mut self, shutdown: F, input: I, output: O) -> Result<()>
    where
        F: Future<Output = ()>,
        I: AsyncRead + Unpin,
        O: AsyncWrite + Unpin,
    {
        tokio::pin!(shutdown);
        let (events_tx, mut events_rx) = mpsc::channel(EVENT_QUEUE);
        let mut console = OperatorConsole::new(output);
        let mut operator = BufReader::new(input).lines();
        let mut operator_open = true;

        loop {
            select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => {
                    self.handle_accept(accepted, &events_tx);
                }
                Some(event) = events_rx.recv() => {
                    self.handle_event(event).await;
                }
                line = operator.next_line(), if operator_open => {
                    operator_open = handle_operator_line(line, &mut console, &self.router).await;
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    fn handle_accept(
        &mut self,
        accepted: std::io::Result<(TcpStream, SocketAddr)>,
        events: &mpsc::Sender<Event>,
    ) {
        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(error = ?err, "failed to accept connection");
                return;
            }
        };

        let open = self.connecting.len() + self.router.registry().len();
        if open >= self.router.registry().capacity() {
            warn!(%peer, open, "at capacity, closing new connection");
            drop(stream);
            return;
        }

        let connection = ConnectionId(self.next_connection);
        self.next_connection += 1;
        debug!(%connection, %peer, "connection accepted");

        let reader = tokio::spawn(read_connection(connection, stream, events.clone()));
        self.connecting.insert(connection, reader.abort_handle());
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Joined {
                connection,
                identity,
                writer,
            } => self.handle_joined(connection, identity, writer),
            Event::Line { connection, line } => {
                let outcome = self.router.dispatch(connection, &line).await;
                debug!(%connection, ?outcome, "line dispatched");
            }
            Event::Closed { connection } => self.handle_closed(connection),
        }
    }

    fn handle_joined(
        &mut self,
        connection: ConnectionId,
        identity: ClientId,
        writer: OwnedWriteHalf,
    ) {
        let Some(reader) = self.connecting.remove(&connection) else {
            return;
        };

        let entry = Connection::new(identity, writer).with_reader(reader);
        match self.router.admit(connection, entry) {
            Ok(()) => info!(%connection, %identity, "client joined"),
            Err(err @ RegistryError::Full { .. }) => {
                warn!(%connection, %identity, error = %err, "rejecting connection");
            }
            Err(err) => warn!(%connection, error = %err, "failed to register connection"),
        }
    }

    fn handle_closed(&mut self, connection: ConnectionId) {
        if let Some(identity) = self.router.release(connection) {
            info!(%connection, %identity, "client disconnected");
        } else if self.connecting.remove(&connection).is_some() {
            debug!(%connection, "connection closed before handshake");
        }
    }

    fn shutdown(self) {
        let Relay {
            listener,
            router,
            connecting,
            ..
        } = self;

        for reader in connecting.into_values() {
            reader.abort();
        }
        drop(listener);

        let (connections, history) = router.shutdown();
        info!(connections, history, "relay shut down");
    }
}

async fn handle_operator_line<O, W>(
    line: std::io::Result<Option<String>>,
    console: &mut OperatorConsole<O>,
    router: &Router<W>,
) -> bool
where
    O: AsyncWrite + Unpin,
{
    match line {
        Ok(Some(line)) => {
            if let Err(err) = console.handle_line(&line, router).await {
                warn!(error = ?err, "failed to write console output");
            }
            true
        }
        Ok(None) => {
            debug!("operator input closed");
            false
        }
        Err(err) => {
            warn!(error = ?err, "failed to read operator input");
            false
        }
    }
}

/// Reads the handshake and then every line from one connection, forwarding
/// them to the dispatcher. Ends with `Closed` on EOF or a read error.
async fn read_connection(connection: ConnectionId, stream: TcpStream, events: mpsc::Sender<Event>) {
    let peer = stream.peer_addr().ok();
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let identity = match read_handshake(&mut reader).await {
        Some(identity) => identity,
        None => {
            debug!(%connection, ?peer, "no handshake received");
            let _ = events.send(Event::Closed { connection }).await;
            return;
        }
    };

    let joined = Event::Joined {
        connection,
        identity,
        writer,
    };
    if events.send(joined).await.is_err() {
        return;
    }

    loop {
        let event = match read_bounded_line(&mut reader, MAX_LINE).await {
            Ok(Some(line)) => Event::Line { connection, line },
            Ok(None) => Event::Closed { connection },
            Err(err) => {
                debug!(%connection, ?peer, error = ?err, "read failed");
                Event::Closed { connection }
            }
        };

        let closed = matches!(event, Event::Closed { .. });
        if events.send(event).await.is_err() || closed {
            return;
        }
    }
}

async fn read_handshake<R>(reader: &mut R) -> Option<ClientId>
where
    R: AsyncBufRead + Unpin,
{
    match read_bounded_line(reader, MAX_HANDSHAKE).await {
        Ok(Some(line)) => Some(parse_handshake(&String::from_utf8_lossy(&line))),
        Ok(None) => None,
        Err(err) => {
            debug!(error = ?err, "handshake read failed");
            None
        }
    }
}
