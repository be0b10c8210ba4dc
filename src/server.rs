use std::{
    collections::HashMap,
    fmt,
    io::{self, ErrorKind},
    mem,
    net::SocketAddr,
    time::Instant,
};

use mio::{Events, Interest, Poll, Token, net::TcpListener};

use crate::{
    CloseCode, CloseFrame, Connection, ConnectionId, Frame, FrameCodec, Handler, Hub, OpCode,
    ServerOptions,
    connection::Transport,
    error::HandshakeError,
    handshake::{self, Negotiation, Upgrade},
    http,
    hub::Disconnect,
};

const LISTENER: Token = Token(0);

/// Scratch space for discarding what a closing peer still sends.
const DRAIN_CHUNK: usize = 512;

/// A socket whose close frame has been written, kept in the poll set until
/// the peer hangs up or the deadline passes.
#[derive(Debug)]
struct Lingering {
    transport: Transport,
    deadline: Instant,
}

/// The event loop.
///
/// Owns the listening socket, the readiness poll and every connection, and
/// drives `H` from a single thread.
///
/// ```no_run
/// use wspoll::{ConnectionId, Handler, Hub, Message, Server, ServerOptions};
///
/// struct Echo;
///
/// impl Handler for Echo {
///     type State = ();
///
///     fn on_message(&mut self, hub: &mut Hub<()>, id: ConnectionId, payload: &[u8]) {
///         let _ = hub.send(id, Message::Binary(payload));
///     }
/// }
///
/// let mut server = Server::bind(ServerOptions::default(), Echo).expect("bind");
///
/// server.run().expect("poll failed");
/// ```
pub struct Server<H: Handler> {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    local_addr: SocketAddr,
    codec: FrameCodec,
    hub: Hub<H::State>,
    lingering: HashMap<ConnectionId, Lingering>,
    handler: H,
    options: ServerOptions,
    read_buffer: Vec<u8>,
    next_id: usize,
}

impl<H: Handler> fmt::Debug for Server<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("hub", &self.hub)
            .field("lingering", &self.lingering.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<H: Handler> Server<H> {
    /// Binds the listening socket and registers it for readiness.
    pub fn bind(options: ServerOptions, handler: H) -> io::Result<Self> {
        let poll = Poll::new()?;

        let mut listener = TcpListener::bind(options.socket_addr())?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        let local_addr = listener.local_addr()?;
        let registry = poll.registry().try_clone()?;

        tracing::info!(%local_addr, "Listening");

        Ok(Self {
            poll,
            events: Events::with_capacity(1024),
            listener,
            local_addr,
            codec: FrameCodec::new(options.max_message_size),
            hub: Hub::new(registry, options.max_pending_sends, options.max_backlog),
            lingering: HashMap::new(),
            handler,
            read_buffer: vec![0; options.read_buffer_size.max(1)],
            options,
            next_id: 1,
        })
    }

    /// The address the listener is bound to, with the real port when `0`
    /// was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn hub(&self) -> &Hub<H::State> {
        &self.hub
    }

    pub fn hub_mut(&mut self) -> &mut Hub<H::State> {
        &mut self.hub
    }

    /// Runs the loop until polling itself fails.
    ///
    /// Per-connection failures never end the loop.
    pub fn run(&mut self) -> io::Result<()> {
        loop {
            self.turn()?;
        }
    }

    /// One iteration: housekeeping, a bounded wait for readiness, then
    /// dispatch of every ready socket.
    pub fn turn(&mut self) -> io::Result<()> {
        self.housekeeping();

        match self
            .poll
            .poll(&mut self.events, Some(self.options.poll_timeout))
        {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::Interrupted => return Ok(()),
            Err(err) => return Err(err),
        }

        let ready: Vec<_> = self
            .events
            .iter()
            .map(|event| {
                (
                    event.token(),
                    event.is_readable() || event.is_read_closed() || event.is_error(),
                    event.is_writable(),
                )
            })
            .collect();

        for (token, readable, writable) in ready {
            match token {
                LISTENER => self.accept(),
                token => {
                    let id = ConnectionId::from(token);

                    if writable {
                        self.on_writable(id);
                    }

                    if readable {
                        self.on_readable(id);
                    }
                }
            }

            self.reap();
        }

        Ok(())
    }

    fn housekeeping(&mut self) {
        self.hub.flush_pending();
        self.handler.tick(&mut self.hub);
        self.expire_lingering();
        self.reap();
    }

    fn expire_lingering(&mut self) {
        let now = Instant::now();

        let expired: Vec<_> = self
            .lingering
            .iter()
            .filter(|(_, lingering)| lingering.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            if let Some(lingering) = self.lingering.remove(&id) {
                tracing::debug!(%id, "Close timeout elapsed");

                lingering.transport.close(&self.hub.registry);
            }
        }
    }

    /// Accepts until the listener would block.
    fn accept(&mut self) {
        loop {
            let (mut stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::warn!(error = %err, "Accept failed");

                    return;
                }
            };

            let id = ConnectionId::new(self.next_id);
            self.next_id += 1;

            if let Err(err) = self
                .hub
                .registry
                .register(&mut stream, id.token(), Interest::READABLE)
            {
                tracing::warn!(%id, %peer, error = %err, "Register failed");

                continue;
            }

            tracing::info!(%id, %peer, "Accepted connection");

            self.hub.connections.insert(
                id,
                Connection::new(id, peer, stream, self.options.max_message_size),
            );

            if !self.handler.on_connecting(&mut self.hub, id) {
                self.hub.doom(id, Disconnect::Refused);
            }

            self.reap();
        }
    }

    fn on_writable(&mut self, id: ConnectionId) {
        if let Some(lingering) = self.lingering.get_mut(&id) {
            if let Err(err) = lingering.transport.flush(&self.hub.registry, id.token()) {
                tracing::debug!(%id, error = %err, "Flush failed while closing");

                if let Some(lingering) = self.lingering.remove(&id) {
                    lingering.transport.close(&self.hub.registry);
                }
            }

            return;
        }

        let Some(connection) = self.hub.connections.get_mut(&id) else {
            return;
        };

        if let Err(err) = connection.transport.flush(&self.hub.registry, id.token()) {
            self.hub.doom(id, Disconnect::Io(err));
        }
    }

    /// Reads until the socket would block, feeding every chunk to the
    /// connection.
    fn on_readable(&mut self, id: ConnectionId) {
        if self.lingering.contains_key(&id) {
            self.drain_lingering(id);

            return;
        }

        let mut buffer = mem::take(&mut self.read_buffer);

        loop {
            if self.hub.is_doomed(id) {
                break;
            }

            let Some(connection) = self.hub.connections.get_mut(&id) else {
                break;
            };

            if connection.closing {
                break;
            }

            match connection.transport.read(&mut buffer) {
                Ok(0) => {
                    self.hub.doom(id, Disconnect::Eof);

                    break;
                }
                Ok(n) => self.ingest(id, &buffer[..n]),
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.hub.doom(id, Disconnect::Io(err));

                    break;
                }
            }
        }

        self.read_buffer = buffer;
    }

    /// Discards incoming bytes of a closing connection and closes it once
    /// the peer hangs up.
    fn drain_lingering(&mut self, id: ConnectionId) {
        let Some(lingering) = self.lingering.get_mut(&id) else {
            return;
        };

        let mut scratch = [0u8; DRAIN_CHUNK];

        let finished = loop {
            match lingering.transport.read(&mut scratch) {
                Ok(0) => break true,
                Ok(_) => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => break false,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break true,
            }
        };

        if finished {
            if let Some(lingering) = self.lingering.remove(&id) {
                tracing::debug!(%id, "Peer hung up after close");

                lingering.transport.close(&self.hub.registry);
            }
        }
    }

    fn ingest(&mut self, id: ConnectionId, bytes: &[u8]) {
        let Some(connection) = self.hub.connections.get_mut(&id) else {
            return;
        };

        connection.inbox.extend_from_slice(bytes);

        if !connection.handshake_complete {
            self.handshake(id);
        }

        // Bytes behind the upgrade request are already frames.
        let upgraded = self
            .hub
            .connections
            .get(&id)
            .is_some_and(Connection::handshake_complete);

        if upgraded {
            self.process_frames(id);
        }
    }

    fn handshake(&mut self, id: ConnectionId) {
        let max = self.options.max_handshake_size;

        let Some(connection) = self.hub.connections.get(&id) else {
            return;
        };

        let handler = &self.handler;
        let buffered = connection.inbox.len();
        let negotiation = handshake::negotiate(&connection.inbox, |host| handler.check_host(host));

        match negotiation {
            Negotiation::Incomplete if buffered > max => {
                self.reject(id, HandshakeError::TooLarge { max })
            }
            Negotiation::Incomplete => {}
            Negotiation::Rejected(err) => self.reject(id, err),
            Negotiation::Upgraded(upgrade) => self.upgrade(id, upgrade),
        }
    }

    fn reject(&mut self, id: ConnectionId, err: HandshakeError) {
        tracing::warn!(%id, error = %err, "Rejecting handshake");

        // A failed write dooms the connection on its own.
        let _ = self.hub.write_raw(id, http::BAD_REQUEST);

        self.hub.doom(id, Disconnect::Rejected(err));
    }

    fn upgrade(&mut self, id: ConnectionId, upgrade: Upgrade) {
        let Some(connection) = self.hub.connections.get_mut(&id) else {
            return;
        };

        connection.inbox.drain(..upgrade.consumed);
        connection.resource = upgrade.resource;

        tracing::info!(%id, resource = %connection.resource, host = %upgrade.host, "Handshake complete");

        if self.hub.write_raw(id, &upgrade.response).is_err() {
            return;
        }

        if let Some(connection) = self.hub.connections.get_mut(&id) {
            connection.handshake_complete = true;
        }

        self.hub.flush_pending_for(id);
        self.handler.on_connected(&mut self.hub, id);
    }

    /// Handles every complete frame in the inbox and keeps the rest for the
    /// next read.
    fn process_frames(&mut self, id: ConnectionId) {
        let Some(connection) = self.hub.connections.get_mut(&id) else {
            return;
        };

        let mut inbox = mem::take(&mut connection.inbox);
        let mut pos = 0;

        loop {
            let open = self
                .hub
                .connections
                .get(&id)
                .is_some_and(Connection::is_open);

            if !open || self.hub.is_doomed(id) {
                break;
            }

            match self.codec.decode(&mut inbox[pos..]) {
                Ok(None) => break,
                Ok(Some((frame, len))) => {
                    pos += len;

                    self.on_frame(id, frame);
                }
                Err(err) if err.is_size_violation() => {
                    tracing::warn!(%id, error = %err, "Frame too large");

                    self.hub
                        .send_close(id, Some(CloseFrame::no_reason(CloseCode::Policy)));

                    pos = inbox.len();

                    break;
                }
                Err(err) => {
                    tracing::warn!(%id, error = %err, "Protocol violation");

                    self.hub.doom(id, Disconnect::Protocol(err));

                    break;
                }
            }
        }

        inbox.drain(..pos);

        if let Some(connection) = self.hub.connections.get_mut(&id) {
            connection.inbox = inbox;
        }
    }

    fn on_frame(&mut self, id: ConnectionId, frame: Frame<'_>) {
        match frame.opcode() {
            OpCode::Close => self.on_close_frame(id, frame.payload()),
            OpCode::Ping => {
                tracing::debug!(%id, len = frame.payload().len(), "Ping");

                // A failed write dooms the connection on its own.
                let _ = self
                    .hub
                    .send_frame(id, OpCode::Pong, frame.payload(), true);
            }
            OpCode::Pong => tracing::debug!(%id, "Pong"),
            OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                self.on_data_frame(id, frame.is_final(), frame.payload())
            }
        }
    }

    /// Answers a close frame with the peer's status code.
    fn on_close_frame(&mut self, id: ConnectionId, payload: &[u8]) {
        if let Some(connection) = self.hub.connections.get_mut(&id) {
            connection.close_received = true;
        }

        let code = match CloseFrame::parse(payload) {
            Ok(frame) => frame.map(|frame| frame.code()),
            Err(err) => {
                tracing::debug!(%id, error = %err, "Malformed close payload");

                Some(CloseCode::Protocol)
            }
        };

        tracing::debug!(%id, ?code, "Close frame received");

        self.hub.send_close(id, code.map(CloseFrame::no_reason));
    }

    fn on_data_frame(&mut self, id: ConnectionId, fin: bool, payload: &[u8]) {
        let Some(connection) = self.hub.connections.get_mut(&id) else {
            return;
        };

        match connection.reassembler.push(fin, payload) {
            Ok(None) => {}
            Ok(Some(message)) => self.handler.on_message(&mut self.hub, id, &message),
            Err(err) => {
                tracing::warn!(%id, error = %err, "Message too large");

                self.hub
                    .send_close(id, Some(CloseFrame::no_reason(CloseCode::Policy)));
            }
        }
    }

    /// Tears down every doomed connection, including the ones doomed by
    /// `on_closed` itself.
    fn reap(&mut self) {
        while !self.hub.doomed.is_empty() {
            for (id, reason) in mem::take(&mut self.hub.doomed) {
                self.disconnect(id, reason);
            }
        }
    }

    fn disconnect(&mut self, id: ConnectionId, reason: Disconnect) {
        let Some(connection) = self.hub.connections.remove(&id) else {
            return;
        };

        match &reason {
            Disconnect::Io(err) => tracing::warn!(%id, error = %err, "Connection failed"),
            Disconnect::Protocol(err) => {
                tracing::warn!(%id, error = %err, "Dropping connection")
            }
            reason => tracing::info!(%id, ?reason, "Connection closed"),
        }

        let Connection {
            transport, state, ..
        } = connection;

        match reason {
            Disconnect::Closing => {
                let deadline = Instant::now() + self.options.close_timeout;

                self.lingering.insert(
                    id,
                    Lingering {
                        transport,
                        deadline,
                    },
                );

                // The peer may have hung up already.
                self.drain_lingering(id);
            }
            _ => transport.close(&self.hub.registry),
        }

        self.handler.on_closed(&mut self.hub, id, state);
    }
}
