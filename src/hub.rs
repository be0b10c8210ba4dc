use std::{collections::HashMap, fmt, io};

use mio::Registry;

use crate::{
    CloseFrame, Connection, ConnectionId, Message, OpCode,
    error::{DecodeError, HandshakeError, SendError},
    fragments::Fragments,
    pending::{PendingSend, PendingSends, Readiness},
};

/// Why a connection leaves the connection set.
#[derive(Debug)]
pub(crate) enum Disconnect {
    /// The peer closed the TCP stream.
    Eof,
    /// The socket failed while reading or flushing.
    Io(io::Error),
    /// The upgrade request was answered with `400`.
    Rejected(HandshakeError),
    /// The application refused the connection in `on_connecting`.
    Refused,
    /// The application closed a connection that never upgraded.
    Dropped,
    /// The peer broke the framing rules.
    Protocol(DecodeError),
    /// Writing failed or the backlog overflowed.
    Failed,
    /// A close frame has been written. The socket lingers until the peer
    /// hangs up.
    Closing,
}

/// The connection set and the held messages, as seen by the application.
///
/// Every [`Handler`](crate::Handler) callback receives the hub, so sends,
/// broadcasts and closes can be issued from inside a callback.
pub struct Hub<S> {
    pub(crate) registry: Registry,
    pub(crate) connections: HashMap<ConnectionId, Connection<S>>,
    pub(crate) pending: PendingSends,
    /// Connections to tear down once the current callback returns.
    pub(crate) doomed: Vec<(ConnectionId, Disconnect)>,
    max_backlog: usize,
}

impl<S> fmt::Debug for Hub<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("connections", &self.connections.len())
            .field("pending", &self.pending.len())
            .field("doomed", &self.doomed.len())
            .field("max_backlog", &self.max_backlog)
            .finish_non_exhaustive()
    }
}

impl<S> Hub<S> {
    pub(crate) fn new(registry: Registry, max_pending_sends: usize, max_backlog: usize) -> Self {
        Self {
            registry,
            connections: HashMap::new(),
            pending: PendingSends::new(max_pending_sends),
            doomed: Vec::new(),
            max_backlog,
        }
    }

    /// Number of connections, upgraded or not.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Ids of every connection in the set, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.connections.keys().copied()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection<S>> {
        self.connections.get(&id)
    }

    pub fn state(&self, id: ConnectionId) -> Option<&S> {
        self.connections.get(&id).map(Connection::state)
    }

    pub fn state_mut(&mut self, id: ConnectionId) -> Option<&mut S> {
        self.connections.get_mut(&id).map(Connection::state_mut)
    }

    /// Number of messages held for connections that are still handshaking.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Sends one complete message.
    ///
    /// Before the handshake the message is held and delivered, in call
    /// order, as soon as the handshake completes.
    pub fn send(&mut self, id: ConnectionId, message: Message<'_>) -> Result<(), SendError> {
        self.send_fragment(id, message, true)
    }

    /// Sends one fragment of a message built across several calls.
    ///
    /// The first call uses the message's opcode and later calls go out as
    /// continuations until one passes `fin = true`. Control messages cannot
    /// be fragmented.
    pub fn send_fragment(
        &mut self,
        id: ConnectionId,
        message: Message<'_>,
        fin: bool,
    ) -> Result<(), SendError> {
        self.send_data(id, message.opcode(), &message.payload(), fin)
    }

    /// Splits a text or binary message into frames carrying at most
    /// `fragment_size` payload bytes each.
    pub fn send_fragmented(
        &mut self,
        id: ConnectionId,
        message: Message<'_>,
        fragment_size: usize,
    ) -> Result<(), SendError> {
        let opcode = message.opcode();

        if !opcode.is_data() {
            return Err(SendError::ControlFragment);
        }

        if fragment_size == 0 {
            return Err(SendError::InvalidFragmentSize);
        }

        let payload = message.payload();

        for (chunk, fin) in Fragments::new(&payload, fragment_size) {
            self.send_data(id, opcode, chunk, fin)?;
        }

        Ok(())
    }

    /// Sends `message` to every connection. Returns how many accepted it.
    ///
    /// Connections still handshaking get the message once they upgrade.
    pub fn broadcast(&mut self, message: Message<'_>) -> usize {
        let ids: Vec<_> = self.ids().collect();

        ids.into_iter()
            .filter(|id| match self.send(*id, message) {
                Ok(()) => true,
                Err(err) => {
                    tracing::debug!(%id, error = %err, "Broadcast skipped connection");

                    false
                }
            })
            .count()
    }

    /// Starts the close handshake from the server side.
    ///
    /// Connections that have not upgraded yet are dropped without a frame.
    /// Closing a connection twice is a no-op.
    pub fn close(&mut self, id: ConnectionId, frame: CloseFrame<'_>) -> Result<(), SendError> {
        let connection = self
            .connections
            .get(&id)
            .ok_or(SendError::UnknownConnection(id))?;

        if connection.closing {
            return Ok(());
        }

        if !connection.handshake_complete {
            self.doom(id, Disconnect::Dropped);

            return Ok(());
        }

        self.send_close(id, Some(frame));

        Ok(())
    }

    fn send_data(
        &mut self,
        id: ConnectionId,
        opcode: OpCode,
        payload: &[u8],
        fin: bool,
    ) -> Result<(), SendError> {
        if opcode.is_control() && !fin {
            return Err(SendError::ControlFragment);
        }

        let connection = self
            .connections
            .get(&id)
            .ok_or(SendError::UnknownConnection(id))?;

        if connection.closing || self.is_doomed(id) {
            return Err(SendError::Closed(id));
        }

        if !connection.handshake_complete {
            tracing::debug!(%id, "Holding message until the handshake completes");

            return self.pending.push(PendingSend {
                id,
                opcode,
                payload: payload.to_vec(),
                fin,
            });
        }

        self.send_frame(id, opcode, payload, fin)
    }

    /// Writes a close frame and schedules the connection for lingering.
    pub(crate) fn send_close(&mut self, id: ConnectionId, frame: Option<CloseFrame<'_>>) {
        let payload = Message::Close(frame).payload();

        if self.send_frame(id, OpCode::Close, &payload, true).is_ok() {
            if let Some(connection) = self.connections.get_mut(&id) {
                connection.closing = true;
            }

            self.doom(id, Disconnect::Closing);
        }
    }

    /// Frames and writes immediately.
    pub(crate) fn send_frame(
        &mut self,
        id: ConnectionId,
        opcode: OpCode,
        payload: &[u8],
        fin: bool,
    ) -> Result<(), SendError> {
        let connection = self
            .connections
            .get_mut(&id)
            .ok_or(SendError::UnknownConnection(id))?;

        let bytes = connection.outbound.frame(opcode, payload, fin);

        self.write_raw(id, &bytes)
    }

    /// Writes bytes that are already wire formatted. A failed write dooms
    /// the connection.
    pub(crate) fn write_raw(&mut self, id: ConnectionId, bytes: &[u8]) -> Result<(), SendError> {
        let connection = self
            .connections
            .get_mut(&id)
            .ok_or(SendError::UnknownConnection(id))?;

        connection
            .transport
            .write(&self.registry, id.token(), bytes, self.max_backlog)
            .inspect_err(|err| {
                tracing::warn!(%id, error = %err, "Write failed");
            })
            .map_err(|err| {
                self.doom(id, Disconnect::Failed);

                err
            })
    }

    /// Delivers every held message whose connection has upgraded, and drops
    /// those whose connection is gone.
    pub(crate) fn flush_pending(&mut self) {
        let connections = &self.connections;

        let ready = self.pending.take_ready(|id| match connections.get(&id) {
            None => Readiness::Gone,
            Some(connection) if connection.closing => Readiness::Gone,
            Some(connection) if connection.handshake_complete => Readiness::Ready,
            Some(_) => Readiness::Waiting,
        });

        self.deliver(ready);
    }

    /// Delivers the held messages of a connection that just upgraded.
    pub(crate) fn flush_pending_for(&mut self, id: ConnectionId) {
        let ready = self.pending.take_for(id);

        self.deliver(ready);
    }

    fn deliver(&mut self, entries: Vec<PendingSend>) {
        for entry in entries {
            if let Err(err) = self.send_frame(entry.id, entry.opcode, &entry.payload, entry.fin) {
                tracing::debug!(id = %entry.id, error = %err, "Held message not delivered");
            }
        }
    }

    pub(crate) fn doom(&mut self, id: ConnectionId, reason: Disconnect) {
        if !self.is_doomed(id) {
            self.doomed.push((id, reason));
        }
    }

    pub(crate) fn is_doomed(&self, id: ConnectionId) -> bool {
        self.doomed.iter().any(|(doomed, _)| *doomed == id)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::Read,
        net::{TcpListener, TcpStream},
    };

    use mio::{Interest, Poll};

    use super::*;
    use crate::CloseCode;

    /// A hub holding one connection whose peer is the returned client.
    fn hub_with_peer(upgraded: bool) -> (Hub<()>, ConnectionId, TcpStream) {
        let poll = Poll::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();

        server.set_nonblocking(true).unwrap();

        let id = ConnectionId::new(1);
        let mut stream = mio::net::TcpStream::from_std(server);

        poll.registry()
            .register(&mut stream, id.token(), Interest::READABLE)
            .unwrap();

        let mut hub = Hub::new(poll.registry().try_clone().unwrap(), 2, 1024);
        let mut connection = Connection::new(id, peer, stream, 64);
        connection.handshake_complete = upgraded;
        hub.connections.insert(id, connection);

        (hub, id, client)
    }

    #[test]
    fn invalid_arguments() {
        let (mut hub, id, _client) = hub_with_peer(true);

        assert!(matches!(
            hub.send_fragment(id, Message::Ping(b"p"), false),
            Err(SendError::ControlFragment)
        ));
        assert!(matches!(
            hub.send_fragmented(id, Message::Pong(b"p"), 4),
            Err(SendError::ControlFragment)
        ));
        assert!(matches!(
            hub.send_fragmented(id, Message::Text("abc"), 0),
            Err(SendError::InvalidFragmentSize)
        ));
        assert!(matches!(
            hub.send(ConnectionId::new(9), Message::Text("abc")),
            Err(SendError::UnknownConnection(_))
        ));
    }

    #[test]
    fn upgraded_sends_are_written_immediately() {
        let (mut hub, id, mut client) = hub_with_peer(true);

        hub.send(id, Message::Text("hi")).unwrap();

        let mut frame = [0u8; 4];
        client.read_exact(&mut frame).unwrap();

        assert_eq!(frame, [0x81, 0x02, b'h', b'i']);
        assert_eq!(hub.pending_len(), 0);
    }

    #[test]
    fn sends_before_the_handshake_are_held() {
        let (mut hub, id, _client) = hub_with_peer(false);

        hub.send(id, Message::Text("a")).unwrap();
        hub.send(id, Message::Binary(b"b")).unwrap();

        assert!(matches!(
            hub.send(id, Message::Text("c")),
            Err(SendError::PendingQueueFull { capacity: 2 })
        ));
        assert_eq!(hub.pending_len(), 2);

        // Still handshaking: nothing moves.
        hub.flush_pending();
        assert_eq!(hub.pending_len(), 2);

        hub.connections.remove(&id);
        hub.flush_pending();
        assert_eq!(hub.pending_len(), 0);
    }

    #[test]
    fn broadcast_counts_accepting_connections() {
        let (mut hub, id, _client) = hub_with_peer(true);

        hub.connections.get_mut(&id).unwrap().closing = true;

        assert_eq!(hub.broadcast(Message::Text("x")), 0);
    }

    #[test]
    fn closing_before_the_handshake_drops_without_a_frame() {
        let (mut hub, id, _client) = hub_with_peer(false);

        hub.close(id, CloseFrame::no_reason(CloseCode::Normal))
            .unwrap();

        assert!(matches!(hub.doomed.as_slice(), [(doomed, Disconnect::Dropped)] if *doomed == id));
    }

    #[test]
    fn close_marks_the_connection_closing() {
        let (mut hub, id, mut client) = hub_with_peer(true);

        hub.close(id, CloseFrame::new(CloseCode::Away, "bye"))
            .unwrap();

        let mut frame = [0u8; 7];
        client.read_exact(&mut frame).unwrap();

        assert_eq!(frame, [0x88, 0x05, 0x03, 0xE9, b'b', b'y', b'e']);
        assert!(!hub.connection(id).unwrap().is_open());
        assert!(matches!(
            hub.send(id, Message::Text("late")),
            Err(SendError::Closed(_))
        ));
    }
}
