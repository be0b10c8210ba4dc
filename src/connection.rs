use std::{
    fmt,
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr},
};

use mio::{Interest, Registry, Token, net::TcpStream};

use crate::{
    Assembly, FrameCodec, OpCode,
    error::SendError,
    fragments::Reassembler,
};

/// Identifies a connection for its whole lifetime. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(usize);

impl ConnectionId {
    pub(crate) const fn new(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> usize {
        self.0
    }

    pub(crate) const fn token(self) -> Token {
        Token(self.0)
    }
}

impl From<Token> for ConnectionId {
    fn from(token: Token) -> Self {
        Self(token.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}", self.0)
    }
}

/// The socket of a connection together with the bytes it could not write
/// yet.
#[derive(Debug)]
pub(crate) struct Transport {
    stream: TcpStream,
    backlog: Vec<u8>,
    /// Whether WRITABLE interest is currently registered.
    writable: bool,
}

impl Transport {
    pub(crate) fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            backlog: Vec::new(),
            writable: false,
        }
    }

    pub(crate) fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    pub(crate) fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Writes as much of `bytes` as the socket takes and keeps the rest.
    ///
    /// Nothing is written ahead of an existing backlog so frames never
    /// interleave.
    pub(crate) fn write(
        &mut self,
        registry: &Registry,
        token: Token,
        bytes: &[u8],
        max_backlog: usize,
    ) -> Result<(), SendError> {
        let rest = if self.backlog.is_empty() {
            let written = write_some(&mut self.stream, bytes)?;

            &bytes[written..]
        } else {
            bytes
        };

        if rest.is_empty() {
            return Ok(());
        }

        if self.backlog.len() + rest.len() > max_backlog {
            return Err(SendError::BacklogFull { max: max_backlog });
        }

        self.backlog.extend_from_slice(rest);

        if !self.writable {
            registry.reregister(&mut self.stream, token, Interest::READABLE | Interest::WRITABLE)?;
            self.writable = true;
        }

        Ok(())
    }

    /// Pushes the backlog out after a writable event.
    pub(crate) fn flush(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        let written = write_some(&mut self.stream, &self.backlog)?;
        self.backlog.drain(..written);

        if self.backlog.is_empty() && self.writable {
            registry.reregister(&mut self.stream, token, Interest::READABLE)?;
            self.writable = false;
        }

        Ok(())
    }

    /// Removes the socket from the poll set and closes it.
    pub(crate) fn close(mut self, registry: &Registry) {
        if let Err(err) = registry.deregister(&mut self.stream) {
            tracing::debug!(error = %err, "Deregister failed");
        }

        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Writes until the socket would block. Returns the number of bytes taken.
fn write_some(stream: &mut TcpStream, bytes: &[u8]) -> io::Result<usize> {
    let mut written = 0;

    while written < bytes.len() {
        match stream.write(&bytes[written..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => written += n,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }

    Ok(written)
}

/// Outbound fragmentation state, independent of inbound reassembly.
#[derive(Debug, Default)]
pub(crate) struct Outbound {
    /// The next data frame continues a fragmented message.
    sending_continuous: bool,
}

impl Outbound {
    /// Encodes one outgoing frame.
    ///
    /// A data frame sent while a fragmented message is in progress goes out
    /// as a continuation. `fin = false` leaves the message open for the next
    /// call. Control frames may be interleaved and do not touch that state.
    pub(crate) fn frame(&mut self, opcode: OpCode, payload: &[u8], fin: bool) -> Vec<u8> {
        let opcode = match opcode.is_data() {
            true => {
                let opcode = match self.sending_continuous {
                    true => OpCode::Continuation,
                    false => opcode,
                };

                self.sending_continuous = !fin;

                opcode
            }
            false => opcode,
        };

        let mut dst = Vec::new();
        FrameCodec::encode(fin, opcode, payload, &mut dst);

        dst
    }

    pub(crate) fn is_continuing(&self) -> bool {
        self.sending_continuous
    }
}

/// One peer.
///
/// `S` is the slot the application attaches to the connection; the engine
/// never looks at it.
#[derive(Debug)]
pub struct Connection<S> {
    pub(crate) id: ConnectionId,
    pub(crate) peer: SocketAddr,
    pub(crate) transport: Transport,
    pub(crate) handshake_complete: bool,
    pub(crate) resource: String,
    /// Received bytes not yet consumed: an unfinished upgrade request, or the
    /// leading part of a frame.
    pub(crate) inbox: Vec<u8>,
    pub(crate) reassembler: Reassembler,
    pub(crate) outbound: Outbound,
    /// The peer sent a close frame.
    pub(crate) close_received: bool,
    /// A close frame has been sent; nothing else may follow it.
    pub(crate) closing: bool,
    pub(crate) state: S,
}

impl<S: Default> Connection<S> {
    pub(crate) fn new(
        id: ConnectionId,
        peer: SocketAddr,
        stream: TcpStream,
        max_message_size: usize,
    ) -> Self {
        Self {
            id,
            peer,
            transport: Transport::new(stream),
            handshake_complete: false,
            resource: String::new(),
            inbox: Vec::new(),
            reassembler: Reassembler::new(max_message_size),
            outbound: Outbound::default(),
            close_received: false,
            closing: false,
            state: S::default(),
        }
    }
}

impl<S> Connection<S> {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Whether the upgrade response has been sent.
    pub fn handshake_complete(&self) -> bool {
        self.handshake_complete
    }

    /// The request target of the upgrade request. Empty before the handshake.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn close_received(&self) -> bool {
        self.close_received
    }

    /// Whether a message sent with [`Hub::send_fragment`](crate::Hub::send_fragment)
    /// is still missing its final fragment.
    pub fn is_sending_fragmented(&self) -> bool {
        self.outbound.is_continuing()
    }

    /// Inbound reassembly progress.
    pub fn assembly(&self) -> &Assembly {
        self.reassembler.state()
    }

    /// Bytes written by the application but not yet taken by the socket.
    pub fn backlog_len(&self) -> usize {
        self.transport.backlog_len()
    }

    /// Upgraded and not closing.
    pub fn is_open(&self) -> bool {
        self.handshake_complete && !self.closing
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }
}
