use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    /// Address to bind the listening socket to.
    pub address: IpAddr,
    /// Port to bind to. `0` picks an ephemeral port.
    pub port: u16,
    /// Most bytes read from a socket in one call.
    pub read_buffer_size: usize,
    /// Largest frame payload, and largest reassembled message.
    pub max_message_size: usize,
    /// Largest upgrade request accepted before the blank line shows up.
    pub max_handshake_size: usize,
    /// Most messages held for connections that have not finished their
    /// handshake, across all connections.
    pub max_pending_sends: usize,
    /// Most unwritten bytes kept per connection.
    pub max_backlog: usize,
    /// Longest the loop blocks waiting for readiness.
    pub poll_timeout: Duration,
    /// How long a connection that sent its close frame waits for the peer
    /// to hang up.
    pub close_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::default()
    }
}

impl ServerOptions {
    pub const fn new(address: IpAddr, port: u16) -> Self {
        Self::default().with_address(address).with_port(port)
    }

    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    pub const fn with_address(mut self, address: IpAddr) -> Self {
        self.address = address;
        self
    }

    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub const fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub const fn with_max_handshake_size(mut self, size: usize) -> Self {
        self.max_handshake_size = size;
        self
    }

    pub const fn with_max_pending_sends(mut self, count: usize) -> Self {
        self.max_pending_sends = count;
        self
    }

    pub const fn with_max_backlog(mut self, size: usize) -> Self {
        self.max_backlog = size;
        self
    }

    pub const fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub const fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    const fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 9000,
            read_buffer_size: 2048,
            max_message_size: 16 * 1024 * 1024,
            max_handshake_size: 8 * 1024,
            max_pending_sends: 1024,
            max_backlog: 1024 * 1024,
            poll_timeout: Duration::from_secs(1),
            close_timeout: Duration::from_secs(5),
        }
    }
}
