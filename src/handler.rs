use crate::{ConnectionId, Hub};

/// The application built on top of the server.
///
/// Every callback runs on the event loop thread and receives the [`Hub`] so
/// it can send to, close, or inspect any connection. Only
/// [`Handler::on_message`] is required.
pub trait Handler {
    /// Per-connection data owned by the application (a nickname, a session).
    type State: Default;

    /// A TCP connection was accepted; the handshake has not happened yet.
    ///
    /// Returning `false` drops the connection. Messages sent from here are
    /// held and delivered right after the handshake.
    fn on_connecting(&mut self, _hub: &mut Hub<Self::State>, _id: ConnectionId) -> bool {
        true
    }

    /// The handshake completed.
    fn on_connected(&mut self, _hub: &mut Hub<Self::State>, _id: ConnectionId) {}

    /// One complete, reassembled message.
    fn on_message(&mut self, hub: &mut Hub<Self::State>, id: ConnectionId, payload: &[u8]);

    /// The connection left the connection set. Called exactly once for every
    /// connection that was announced to [`Handler::on_connecting`].
    fn on_closed(&mut self, _hub: &mut Hub<Self::State>, _id: ConnectionId, _state: Self::State) {
    }

    /// Decides whether an upgrade request for `host` is served. `host` is
    /// empty when the request has no `Host` header.
    fn check_host(&self, _host: &str) -> bool {
        true
    }

    /// Runs once per loop iteration, at least every poll timeout.
    fn tick(&mut self, _hub: &mut Hub<Self::State>) {}
}
