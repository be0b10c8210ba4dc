//! A single-threaded, readiness-driven `websockets` server built directly on non-blocking TCP sockets.

#![deny(missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # Example
//!
//! An application implements [`Handler`] and hands it to a [`Server`]. Every
//! callback receives the [`Hub`], through which it sends to, broadcasts to,
//! or closes connections.
//!
//! ```no_run
//! use wspoll::{CloseCode, CloseFrame, ConnectionId, Handler, Hub, Message, Server, ServerOptions};
//!
//! #[derive(Default)]
//! struct Visits(usize);
//!
//! struct Echo;
//!
//! impl Handler for Echo {
//!     type State = Visits;
//!
//!     fn on_connected(&mut self, hub: &mut Hub<Visits>, id: ConnectionId) {
//!         let _ = hub.send(id, Message::Text("welcome"));
//!     }
//!
//!     fn on_message(&mut self, hub: &mut Hub<Visits>, id: ConnectionId, payload: &[u8]) {
//!         if payload == b"bye" {
//!             let _ = hub.close(id, CloseFrame::new(CloseCode::Normal, "bye"));
//!
//!             return;
//!         }
//!
//!         if let Some(visits) = hub.state_mut(id) {
//!             visits.0 += 1;
//!         }
//!
//!         let _ = hub.send(id, Message::Binary(payload));
//!     }
//!
//!     fn check_host(&self, host: &str) -> bool {
//!         host.starts_with("localhost")
//!     }
//! }
//!
//! let options = ServerOptions::default().with_port(8080);
//! let mut server = Server::bind(options, Echo).expect("bind");
//!
//! server.run().expect("poll failed");
//! ```
//!
//! # Event loop
//!
//! [`Server::run`] repeats [`Server::turn`]: flush messages held for
//! connections that finished their handshake, call [`Handler::tick`], wait
//! at most [`ServerOptions::poll_timeout`] for readiness, then accept new
//! peers and read from every ready socket until it would block.
//!
//! Pings are answered with pongs, fragmented messages are reassembled, and
//! a close frame is answered with a close frame echoing the peer's status
//! code. None of these reach the handler; it only sees complete messages.
//!
//! # Sending
//!
//! Writes never block. Whatever the kernel does not take is kept per
//! connection, up to [`ServerOptions::max_backlog`] bytes, and written out
//! when the socket becomes writable again. Messages sent before a
//! connection finished its handshake are held and delivered in call order
//! right after the upgrade response.

mod close_code;
pub use close_code::CloseCode;

mod close_frame;
pub use close_frame::CloseFrame;

mod codec;
pub use codec::FrameCodec;

mod connection;
pub use connection::{Connection, ConnectionId};

pub mod error;

mod fragments;
pub use fragments::{Assembly, Reassembler};

mod frame;
pub use frame::{Frame, Header};

mod handler;
pub use handler::Handler;

pub mod handshake;

pub mod http;

mod hub;
pub use hub::Hub;

mod mask;
pub use mask::unmask;

mod message;
pub use message::Message;

mod opcode;
pub use opcode::OpCode;

mod options;
pub use options::ServerOptions;

mod pending;

mod server;
pub use server::Server;
