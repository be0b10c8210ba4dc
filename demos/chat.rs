//! A chat room.
//!
//! Clients send JSON commands:
//!
//! ```json
//! {"type": "setNick", "nick": "ada"}
//! {"type": "message", "text": "hello"}
//! ```
//!
//! Setting a nick is silent. Every non-empty message is broadcast to all
//! connections as `{"type": "message", "nick", "text", "time"}`.
//!
//! Run with `cargo run --example chat -- 127.0.0.1 9000`.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use wspoll::{ConnectionId, Handler, Hub, Message, Server, ServerOptions};

const ANONYMOUS: &str = "Anónimo";

/// Longest nick kept, in characters.
const MAX_NICK: usize = 20;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum Command {
    SetNick {
        #[serde(default)]
        nick: Option<String>,
    },
    Message {
        #[serde(default)]
        text: String,
    },
}

#[derive(Debug, Serialize)]
struct Broadcast<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    nick: &'a str,
    text: &'a str,
    time: String,
}

#[derive(Debug)]
struct Member {
    nick: String,
}

impl Default for Member {
    fn default() -> Self {
        Self {
            nick: String::from(ANONYMOUS),
        }
    }
}

/// Trims the requested nick and keeps its first [`MAX_NICK`] characters.
fn nick(requested: Option<&str>) -> String {
    requested
        .unwrap_or(ANONYMOUS)
        .trim()
        .chars()
        .take(MAX_NICK)
        .collect()
}

/// Trims a message. Empty messages are dropped.
fn text(raw: &str) -> Option<&str> {
    Some(raw.trim()).filter(|text| !text.is_empty())
}

#[derive(Debug, Default)]
struct Chat;

impl Handler for Chat {
    type State = Member;

    fn on_connected(&mut self, _hub: &mut Hub<Member>, id: ConnectionId) {
        tracing::info!(%id, "User connected");
    }

    fn on_message(&mut self, hub: &mut Hub<Member>, id: ConnectionId, payload: &[u8]) {
        let command = match serde_json::from_slice::<Command>(payload) {
            Ok(command) => command,
            Err(err) => {
                tracing::debug!(%id, error = %err, "Ignoring command");

                return;
            }
        };

        match command {
            Command::SetNick { nick: requested } => {
                let Some(member) = hub.state_mut(id) else {
                    return;
                };

                member.nick = nick(requested.as_deref());

                tracing::info!(%id, nick = %member.nick, "Nick set");
            }
            Command::Message { text: raw } => {
                let Some(text) = text(&raw) else {
                    return;
                };

                let nick = hub
                    .state(id)
                    .map(|member| member.nick.clone())
                    .unwrap_or_else(|| String::from(ANONYMOUS));

                let broadcast = Broadcast {
                    kind: "message",
                    nick: &nick,
                    text,
                    time: chrono::Local::now().format("%H:%M:%S").to_string(),
                };

                match serde_json::to_string(&broadcast) {
                    Ok(json) => {
                        let delivered = hub.broadcast(Message::Text(&json));

                        tracing::debug!(%id, delivered, "Broadcast");
                    }
                    Err(err) => tracing::warn!(error = %err, "Failed to serialize message"),
                }
            }
        }
    }

    fn on_closed(&mut self, _hub: &mut Hub<Member>, id: ConnectionId, _member: Member) {
        tracing::info!(%id, "User disconnected");
    }
}

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut args = std::env::args().skip(1);

    let defaults = ServerOptions::default();

    let address = args
        .next()
        .and_then(|address| address.parse::<IpAddr>().ok())
        .unwrap_or(defaults.address);

    let port = args
        .next()
        .and_then(|port| port.parse::<u16>().ok())
        .unwrap_or(defaults.port);

    let mut server = Server::bind(ServerOptions::new(address, port), Chat)?;

    tracing::info!(addr = %server.local_addr(), "Chat room open");

    server.run()
}
