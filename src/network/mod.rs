//! Network Layer
//!
//! WebSocket server, wire format and client handles. Round logic lives in
//! `game/`; this layer only moves events in and out.

pub mod protocol;
pub mod session;
pub mod server;

pub use protocol::{decode_bet, OutboundEvent, ProtocolError};
pub use session::ClientHandle;
pub use server::{GameServer, ServerConfig, GameServerError};
