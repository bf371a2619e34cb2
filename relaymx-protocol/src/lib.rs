//! Client-facing MySQL wire protocol: packet framing, the `mysql_native_password`
//! handshake, and the per-connection state machine that classifies inbound
//! commands and replays session-modifying ones through `relaymx-session`.

pub mod auth;
pub mod codec;
pub mod collaborators;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod packets;
pub mod primitives;
pub mod writer;

pub use codec::{Packet, PacketCodec};
pub use collaborators::{BackendGateway, QueryClassifier, Router, SessionId, UserRepository};
pub use connection::{ClientConnection, ConnState, ConnectionDeps};
pub use error::{ProxyError, Result};
