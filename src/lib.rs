//! # Companion Gateway
//!
//! A small WebSocket server embedded in a single-threaded game host. Companion
//! devices (phones, tablets, a coach's laptop) connect over plain WebSocket, send
//! JSON commands (`startGame`, `selectProfile`, ...) and receive periodic
//! telemetry: play statistics and hand-tracking skeletons.
//!
//! The WebSocket layer is implemented directly on `std::net`: the RFC 6455
//! handshake and unfragmented text frames, nothing more. Every accepted socket
//! gets its own thread. Commands never touch the host from those threads; they
//! are queued on a [`MainThreadDispatcher`] and run when the host calls
//! [`Gateway::update`] from its main loop, which also drives the telemetry
//! tickers and the pre-game countdown.
//!
//! ```text
//! accept thread ──► connection thread ──► CommandRouter ──► reply
//!                                              │
//!                                              ▼
//! host main loop ──► Gateway::update ──► MainThreadDispatcher ──► Host
//!                         │
//!                         └──► Countdown, TelemetryTickers ──► ConnectionRegistry::broadcast
//! ```
//!
//! See [`prelude`] for a complete host example.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use config::GatewayConfig;
pub use countdown::{Countdown, CountdownStep};
pub use diagnostics::{
    CollectingObserver, CompositeObserver, Diagnostics, Fault, FaultKind, FaultObserver, FaultSeverity,
    TracingObserver,
};
pub use dispatcher::{MainThreadDispatcher, Task};
pub use error::GatewayError;
pub use gateway::{Gateway, GatewayBuilder, UpdateReport};
pub use host::{CommandError, CommandTarget, FreePlaySettings, GameCommand, Host, TelemetrySource};
pub use protocol::envelope::{InboundEnvelope, OutboundMessage};
pub use protocol::frame::FrameError;
pub use router::CommandRouter;
pub use server::connection::{Connection, ConnectionId, ConnectionState, Inbound, Transport};
pub use server::listener::Listener;
pub use server::registry::ConnectionRegistry;
pub use snapshot::{
    AvatarSnapshot, HandData, HandFrame, Joint, LevelScore, ProfileSnapshot, ProfileSummary, Quat,
    StatsSnapshot, Vec3,
};
pub use tickers::{GatewayState, TelemetryTickers, TickReport, Ticker};

pub mod config;
pub mod countdown;
pub mod diagnostics;
pub mod dispatcher;
mod error;
pub mod gateway;
pub mod host;
pub mod prelude;
pub mod router;
pub mod snapshot;
pub(crate) mod sync;
pub mod tickers;

/// Wire-level pieces: frame codec, upgrade handshake, JSON envelopes. All pure,
/// no I/O.
pub mod protocol {
    pub mod envelope;
    pub mod frame;
    pub mod handshake;
}

/// Sockets and threads: per-connection state, the registry, the accept loop.
pub mod server {
    pub mod connection;
    pub mod listener;
    pub mod registry;
}
