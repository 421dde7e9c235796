//! Configuration for the gateway.
//!
//! | Preset | Purpose |
//! |--------|---------|
//! | `GatewayConfig::default()` | Port 8080, stats every second, hand frames at 20 Hz |
//! | `GatewayConfig::lan()` | Wired or same-room devices, hand frames at ~33 Hz |
//! | `GatewayConfig::low_bandwidth()` | Phones on congested Wi-Fi |
//!
//! # Example
//!
//! ```
//! use companion_gateway::{GatewayBuilder, GatewayConfig};
//! use web_time::Duration;
//!
//! let config = GatewayConfig {
//!     hand_tracking_interval: Duration::from_millis(40),
//!     ..GatewayConfig::lan()
//! };
//! let builder = GatewayBuilder::new().with_config(config);
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use web_time::Duration;

use crate::GatewayError;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 8080;

/// Smallest handshake buffer that can hold a minimal upgrade request.
const MIN_HANDSHAKE_BYTES: usize = 64;

/// Gateway settings.
///
/// New fields may be added in future versions; construct with
/// `..GatewayConfig::default()`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "GatewayConfig has no effect unless passed to GatewayBuilder::with_config()"]
pub struct GatewayConfig {
    /// Address the listener binds to.
    ///
    /// Default: `0.0.0.0:8080`
    pub bind_addr: SocketAddr,

    /// Period of the stats ticker.
    ///
    /// Default: 1s
    pub stats_interval: Duration,

    /// Period of the hand-tracking ticker.
    ///
    /// Default: 50ms
    pub hand_tracking_interval: Duration,

    /// Whether stats broadcasting starts enabled.
    ///
    /// Default: `true`
    pub send_stats_updates: bool,

    /// Whether hand-tracking broadcasting starts enabled. Clients normally turn
    /// it on with `startHandTracking`.
    ///
    /// Default: `false`
    pub send_hand_tracking_data: bool,

    /// Upper bound on a single socket write. A peer that stops reading is
    /// evicted after this long instead of stalling the broadcaster.
    ///
    /// Default: 2s
    pub write_timeout: Option<Duration>,

    /// How long a freshly accepted socket may take to send its upgrade request.
    /// Connections still handshaking are not registered, so this also bounds how
    /// long they outlive a shutdown.
    ///
    /// Default: 5s
    pub handshake_timeout: Option<Duration>,

    /// Largest upgrade request head accepted before the socket is dropped.
    ///
    /// Default: 8192
    pub max_handshake_bytes: usize,

    /// Largest inbound frame payload accepted.
    ///
    /// Default: 65535
    pub max_payload_len: usize,

    /// Number of numbered countdown steps broadcast before `GO!`. Zero disables
    /// the countdown.
    ///
    /// Default: 3
    pub countdown_steps: u32,

    /// Time between countdown steps.
    ///
    /// Default: 1s
    pub countdown_interval: Duration,

    /// Name used in the welcome message.
    ///
    /// Default: `companion-gateway`
    pub server_name: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            stats_interval: Duration::from_secs(1),
            hand_tracking_interval: Duration::from_millis(50),
            send_stats_updates: true,
            send_hand_tracking_data: false,
            write_timeout: Some(Duration::from_secs(2)),
            handshake_timeout: Some(Duration::from_secs(5)),
            max_handshake_bytes: 8192,
            max_payload_len: 65_535,
            countdown_steps: 3,
            countdown_interval: Duration::from_secs(1),
            server_name: "companion-gateway".to_owned(),
        }
    }
}

impl GatewayConfig {
    /// Creates a new `GatewayConfig` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset for devices on the same wired or local network.
    pub fn lan() -> Self {
        Self {
            stats_interval: Duration::from_millis(500),
            hand_tracking_interval: Duration::from_millis(30),
            write_timeout: Some(Duration::from_millis(500)),
            ..Self::default()
        }
    }

    /// Preset for phones on congested Wi-Fi.
    pub fn low_bandwidth() -> Self {
        Self {
            stats_interval: Duration::from_secs(2),
            hand_tracking_interval: Duration::from_millis(200),
            write_timeout: Some(Duration::from_secs(5)),
            ..Self::default()
        }
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.stats_interval.is_zero() {
            return Err(GatewayError::InvalidConfig {
                info: "stats_interval must be non-zero".to_owned(),
            });
        }
        if self.hand_tracking_interval.is_zero() {
            return Err(GatewayError::InvalidConfig {
                info: "hand_tracking_interval must be non-zero".to_owned(),
            });
        }
        if self.countdown_steps > 0 && self.countdown_interval.is_zero() {
            return Err(GatewayError::InvalidConfig {
                info: "countdown_interval must be non-zero when countdown_steps > 0".to_owned(),
            });
        }
        if self.write_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(GatewayError::InvalidConfig {
                info: "write_timeout must be non-zero (use None to disable it)".to_owned(),
            });
        }
        if self.handshake_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(GatewayError::InvalidConfig {
                info: "handshake_timeout must be non-zero (use None to disable it)".to_owned(),
            });
        }
        if self.max_handshake_bytes < MIN_HANDSHAKE_BYTES {
            return Err(GatewayError::InvalidConfig {
                info: format!(
                    "max_handshake_bytes must be at least {MIN_HANDSHAKE_BYTES}, got {}",
                    self.max_handshake_bytes
                ),
            });
        }
        if self.max_payload_len == 0 {
            return Err(GatewayError::InvalidConfig {
                info: "max_payload_len must be non-zero".to_owned(),
            });
        }
        Ok(())
    }
}
