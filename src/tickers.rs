//! Periodic telemetry broadcasts.
//!
//! Two independent [`Ticker`]s, one for play statistics and one for hand
//! skeletons, are stepped from the host's per-tick update. When a ticker is
//! enabled and its interval has elapsed, it pulls one snapshot from the
//! [`TelemetrySource`] and broadcasts it to every open connection.
//!
//! The enable flags live in [`GatewayState`] and are shared with connection
//! threads, which flip hand tracking on and off. They are process-wide: every
//! client gets hand frames once any client asked for them.

use web_time::{Duration, Instant};

use crate::host::TelemetrySource;
use crate::protocol::envelope::OutboundMessage;
use crate::server::registry::ConnectionRegistry;
use crate::sync::{AtomicBool, Ordering};

/// Gateway-wide broadcast switches.
#[derive(Debug)]
pub struct GatewayState {
    send_stats_updates: AtomicBool,
    send_hand_tracking_data: AtomicBool,
}

impl GatewayState {
    /// Creates the switches with the given initial values.
    #[must_use]
    pub fn new(send_stats_updates: bool, send_hand_tracking_data: bool) -> Self {
        Self {
            send_stats_updates: AtomicBool::new(send_stats_updates),
            send_hand_tracking_data: AtomicBool::new(send_hand_tracking_data),
        }
    }

    /// Whether stats are broadcast.
    #[must_use]
    pub fn stats_enabled(&self) -> bool {
        self.send_stats_updates.load(Ordering::Acquire)
    }

    /// Turns stats broadcasting on or off.
    pub fn set_stats_enabled(&self, enabled: bool) {
        self.send_stats_updates.store(enabled, Ordering::Release);
    }

    /// Whether hand frames are broadcast.
    #[must_use]
    pub fn hand_tracking_enabled(&self) -> bool {
        self.send_hand_tracking_data.load(Ordering::Acquire)
    }

    /// Turns hand-frame broadcasting on or off.
    pub fn set_hand_tracking_enabled(&self, enabled: bool) {
        let previous = self.send_hand_tracking_data.swap(enabled, Ordering::AcqRel);
        if previous != enabled {
            tracing::info!(enabled, "hand tracking broadcast toggled");
        }
    }
}

/// A fixed-interval timer driven by externally supplied timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticker {
    interval: Duration,
    last_fire: Option<Instant>,
}

impl Ticker {
    /// A ticker that is due immediately and then every `interval`.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fire: None,
        }
    }

    /// The configured period.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the interval has elapsed since the last fire.
    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        self.last_fire
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval)
    }

    /// Records a fire at `now`.
    pub fn fire(&mut self, now: Instant) {
        self.last_fire = Some(now);
    }

    /// Forgets the last fire so the ticker is due again.
    pub fn reset(&mut self) {
        self.last_fire = None;
    }
}

/// What one [`TelemetryTickers::tick`] broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Connections that received a `stats` envelope.
    pub stats_delivered: Option<usize>,
    /// Connections that received a `handTracking` envelope.
    pub hand_frames_delivered: Option<usize>,
}

/// The stats and hand-tracking tickers.
#[derive(Debug, Clone)]
pub struct TelemetryTickers {
    stats: Ticker,
    hand_tracking: Ticker,
}

impl TelemetryTickers {
    /// Tickers with the given periods.
    #[must_use]
    pub const fn new(stats_interval: Duration, hand_tracking_interval: Duration) -> Self {
        Self {
            stats: Ticker::new(stats_interval),
            hand_tracking: Ticker::new(hand_tracking_interval),
        }
    }

    /// Steps both tickers.
    ///
    /// Stats are only produced while the source reports an active play state.
    /// Hand frames are skipped while nobody is connected, and otherwise sent
    /// even when no hand is tracked.
    pub fn tick<S>(
        &mut self,
        now: Instant,
        state: &GatewayState,
        source: &S,
        registry: &ConnectionRegistry,
    ) -> TickReport
    where
        S: TelemetrySource + ?Sized,
    {
        let mut report = TickReport::default();

        if state.stats_enabled() && self.stats.is_due(now) {
            self.stats.fire(now);
            if let Some(stats) = source.stats_snapshot() {
                report.stats_delivered = Some(registry.broadcast_message(&OutboundMessage::stats(stats)));
            }
        }

        if state.hand_tracking_enabled() && self.hand_tracking.is_due(now) && !registry.is_empty() {
            self.hand_tracking.fire(now);
            let frame = source.hand_frame_snapshot();
            report.hand_frames_delivered =
                Some(registry.broadcast_message(&OutboundMessage::hand_tracking(frame)));
        }

        report
    }
}
