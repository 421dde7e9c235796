//! The gateway's view of the application it is embedded in.
//!
//! The host owns the simulation and is single-threaded. It exposes two
//! capabilities: [`CommandTarget`] (change state) and [`TelemetrySource`] (read
//! snapshots). The gateway only calls either of them from tasks drained by
//! [`MainThreadDispatcher::drain_and_run_all`](crate::MainThreadDispatcher::drain_and_run_all)
//! or from [`Gateway::update`](crate::Gateway::update), both of which the host
//! runs on its own thread. Neither trait therefore requires `Send` or `Sync`.

use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::snapshot::{HandFrame, ProfileSnapshot, StatsSnapshot};

/// Tuning for free-play sessions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreePlaySettings {
    /// Seconds between balloon spawns.
    pub spawn_interval: f32,
    /// Upper bound on balloons alive at once.
    pub max_simultaneous: i32,
}

/// A state-changing command for the host.
#[derive(Debug, Clone, PartialEq)]
pub enum GameCommand {
    /// Start a session of `game_type` on `level`.
    StartGame {
        /// Game mode name; hosts reject names they do not know.
        game_type: String,
        /// Level index.
        level: i32,
        /// Free-play tuning, if supplied.
        free_play: Option<FreePlaySettings>,
    },
    /// Return to the home screen.
    GoHome,
    /// Abort the running session.
    QuitGame,
    /// Make `profile_id` the active profile.
    SelectProfile {
        /// Profile to activate.
        profile_id: String,
    },
    /// Create a throwaway profile with sample scores.
    CreateDebugProfile,
    /// Turn the camera feed on or off.
    ToggleCameraFeed,
}

impl GameCommand {
    /// Wire name of the command that produces this variant.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StartGame { .. } => "startGame",
            Self::GoHome => "goHome",
            Self::QuitGame => "quitGame",
            Self::SelectProfile { .. } => "selectProfile",
            Self::CreateDebugProfile => "createDebugProfile",
            Self::ToggleCameraFeed => "toggleCameraFeed",
        }
    }
}

/// A command the host refused or failed to carry out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError {
    /// Sent back to the client verbatim inside an `error` envelope.
    pub message: String,
}

impl CommandError {
    /// Creates a command error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for CommandError {}

/// State-changing capability of the host.
pub trait CommandTarget {
    /// Applies `command`. Errors are reported to the requesting client only.
    fn apply(&mut self, command: GameCommand) -> Result<(), CommandError>;

    /// Whether a play session is running (or counting down to run). The
    /// countdown re-checks this before every step.
    fn session_active(&self) -> bool;
}

/// Read capability of the host.
pub trait TelemetrySource {
    /// Current play statistics, or `None` outside an active play state.
    fn stats_snapshot(&self) -> Option<StatsSnapshot>;

    /// Current hand skeletons. Untracked hands may be `None` or carry
    /// `is_tracked = false`; both serialize as `null`.
    fn hand_frame_snapshot(&self) -> HandFrame;

    /// The profile with `id`, or the active profile when `id` is `None`.
    fn profile_snapshot(&self, id: Option<&str>) -> Option<ProfileSnapshot>;

    /// Every known profile.
    fn profiles(&self) -> Vec<ProfileSnapshot>;

    /// Where the camera feed is served, while it is enabled.
    fn camera_feed_url(&self) -> Option<String> {
        None
    }
}

/// Everything the main thread hands to dispatched tasks.
///
/// Blanket-implemented for any type that is both a [`CommandTarget`] and a
/// [`TelemetrySource`].
pub trait Host: CommandTarget + TelemetrySource {}

impl<T: CommandTarget + TelemetrySource> Host for T {}
