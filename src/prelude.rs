//! Convenient re-exports for embedding the gateway.
//!
//! ```rust
//! use companion_gateway::prelude::*;
//! ```
//!
//! # What's Included
//!
//! - **Gateway**: [`Gateway`], [`GatewayBuilder`], [`GatewayConfig`], [`UpdateReport`]
//! - **Host traits**: [`Host`], [`CommandTarget`], [`TelemetrySource`]
//! - **Commands**: [`GameCommand`], [`CommandError`], [`FreePlaySettings`]
//! - **Snapshots**: [`StatsSnapshot`], [`HandFrame`], [`HandData`], [`Joint`], [`Vec3`], [`Quat`],
//!   [`ProfileSnapshot`], [`AvatarSnapshot`], [`LevelScore`]
//! - **Messages**: [`OutboundMessage`]
//! - **Errors**: [`GatewayError`]
//!
//! # Example
//!
//! ```rust
//! use companion_gateway::prelude::*;
//!
//! struct Arena {
//!     score: i64,
//!     playing: bool,
//! }
//!
//! impl CommandTarget for Arena {
//!     fn apply(&mut self, command: GameCommand) -> Result<(), CommandError> {
//!         match command {
//!             GameCommand::StartGame { game_type, .. } if game_type != "Classic" => {
//!                 Err(CommandError::new(format!("Unknown game type: {game_type}")))
//!             },
//!             GameCommand::StartGame { .. } => {
//!                 self.playing = true;
//!                 Ok(())
//!             },
//!             GameCommand::QuitGame | GameCommand::GoHome => {
//!                 self.playing = false;
//!                 Ok(())
//!             },
//!             _ => Ok(()),
//!         }
//!     }
//!
//!     fn session_active(&self) -> bool {
//!         self.playing
//!     }
//! }
//!
//! impl TelemetrySource for Arena {
//!     fn stats_snapshot(&self) -> Option<StatsSnapshot> {
//!         self.playing.then(|| StatsSnapshot {
//!             score: self.score,
//!             ..StatsSnapshot::default()
//!         })
//!     }
//!
//!     fn hand_frame_snapshot(&self) -> HandFrame {
//!         HandFrame::empty(0.0)
//!     }
//!
//!     fn profile_snapshot(&self, _id: Option<&str>) -> Option<ProfileSnapshot> {
//!         None
//!     }
//!
//!     fn profiles(&self) -> Vec<ProfileSnapshot> {
//!         Vec::new()
//!     }
//! }
//!
//! let mut gateway = GatewayBuilder::new().build()?;
//! let mut arena = Arena { score: 0, playing: false };
//! let report = gateway.update(&mut arena);
//! assert_eq!(report.tasks_run, 0);
//! # Ok::<(), GatewayError>(())
//! ```

pub use crate::config::GatewayConfig;
pub use crate::gateway::{Gateway, GatewayBuilder, UpdateReport};
pub use crate::host::{CommandError, CommandTarget, FreePlaySettings, GameCommand, Host, TelemetrySource};
pub use crate::protocol::envelope::OutboundMessage;
pub use crate::snapshot::{
    AvatarSnapshot, HandData, HandFrame, Joint, LevelScore, ProfileSnapshot, Quat, StatsSnapshot, Vec3,
};
pub use crate::GatewayError;
