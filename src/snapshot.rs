//! Point-in-time reads of host state.
//!
//! Snapshots are produced by the host's [`TelemetrySource`](crate::TelemetrySource)
//! on the main thread and are immutable afterwards, so they can be handed to the
//! serializer and to every connection without further locking. Field names
//! serialize in camelCase because that is what the companion clients read.

use serde::{Deserialize, Serialize};

/// Aggregate statistics of the running play session.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    /// Current score.
    pub score: i64,
    /// Balloons destroyed so far.
    pub balloons_destroyed: i64,
    /// Seconds since the session started.
    pub elapsed_seconds: f64,
}

/// A position in tracking space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    /// X component.
    pub x: f32,
    /// Y component.
    pub y: f32,
    /// Z component.
    pub z: f32,
}

/// A rotation quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    /// X component.
    pub x: f32,
    /// Y component.
    pub y: f32,
    /// Z component.
    pub z: f32,
    /// W component.
    pub w: f32,
}

impl Quat {
    /// The identity rotation.
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// One tracked joint of a hand skeleton.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Joint {
    /// Joint identifier, e.g. `IndexTip`.
    pub joint_name: String,
    /// Joint position.
    pub position: Vec3,
    /// Joint rotation.
    pub rotation: Quat,
}

/// Skeleton of one hand. Joints keep the order the tracker reports them in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandData {
    /// `"Left"` or `"Right"`.
    pub handedness: String,
    /// Whether the tracker currently sees this hand.
    pub is_tracked: bool,
    /// Ordered joint list.
    pub joints: Vec<Joint>,
}

/// Both hands at one instant.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandFrame {
    /// Host clock in seconds.
    pub timestamp: f64,
    /// Left hand, if the tracker reported one.
    pub left_hand: Option<HandData>,
    /// Right hand, if the tracker reported one.
    pub right_hand: Option<HandData>,
}

impl HandFrame {
    /// A frame with no hands, as produced when nothing is tracked.
    #[must_use]
    pub const fn empty(timestamp: f64) -> Self {
        Self {
            timestamp,
            left_hand: None,
            right_hand: None,
        }
    }
}

/// Avatar customisation of a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarSnapshot {
    /// Colour preset index.
    pub color_option: i32,
    /// Eye preset index.
    pub eye_option: i32,
    /// Accessory preset index.
    pub accessory_option: i32,
}

/// Best score on one level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelScore {
    /// Level name.
    pub name: String,
    /// Best score.
    pub score: i64,
}

/// A player profile as the profile store reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    /// Stable profile id.
    pub id: String,
    /// Display name.
    pub username: String,
    /// Avatar, if the player customised one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<AvatarSnapshot>,
    /// Per-level scores in display order.
    #[serde(default)]
    pub levels: Vec<LevelScore>,
}

/// A profile without its level list, used by `profilesList`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSummary {
    /// Stable profile id.
    pub id: String,
    /// Display name.
    pub username: String,
    /// Avatar, if the player customised one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<AvatarSnapshot>,
}

impl From<&ProfileSnapshot> for ProfileSummary {
    fn from(profile: &ProfileSnapshot) -> Self {
        Self {
            id: profile.id.clone(),
            username: profile.username.clone(),
            avatar: profile.avatar,
        }
    }
}
