//! JSON envelopes exchanged over the WebSocket.
//!
//! Every message is one `{ "type": ..., "data": ... }` object. Inbound, `type` is
//! an open-ended string: the router looks it up in its handler table and keeps
//! `data` as a raw [`Value`] until the matching handler decodes it into its own
//! shape. Outbound, [`OutboundMessage`] has one variant per documented `type`, so
//! the serializer produces the wire shape directly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::host::FreePlaySettings;
use crate::snapshot::{HandData, HandFrame, ProfileSnapshot, ProfileSummary, StatsSnapshot};
use crate::GatewayError;

/// An inbound command envelope.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundEnvelope {
    /// Dispatch key.
    #[serde(rename = "type")]
    pub kind: String,
    /// Command arguments, still undecoded.
    #[serde(default)]
    pub data: Option<Value>,
}

impl InboundEnvelope {
    /// Parses an envelope from message text.
    pub fn parse(text: &str) -> Result<Self, GatewayError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Decodes `data` into a command-specific shape. A missing `data` is decoded
    /// from `null`, which fails for every shape with required fields.
    pub fn decode_data<T: serde::de::DeserializeOwned>(&self) -> Result<T, GatewayError> {
        let data = self.data.clone().unwrap_or(Value::Null);
        Ok(serde_json::from_value(data)?)
    }
}

/// `data` of `startGame`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartGameData {
    /// Game mode name, interpreted by the host.
    pub game_type: String,
    /// Level index.
    pub level: i32,
    /// Free-play tuning, only meaningful for free-play modes.
    #[serde(default)]
    pub free_play_settings: Option<FreePlaySettings>,
}

/// `data` of `selectProfile`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectProfileData {
    /// Id of the profile to make active.
    pub profile_id: String,
}

/// `data` of `response`, `error` and `countdown`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    /// Human-readable text.
    pub message: String,
}

/// `data` of `profilesList`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilesListPayload {
    /// Every known profile, without level lists.
    pub profiles: Vec<ProfileSummary>,
}

/// `data` of `stats`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatsPayload {
    /// Current score.
    pub score: i64,
    /// Balloons destroyed so far.
    pub balloons: i64,
    /// Seconds since the session started.
    pub time: f64,
}

impl From<StatsSnapshot> for StatsPayload {
    fn from(stats: StatsSnapshot) -> Self {
        Self {
            score: stats.score,
            balloons: stats.balloons_destroyed,
            time: stats.elapsed_seconds,
        }
    }
}

/// `data` of `handTracking`. Untracked hands are `null`, never an empty skeleton.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandTrackingPayload {
    /// Host clock in seconds.
    pub timestamp: f64,
    /// Same instant in whole milliseconds.
    pub timestamp_ms: i64,
    /// Left hand, `null` unless tracked.
    pub left_hand: Option<HandData>,
    /// Right hand, `null` unless tracked.
    pub right_hand: Option<HandData>,
}

impl From<HandFrame> for HandTrackingPayload {
    fn from(frame: HandFrame) -> Self {
        Self {
            timestamp: frame.timestamp,
            timestamp_ms: (frame.timestamp * 1000.0).round() as i64,
            left_hand: frame.left_hand.filter(|hand| hand.is_tracked),
            right_hand: frame.right_hand.filter(|hand| hand.is_tracked),
        }
    }
}

/// `data` of `cameraFeedURL`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraFeedPayload {
    /// Where the MJPEG feed can be fetched.
    pub url: String,
}

/// Every envelope the gateway sends.
///
/// ```
/// use companion_gateway::OutboundMessage;
///
/// let json = OutboundMessage::error("Unknown command: bogus").to_json().unwrap();
/// assert_eq!(json, r#"{"type":"error","data":{"message":"Unknown command: bogus"}}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum OutboundMessage {
    /// Acknowledgement of a command.
    Response(MessageBody),
    /// A command or message failed.
    Error(MessageBody),
    /// The active profile with its level scores.
    Profile(ProfileSnapshot),
    /// All profiles.
    ProfilesList(ProfilesListPayload),
    /// Periodic play statistics.
    Stats(StatsPayload),
    /// Periodic hand skeletons.
    HandTracking(HandTrackingPayload),
    /// One step of the pre-game countdown.
    Countdown(MessageBody),
    /// Location of the camera feed.
    #[serde(rename = "cameraFeedURL")]
    CameraFeedUrl(CameraFeedPayload),
}

impl OutboundMessage {
    /// A `response` envelope.
    pub fn response(message: impl Into<String>) -> Self {
        Self::Response(MessageBody {
            message: message.into(),
        })
    }

    /// An `error` envelope.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(MessageBody {
            message: message.into(),
        })
    }

    /// A `countdown` envelope.
    pub fn countdown(message: impl Into<String>) -> Self {
        Self::Countdown(MessageBody {
            message: message.into(),
        })
    }

    /// A `stats` envelope.
    #[must_use]
    pub fn stats(stats: StatsSnapshot) -> Self {
        Self::Stats(stats.into())
    }

    /// A `handTracking` envelope.
    #[must_use]
    pub fn hand_tracking(frame: HandFrame) -> Self {
        Self::HandTracking(frame.into())
    }

    /// A `profilesList` envelope.
    #[must_use]
    pub fn profiles_list(profiles: &[ProfileSnapshot]) -> Self {
        Self::ProfilesList(ProfilesListPayload {
            profiles: profiles.iter().map(ProfileSummary::from).collect(),
        })
    }

    /// A `cameraFeedURL` envelope.
    pub fn camera_feed(url: impl Into<String>) -> Self {
        Self::CameraFeedUrl(CameraFeedPayload { url: url.into() })
    }

    /// The wire `type` of this envelope, for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Response(_) => "response",
            Self::Error(_) => "error",
            Self::Profile(_) => "profile",
            Self::ProfilesList(_) => "profilesList",
            Self::Stats(_) => "stats",
            Self::HandTracking(_) => "handTracking",
            Self::Countdown(_) => "countdown",
            Self::CameraFeedUrl(_) => "cameraFeedURL",
        }
    }

    /// Serializes the envelope to message text.
    pub fn to_json(&self) -> Result<String, GatewayError> {
        Ok(serde_json::to_string(self)?)
    }
}
