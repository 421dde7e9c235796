//! An in-memory host for integration tests.
//!
//! `MockHost` is cheap to clone; every clone shares one [`MockState`], so a
//! test can hand a clone to the host loop and keep another to inspect what
//! the gateway applied.

use std::sync::Arc;

use companion_gateway::{
    AvatarSnapshot, CommandError, CommandTarget, GameCommand, HandData, HandFrame, Joint, LevelScore,
    ProfileSnapshot, Quat, StatsSnapshot, TelemetrySource, Vec3,
};
use parking_lot::Mutex;

/// Everything the mock host knows.
#[derive(Debug, Default)]
pub struct MockState {
    /// Commands applied, in order.
    pub applied: Vec<GameCommand>,
    /// Whether a play session is running.
    pub playing: bool,
    /// Current score, reported while playing.
    pub score: i64,
    /// Id of the active profile.
    pub active_profile: Option<String>,
    /// Known profiles.
    pub profiles: Vec<ProfileSnapshot>,
    /// Camera feed switch.
    pub camera_on: bool,
    /// Whether the right hand reports as tracked.
    pub right_hand_tracked: bool,
}

/// A host whose state lives behind a shared lock.
#[derive(Debug, Clone, Default)]
pub struct MockHost {
    pub state: Arc<Mutex<MockState>>,
}

#[allow(dead_code)]
impl MockHost {
    /// A host with `count` profiles (`p1`, `p2`, ...), the first one active.
    pub fn with_profiles(count: usize) -> Self {
        let profiles: Vec<_> = (1..=count).map(|n| profile(&format!("p{n}"), &format!("player{n}"))).collect();
        let host = Self::default();
        {
            let mut state = host.state.lock();
            state.active_profile = profiles.first().map(|p| p.id.clone());
            state.profiles = profiles;
        }
        host
    }

    /// Marks a session as running with `score`.
    pub fn playing(self, score: i64) -> Self {
        {
            let mut state = self.state.lock();
            state.playing = true;
            state.score = score;
        }
        self
    }

    /// Makes the right hand report as tracked.
    pub fn tracking_right_hand(self) -> Self {
        self.state.lock().right_hand_tracked = true;
        self
    }

    /// Snapshot of the applied command log.
    pub fn applied(&self) -> Vec<GameCommand> {
        self.state.lock().applied.clone()
    }

    /// Ends the running session, as the host would on its own.
    pub fn end_session(&self) {
        self.state.lock().playing = false;
    }
}

fn profile(id: &str, username: &str) -> ProfileSnapshot {
    ProfileSnapshot {
        id: id.to_owned(),
        username: username.to_owned(),
        avatar: Some(AvatarSnapshot {
            color_option: 1,
            eye_option: 2,
            accessory_option: 0,
        }),
        levels: vec![LevelScore {
            name: "Level 1".to_owned(),
            score: 120,
        }],
    }
}

impl CommandTarget for MockHost {
    fn apply(&mut self, command: GameCommand) -> Result<(), CommandError> {
        let mut state = self.state.lock();
        match &command {
            GameCommand::StartGame { game_type, .. } => {
                if game_type != "Classic" && game_type != "FreePlay" {
                    return Err(CommandError::new(format!("Unknown game type: {game_type}")));
                }
                state.playing = true;
                state.score = 0;
            },
            GameCommand::GoHome | GameCommand::QuitGame => state.playing = false,
            GameCommand::SelectProfile { profile_id } => {
                if !state.profiles.iter().any(|p| &p.id == profile_id) {
                    return Err(CommandError::new(format!("Unknown profile: {profile_id}")));
                }
                state.active_profile = Some(profile_id.clone());
            },
            GameCommand::CreateDebugProfile => {
                let n = state.profiles.len() + 1;
                state.profiles.push(profile(&format!("debug-{n}"), "debug"));
            },
            GameCommand::ToggleCameraFeed => state.camera_on = !state.camera_on,
        }
        state.applied.push(command);
        Ok(())
    }

    fn session_active(&self) -> bool {
        self.state.lock().playing
    }
}

impl TelemetrySource for MockHost {
    fn stats_snapshot(&self) -> Option<StatsSnapshot> {
        let state = self.state.lock();
        state.playing.then(|| StatsSnapshot {
            score: state.score,
            balloons_destroyed: state.score / 10,
            elapsed_seconds: 12.5,
        })
    }

    fn hand_frame_snapshot(&self) -> HandFrame {
        let tracked = self.state.lock().right_hand_tracked;
        HandFrame {
            timestamp: 3.25,
            left_hand: None,
            right_hand: Some(HandData {
                handedness: "Right".to_owned(),
                is_tracked: tracked,
                joints: vec![Joint {
                    joint_name: "IndexTip".to_owned(),
                    position: Vec3 { x: 0.1, y: 1.2, z: 0.3 },
                    rotation: Quat::IDENTITY,
                }],
            }),
        }
    }

    fn profile_snapshot(&self, id: Option<&str>) -> Option<ProfileSnapshot> {
        let state = self.state.lock();
        let id = id.or(state.active_profile.as_deref())?;
        state.profiles.iter().find(|p| p.id == id).cloned()
    }

    fn profiles(&self) -> Vec<ProfileSnapshot> {
        self.state.lock().profiles.clone()
    }

    fn camera_feed_url(&self) -> Option<String> {
        self.state
            .lock()
            .camera_on
            .then(|| "http://127.0.0.1:8081/camera".to_owned())
    }
}
