//! A headless stand-in for the game: runs a 60 Hz main loop, pumps the
//! gateway every frame and simulates a balloon-popping session so companion
//! clients have something to watch.
//!
//! ```bash
//! cargo run --example mock_host -- --port 8080 --hands
//! ```
//!
//! Then connect any WebSocket client to `ws://127.0.0.1:8080/` and send e.g.
//! `{"type":"startGame","data":{"gameType":"Classic","level":1}}`.

use clap::Parser;
use companion_gateway::prelude::*;
use companion_gateway::TracingObserver;
use std::sync::Arc;
use web_time::{Duration, Instant};

const FPS: f64 = 60.0;

#[derive(Parser)]
struct Opt {
    /// Port to listen on.
    #[arg(short, long, default_value_t = 8080)]
    port: u16,
    /// Broadcast hand frames from the start.
    #[arg(long)]
    hands: bool,
    /// Seconds between stats broadcasts.
    #[arg(long, default_value_t = 1.0)]
    stats_every: f64,
    /// Stop after this many seconds (runs forever when omitted).
    #[arg(long)]
    run_for: Option<f64>,
}

/// The simulated game.
struct Arena {
    started: Instant,
    session_start: Option<Instant>,
    score: i64,
    balloons: i64,
    profiles: Vec<ProfileSnapshot>,
    active: Option<usize>,
    camera: bool,
}

impl Arena {
    fn new() -> Self {
        let profiles = ["ada", "grace", "linus"]
            .iter()
            .enumerate()
            .map(|(i, name)| ProfileSnapshot {
                id: format!("profile-{i}"),
                username: (*name).to_owned(),
                avatar: Some(AvatarSnapshot {
                    color_option: i as i32,
                    eye_option: 0,
                    accessory_option: 1,
                }),
                levels: vec![LevelScore {
                    name: "Level 1".to_owned(),
                    score: 100 * (i as i64 + 1),
                }],
            })
            .collect();
        Self {
            started: Instant::now(),
            session_start: None,
            score: 0,
            balloons: 0,
            profiles,
            active: Some(0),
            camera: false,
        }
    }

    /// One simulation frame: pop a balloon now and then.
    fn step(&mut self, frame: u64) {
        if self.session_start.is_some() && frame % 45 == 0 {
            self.balloons += 1;
            self.score += 10;
        }
    }

    fn wave(&self, phase: f32) -> HandData {
        let t = self.started.elapsed().as_secs_f32();
        HandData {
            handedness: if phase > 0.0 { "Right" } else { "Left" }.to_owned(),
            is_tracked: true,
            joints: ["Wrist", "IndexTip", "ThumbTip"]
                .iter()
                .enumerate()
                .map(|(i, name)| Joint {
                    joint_name: (*name).to_owned(),
                    position: Vec3 {
                        x: phase * 0.2 + (t + i as f32).sin() * 0.05,
                        y: 1.1 + i as f32 * 0.03,
                        z: 0.4,
                    },
                    rotation: Quat::IDENTITY,
                })
                .collect(),
        }
    }
}

impl CommandTarget for Arena {
    fn apply(&mut self, command: GameCommand) -> Result<(), CommandError> {
        match command {
            GameCommand::StartGame { game_type, level, .. } => {
                if game_type != "Classic" && game_type != "FreePlay" {
                    return Err(CommandError::new(format!("Unknown game type: {game_type}")));
                }
                tracing::info!(%game_type, level, "session starting");
                self.session_start = Some(Instant::now());
                self.score = 0;
                self.balloons = 0;
            },
            GameCommand::GoHome | GameCommand::QuitGame => self.session_start = None,
            GameCommand::SelectProfile { profile_id } => {
                let index = self
                    .profiles
                    .iter()
                    .position(|p| p.id == profile_id)
                    .ok_or_else(|| CommandError::new(format!("Unknown profile: {profile_id}")))?;
                self.active = Some(index);
            },
            GameCommand::CreateDebugProfile => {
                let n = self.profiles.len();
                self.profiles.push(ProfileSnapshot {
                    id: format!("profile-{n}"),
                    username: format!("debug{n}"),
                    avatar: None,
                    levels: Vec::new(),
                });
            },
            GameCommand::ToggleCameraFeed => self.camera = !self.camera,
        }
        Ok(())
    }

    fn session_active(&self) -> bool {
        self.session_start.is_some()
    }
}

impl TelemetrySource for Arena {
    fn stats_snapshot(&self) -> Option<StatsSnapshot> {
        self.session_start.map(|start| StatsSnapshot {
            score: self.score,
            balloons_destroyed: self.balloons,
            elapsed_seconds: start.elapsed().as_secs_f64(),
        })
    }

    fn hand_frame_snapshot(&self) -> HandFrame {
        HandFrame {
            timestamp: self.started.elapsed().as_secs_f64(),
            left_hand: Some(self.wave(-1.0)),
            right_hand: Some(self.wave(1.0)),
        }
    }

    fn profile_snapshot(&self, id: Option<&str>) -> Option<ProfileSnapshot> {
        match id {
            Some(id) => self.profiles.iter().find(|p| p.id == id).cloned(),
            None => self.active.and_then(|i| self.profiles.get(i)).cloned(),
        }
    }

    fn profiles(&self) -> Vec<ProfileSnapshot> {
        self.profiles.clone()
    }

    fn camera_feed_url(&self) -> Option<String> {
        self.camera.then(|| "http://127.0.0.1:8081/camera.mjpg".to_owned())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // configure logging: gateway and demo logs to standard out, RUST_LOG overrides
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,companion_gateway=debug")),
            )
            .finish(),
    )?;

    let opt = Opt::parse();

    let mut gateway = GatewayBuilder::new()
        .with_port(opt.port)
        .with_stats_interval(Duration::from_secs_f64(opt.stats_every))
        .with_hand_tracking(opt.hands)
        .with_server_name("mock-host")
        .with_fault_observer(Arc::new(TracingObserver::new()))
        .build()?;
    let addr = gateway.start()?;
    tracing::info!(%addr, "mock host running, press Ctrl-C to stop");

    let mut arena = Arena::new();
    let frame_time = Duration::from_secs_f64(1.0 / FPS);
    let deadline = opt.run_for.map(|secs| Instant::now() + Duration::from_secs_f64(secs));
    let mut frame = 0_u64;

    loop {
        let frame_start = Instant::now();
        arena.step(frame);
        let report = gateway.update(&mut arena);
        if let Some(step) = report.countdown {
            tracing::info!(step = %step.label(), "countdown");
        }
        frame += 1;

        if deadline.is_some_and(|deadline| frame_start >= deadline) {
            break;
        }
        if let Some(rest) = frame_time.checked_sub(frame_start.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    gateway.shutdown();
    Ok(())
}
