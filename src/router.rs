//! Command routing.
//!
//! Each inbound envelope's `type` is looked up in a table of handlers. Handlers
//! answer framing and validation problems on the connection thread and queue
//! everything that touches the host on the [`MainThreadDispatcher`]. A bad
//! message only ever costs the sender an `error` envelope; the connection stays
//! open.
//!
//! | `type` | runs on | reply |
//! |--------|---------|-------|
//! | `startGame` | main thread | `response`, then a countdown broadcast |
//! | `goHome`, `quitGame`, `createDebugProfile` | main thread | `response` |
//! | `selectProfile` | main thread | `profile` |
//! | `getProfile` | main thread | `profile` |
//! | `getProfiles` | main thread | `profilesList` |
//! | `toggleCameraFeed` | main thread | `cameraFeedURL` or `response` |
//! | `getHandTrackingFrame` | main thread | `handTracking` |
//! | `startHandTracking`, `stopHandTracking` | connection thread | `response` |
//!
//! [`MainThreadDispatcher`]: crate::MainThreadDispatcher

use std::collections::BTreeMap;

use crate::diagnostics::{FaultKind, FaultSeverity};
use crate::fault;
use crate::gateway::GatewayCore;
use crate::host::{CommandError, CommandTarget, GameCommand, TelemetrySource};
use crate::protocol::envelope::{InboundEnvelope, OutboundMessage, SelectProfileData, StartGameData};
use crate::server::connection::Connection;
use crate::sync::Arc;
use crate::GatewayError;

/// What a handler sees.
struct RouteContext<'a> {
    core: &'a Arc<GatewayCore>,
    conn: &'a Arc<Connection>,
}

type Handler = fn(&RouteContext<'_>, &InboundEnvelope) -> Result<(), GatewayError>;

/// Table from envelope `type` to handler.
pub struct CommandRouter {
    handlers: BTreeMap<&'static str, Handler>,
}

impl Default for CommandRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRouter {
    /// A router with every documented command registered.
    #[must_use]
    pub fn new() -> Self {
        let mut router = Self {
            handlers: BTreeMap::new(),
        };
        router.register("startGame", start_game);
        router.register("goHome", go_home);
        router.register("quitGame", quit_game);
        router.register("selectProfile", select_profile);
        router.register("getProfile", get_profile);
        router.register("getProfiles", get_profiles);
        router.register("createDebugProfile", create_debug_profile);
        router.register("toggleCameraFeed", toggle_camera_feed);
        router.register("startHandTracking", start_hand_tracking);
        router.register("stopHandTracking", stop_hand_tracking);
        router.register("getHandTrackingFrame", get_hand_tracking_frame);
        router
    }

    fn register(&mut self, kind: &'static str, handler: Handler) {
        self.handlers.insert(kind, handler);
    }

    /// Whether `kind` names a known command.
    #[must_use]
    pub fn handles(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Every known command `type`, sorted.
    pub fn command_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    /// Routes one message from `conn`.
    pub(crate) fn route(&self, core: &Arc<GatewayCore>, conn: &Arc<Connection>, text: &str) {
        let connection_id = conn.id().as_u64();
        let envelope = match InboundEnvelope::parse(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                core.diagnostics.report(
                    fault!(FaultSeverity::Warning, FaultKind::Message, "unparseable envelope: {}", err)
                        .with_connection(connection_id),
                );
                conn.reply(&OutboundMessage::error("Invalid message format"));
                return;
            },
        };

        let Some(handler) = self.handlers.get(envelope.kind.as_str()) else {
            tracing::debug!(connection_id, kind = %envelope.kind, "unknown command");
            conn.reply(&OutboundMessage::error(format!("Unknown command: {}", envelope.kind)));
            return;
        };

        tracing::debug!(connection_id, kind = %envelope.kind, "routing command");
        let ctx = RouteContext { core, conn };
        if let Err(err) = handler(&ctx, &envelope) {
            core.diagnostics.report(
                fault!(
                    FaultSeverity::Warning,
                    FaultKind::Message,
                    "invalid {} command: {}",
                    envelope.kind,
                    err
                )
                .with_connection(connection_id),
            );
            conn.reply(&OutboundMessage::error(format!(
                "Invalid data for {}: {}",
                envelope.kind, err
            )));
        }
    }
}

impl std::fmt::Debug for CommandRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRouter")
            .field("commands", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Reports a command the host refused and tells the requester why.
fn command_failed(core: &GatewayCore, conn: &Connection, command: &str, err: &CommandError) {
    core.diagnostics.report(
        fault!(FaultSeverity::Warning, FaultKind::Command, "{} failed: {}", command, err)
            .with_connection(conn.id().as_u64()),
    );
    conn.reply(&OutboundMessage::error(err.message.clone()));
}

/// Queues `command` and answers with `ack` once the host accepted it.
fn apply_and_ack(ctx: &RouteContext<'_>, command: GameCommand, ack: &'static str) {
    let core = ctx.core.clone();
    let conn = ctx.conn.clone();
    ctx.core.dispatcher.enqueue(move |host| {
        let name = command.name();
        match host.apply(command) {
            Ok(()) => conn.reply(&OutboundMessage::response(ack)),
            Err(err) => command_failed(&core, &conn, name, &err),
        }
    });
}

fn start_game(ctx: &RouteContext<'_>, envelope: &InboundEnvelope) -> Result<(), GatewayError> {
    let data: StartGameData = envelope.decode_data()?;
    let core = ctx.core.clone();
    let conn = ctx.conn.clone();
    ctx.core.dispatcher.enqueue(move |host| {
        let ack = format!("Starting {} level {}", data.game_type, data.level);
        let command = GameCommand::StartGame {
            game_type: data.game_type,
            level: data.level,
            free_play: data.free_play_settings,
        };
        match host.apply(command) {
            Ok(()) => {
                conn.reply(&OutboundMessage::response(ack));
                core.request_countdown();
            },
            Err(err) => command_failed(&core, &conn, "startGame", &err),
        }
    });
    Ok(())
}

fn go_home(ctx: &RouteContext<'_>, _: &InboundEnvelope) -> Result<(), GatewayError> {
    apply_and_ack(ctx, GameCommand::GoHome, "Returning to home");
    Ok(())
}

fn quit_game(ctx: &RouteContext<'_>, _: &InboundEnvelope) -> Result<(), GatewayError> {
    apply_and_ack(ctx, GameCommand::QuitGame, "Game quit");
    Ok(())
}

fn create_debug_profile(ctx: &RouteContext<'_>, _: &InboundEnvelope) -> Result<(), GatewayError> {
    apply_and_ack(ctx, GameCommand::CreateDebugProfile, "Debug profile created");
    Ok(())
}

fn select_profile(ctx: &RouteContext<'_>, envelope: &InboundEnvelope) -> Result<(), GatewayError> {
    let data: SelectProfileData = envelope.decode_data()?;
    let core = ctx.core.clone();
    let conn = ctx.conn.clone();
    ctx.core.dispatcher.enqueue(move |host| {
        let command = GameCommand::SelectProfile {
            profile_id: data.profile_id.clone(),
        };
        if let Err(err) = host.apply(command) {
            command_failed(&core, &conn, "selectProfile", &err);
            return;
        }
        match host.profile_snapshot(Some(&data.profile_id)) {
            Some(profile) => conn.reply(&OutboundMessage::Profile(profile)),
            None => conn.reply(&OutboundMessage::response("Profile selected")),
        }
    });
    Ok(())
}

fn get_profile(ctx: &RouteContext<'_>, _: &InboundEnvelope) -> Result<(), GatewayError> {
    let conn = ctx.conn.clone();
    ctx.core.dispatcher.enqueue(move |host| match host.profile_snapshot(None) {
        Some(profile) => conn.reply(&OutboundMessage::Profile(profile)),
        None => conn.reply(&OutboundMessage::error("No profile selected")),
    });
    Ok(())
}

fn get_profiles(ctx: &RouteContext<'_>, _: &InboundEnvelope) -> Result<(), GatewayError> {
    let conn = ctx.conn.clone();
    ctx.core.dispatcher.enqueue(move |host| {
        conn.reply(&OutboundMessage::profiles_list(&host.profiles()));
    });
    Ok(())
}

fn toggle_camera_feed(ctx: &RouteContext<'_>, _: &InboundEnvelope) -> Result<(), GatewayError> {
    let core = ctx.core.clone();
    let conn = ctx.conn.clone();
    ctx.core.dispatcher.enqueue(move |host| {
        if let Err(err) = host.apply(GameCommand::ToggleCameraFeed) {
            command_failed(&core, &conn, "toggleCameraFeed", &err);
            return;
        }
        match host.camera_feed_url() {
            Some(url) => conn.reply(&OutboundMessage::camera_feed(url)),
            None => conn.reply(&OutboundMessage::response("Camera feed disabled")),
        }
    });
    Ok(())
}

fn start_hand_tracking(ctx: &RouteContext<'_>, _: &InboundEnvelope) -> Result<(), GatewayError> {
    ctx.core.state.set_hand_tracking_enabled(true);
    ctx.conn.reply(&OutboundMessage::response("Hand tracking started"));
    Ok(())
}

fn stop_hand_tracking(ctx: &RouteContext<'_>, _: &InboundEnvelope) -> Result<(), GatewayError> {
    ctx.core.state.set_hand_tracking_enabled(false);
    ctx.conn.reply(&OutboundMessage::response("Hand tracking stopped"));
    Ok(())
}

fn get_hand_tracking_frame(ctx: &RouteContext<'_>, _: &InboundEnvelope) -> Result<(), GatewayError> {
    let conn = ctx.conn.clone();
    ctx.core.dispatcher.enqueue(move |host| {
        conn.reply(&OutboundMessage::hand_tracking(host.hand_frame_snapshot()));
    });
    Ok(())
}
