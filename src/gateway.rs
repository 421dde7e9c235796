//! The embeddable gateway.
//!
//! A [`Gateway`] owns the listener, the connection registry, the dispatch
//! queue, the telemetry tickers and the countdown. The host builds one with
//! [`GatewayBuilder`], calls [`Gateway::start`] once, and then calls
//! [`Gateway::update`] from its main loop every tick:
//!
//! ```no_run
//! use companion_gateway::{GatewayBuilder, Host};
//!
//! fn run(host: &mut impl Host) -> Result<(), companion_gateway::GatewayError> {
//!     let mut gateway = GatewayBuilder::new().with_port(8080).build()?;
//!     gateway.start()?;
//!     loop {
//!         // ... advance the simulation ...
//!         gateway.update(host);
//!     }
//! }
//! ```

use std::net::SocketAddr;

use web_time::{Duration, Instant};

use crate::config::GatewayConfig;
use crate::countdown::{Countdown, CountdownStep};
use crate::diagnostics::{Diagnostics, FaultKind, FaultObserver, FaultSeverity};
use crate::dispatcher::MainThreadDispatcher;
use crate::fault;
use crate::host::{CommandTarget, Host};
use crate::protocol::envelope::OutboundMessage;
use crate::router::CommandRouter;
use crate::server::listener::Listener;
use crate::server::registry::ConnectionRegistry;
use crate::sync::{Arc, AtomicBool, Ordering};
use crate::tickers::{GatewayState, TelemetryTickers, TickReport};
use crate::GatewayError;

/// State shared between the host thread, the accept thread and every
/// connection thread.
pub(crate) struct GatewayCore {
    pub(crate) config: GatewayConfig,
    pub(crate) registry: ConnectionRegistry,
    pub(crate) dispatcher: MainThreadDispatcher,
    pub(crate) state: GatewayState,
    pub(crate) router: CommandRouter,
    pub(crate) diagnostics: Diagnostics,
    running: AtomicBool,
    countdown_requested: AtomicBool,
}

impl GatewayCore {
    pub(crate) fn new(config: GatewayConfig, diagnostics: Diagnostics) -> Self {
        Self {
            registry: ConnectionRegistry::new(diagnostics.clone()),
            dispatcher: MainThreadDispatcher::new(diagnostics.clone()),
            state: GatewayState::new(config.send_stats_updates, config.send_hand_tracking_data),
            router: CommandRouter::new(),
            diagnostics,
            config,
            running: AtomicBool::new(false),
            countdown_requested: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    /// Asks the next update to (re)start the countdown.
    pub(crate) fn request_countdown(&self) {
        self.countdown_requested.store(true, Ordering::Release);
    }

    pub(crate) fn take_countdown_request(&self) -> bool {
        self.countdown_requested.swap(false, Ordering::AcqRel)
    }
}

/// What one [`Gateway::update_at`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Dispatched tasks that ran.
    pub tasks_run: usize,
    /// Countdown step broadcast this update, if any.
    pub countdown: Option<CountdownStep>,
    /// Telemetry broadcast this update.
    pub telemetry: TickReport,
}

/// Builds a [`Gateway`].
///
/// ```
/// use companion_gateway::{GatewayBuilder, GatewayConfig};
/// use web_time::Duration;
///
/// let gateway = GatewayBuilder::new()
///     .with_config(GatewayConfig::lan())
///     .with_port(0)
///     .with_hand_tracking_interval(Duration::from_millis(20))
///     .with_server_name("Balloon Arena")
///     .build()
///     .unwrap();
/// assert_eq!(gateway.config().server_name, "Balloon Arena");
/// ```
#[must_use = "GatewayBuilder does nothing until build() is called"]
pub struct GatewayBuilder {
    config: GatewayConfig,
    observer: Option<std::sync::Arc<dyn FaultObserver>>,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayBuilder {
    /// A builder with [`GatewayConfig::default`].
    pub fn new() -> Self {
        Self {
            config: GatewayConfig::default(),
            observer: None,
        }
    }

    /// Replaces the whole configuration.
    pub fn with_config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Listening address. Default is `0.0.0.0:8080`.
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Listening port, keeping the configured interface. Port 0 picks a free
    /// port; read it back from [`Gateway::start`].
    pub fn with_port(mut self, port: u16) -> Self {
        self.config.bind_addr.set_port(port);
        self
    }

    /// Stats broadcast period. Default is 1s.
    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.config.stats_interval = interval;
        self
    }

    /// Hand-frame broadcast period. Default is 50ms.
    pub fn with_hand_tracking_interval(mut self, interval: Duration) -> Self {
        self.config.hand_tracking_interval = interval;
        self
    }

    /// Whether stats broadcasting starts enabled. Default is true.
    pub fn with_stats_updates(mut self, enabled: bool) -> Self {
        self.config.send_stats_updates = enabled;
        self
    }

    /// Whether hand-frame broadcasting starts enabled. Default is false.
    pub fn with_hand_tracking(mut self, enabled: bool) -> Self {
        self.config.send_hand_tracking_data = enabled;
        self
    }

    /// Per-socket write timeout. `None` lets a stalled client block senders.
    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    /// Countdown length and step period. Zero steps disables the countdown.
    pub fn with_countdown(mut self, steps: u32, interval: Duration) -> Self {
        self.config.countdown_steps = steps;
        self.config.countdown_interval = interval;
        self
    }

    /// Name announced in the welcome message.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = name.into();
        self
    }

    /// Where faults go. Default is [`TracingObserver`](crate::diagnostics::TracingObserver).
    pub fn with_fault_observer(mut self, observer: std::sync::Arc<dyn FaultObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Validates the configuration and builds the gateway. Nothing is bound
    /// until [`Gateway::start`].
    pub fn build(self) -> Result<Gateway, GatewayError> {
        let diagnostics = self.observer.map_or_else(Diagnostics::default, Diagnostics::new);
        if let Err(err) = self.config.validate() {
            diagnostics.report(fault!(FaultSeverity::Critical, FaultKind::Configuration, "{}", err));
            return Err(err);
        }
        Ok(Gateway::new(GatewayCore::new(self.config, diagnostics)))
    }
}

/// The running gateway.
pub struct Gateway {
    core: Arc<GatewayCore>,
    tickers: TelemetryTickers,
    countdown: Countdown,
    listener: Option<Listener>,
}

impl Gateway {
    fn new(core: GatewayCore) -> Self {
        let config = &core.config;
        let tickers = TelemetryTickers::new(config.stats_interval, config.hand_tracking_interval);
        let countdown = Countdown::new(config.countdown_steps, config.countdown_interval);
        Self {
            core: Arc::new(core),
            tickers,
            countdown,
            listener: None,
        }
    }

    /// Binds the listener and starts accepting clients. Returns the bound
    /// address.
    ///
    /// A bind failure is reported as a critical [`FaultKind::Listener`] fault
    /// and returned; the gateway stays stopped and can be started again.
    pub fn start(&mut self) -> Result<SocketAddr, GatewayError> {
        if self.listener.is_some() {
            return Err(GatewayError::AlreadyRunning);
        }
        match Listener::bind(&self.core) {
            Ok(listener) => {
                let addr = listener.local_addr();
                self.listener = Some(listener);
                Ok(addr)
            },
            Err(err) => {
                self.core.diagnostics.report(fault!(
                    FaultSeverity::Critical,
                    FaultKind::Listener,
                    "gateway not started: {}",
                    err
                ));
                Err(err)
            },
        }
    }

    /// The bound address while running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(Listener::local_addr)
    }

    /// Whether the listener is up.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.listener.is_some()
    }

    /// Per-tick entry point; call from the host's main thread.
    pub fn update<H: Host>(&mut self, host: &mut H) -> UpdateReport {
        self.update_at(Instant::now(), host)
    }

    /// [`update`](Self::update) with an explicit clock.
    ///
    /// Order within one call: drain the dispatcher, step the countdown, step
    /// both telemetry tickers.
    pub fn update_at(&mut self, now: Instant, host: &mut dyn Host) -> UpdateReport {
        let tasks_run = self.core.dispatcher.drain_and_run_all(host);

        if self.core.take_countdown_request() {
            self.countdown.arm(now);
        }
        let countdown = self.countdown.poll(now, || host.session_active());
        if let Some(step) = countdown {
            self.core
                .registry
                .broadcast_message(&OutboundMessage::countdown(step.label()));
        }

        let telemetry = self
            .tickers
            .tick(now, &self.core.state, &*host, &self.core.registry);

        UpdateReport {
            tasks_run,
            countdown,
            telemetry,
        }
    }

    /// Sends `message` to every open connection. Returns how many received it.
    pub fn broadcast(&self, message: &OutboundMessage) -> usize {
        self.core.registry.broadcast_message(message)
    }

    /// Number of open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.core.registry.count()
    }

    /// The broadcast switches.
    #[must_use]
    pub fn state(&self) -> &GatewayState {
        &self.core.state
    }

    /// The dispatch queue, for hosts that want to queue their own work.
    #[must_use]
    pub fn dispatcher(&self) -> &MainThreadDispatcher {
        &self.core.dispatcher
    }

    /// The configuration the gateway was built with.
    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.core.config
    }

    /// Stops accepting, closes every connection and cancels a running
    /// countdown. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            listener.shutdown(&self.core);
        }
        self.countdown.cancel();
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("local_addr", &self.local_addr())
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}
