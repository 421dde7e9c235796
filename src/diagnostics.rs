//! Structured fault reporting.
//!
//! Every recoverable failure the gateway handles (a dropped socket, a bad frame,
//! an unparseable envelope, a command the host rejected) is turned into a
//! [`Fault`] record and handed to a [`FaultObserver`]. By default faults go to
//! `tracing`; tests swap in a [`CollectingObserver`] and assert on what was
//! reported.
//!
//! # Example
//!
//! ```
//! use companion_gateway::diagnostics::{CollectingObserver, Diagnostics, FaultKind, FaultSeverity};
//! use companion_gateway::fault;
//! use std::sync::Arc;
//!
//! let observer = Arc::new(CollectingObserver::new());
//! let diagnostics = Diagnostics::new(observer.clone());
//!
//! diagnostics.report(
//!     fault!(FaultSeverity::Warning, FaultKind::Message, "bad envelope from {}", "peer")
//!         .with_connection(7),
//! );
//!
//! assert!(observer.has_fault(FaultKind::Message));
//! ```

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::Mutex;
use std::sync::Arc;

/// How bad a fault is. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultSeverity {
    /// The gateway recovered without losing anything but the offending message.
    Warning,
    /// A connection was lost or a command failed.
    Error,
    /// The gateway itself cannot serve clients.
    Critical,
}

impl FaultSeverity {
    /// Returns a string representation suitable for logging/metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for FaultSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categories of faults, one per layer that can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum FaultKind {
    /// Socket accept, read or write failed. The connection is evicted.
    Transport,
    /// A frame or handshake was malformed. The connection is closed.
    Protocol,
    /// An envelope was unparseable or named an unknown command. The connection
    /// stays open.
    Message,
    /// The host failed a dispatched command.
    Command,
    /// The listening socket could not be set up.
    Listener,
    /// A configuration value was rejected.
    Configuration,
    /// A bug in the gateway itself.
    Internal,
}

impl FaultKind {
    /// Returns a string representation suitable for logging/metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::Message => "message",
            Self::Command => "command",
            Self::Listener => "listener",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded fault.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Fault {
    /// The severity level of this fault.
    pub severity: FaultSeverity,
    /// The layer where the fault occurred.
    pub kind: FaultKind,
    /// Human-readable description of what went wrong.
    pub message: String,
    /// Source location where the fault was detected (file:line).
    pub location: &'static str,
    /// The connection involved, if any.
    pub connection_id: Option<u64>,
    /// Additional structured context as key-value pairs.
    pub context: BTreeMap<String, String>,
}

impl Fault {
    /// Creates a new fault record.
    #[must_use]
    pub fn new(
        severity: FaultSeverity,
        kind: FaultKind,
        message: impl Into<String>,
        location: &'static str,
    ) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            location,
            connection_id: None,
            context: BTreeMap::new(),
        }
    }

    /// Attributes the fault to a connection.
    #[must_use]
    pub fn with_connection(mut self, connection_id: u64) -> Self {
        self.connection_id = Some(connection_id);
        self
    }

    /// Adds a context key-value pair.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Serializes this fault to a JSON string.
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}/{}] {} (at {}",
            self.severity, self.kind, self.message, self.location
        )?;
        if let Some(id) = self.connection_id {
            write!(f, ", connection={id}")?;
        }
        if !self.context.is_empty() {
            write!(f, ", context={:?}", self.context)?;
        }
        write!(f, ")")
    }
}

/// Receives faults. Called from connection threads and from the main thread,
/// so implementations must be `Send + Sync` and should return quickly.
pub trait FaultObserver: Send + Sync {
    /// Called once per fault.
    fn on_fault(&self, fault: &Fault);
}

/// Default observer: logs faults via `tracing`.
///
/// `Warning` maps to `warn!`; `Error` and `Critical` map to `error!`.
#[derive(Debug, Default, Clone)]
pub struct TracingObserver;

impl TracingObserver {
    /// Creates a new tracing observer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl FaultObserver for TracingObserver {
    fn on_fault(&self, fault: &Fault) {
        let severity = fault.severity.as_str();
        let kind = fault.kind.as_str();
        let location = fault.location;
        let connection = fault.connection_id.map_or_else(|| "none".to_owned(), |id| id.to_string());
        let context = if fault.context.is_empty() {
            "{}".to_owned()
        } else {
            let pairs: Vec<String> = fault
                .context
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            format!("{{{}}}", pairs.join(", "))
        };

        match fault.severity {
            FaultSeverity::Warning => {
                tracing::warn!(severity, kind, location, connection = %connection, context = %context, "{}", fault.message);
            },
            FaultSeverity::Error | FaultSeverity::Critical => {
                tracing::error!(severity, kind, location, connection = %connection, context = %context, "{}", fault.message);
            },
        }
    }
}

/// Observer that keeps every fault, for tests.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    faults: Mutex<Vec<Fault>>,
}

impl CollectingObserver {
    /// Creates a new collecting observer with an empty fault list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            faults: Mutex::new(Vec::new()),
        }
    }

    /// Returns a copy of all collected faults.
    #[must_use]
    pub fn faults(&self) -> Vec<Fault> {
        self.faults.lock().clone()
    }

    /// Returns the number of collected faults.
    #[must_use]
    pub fn len(&self) -> usize {
        self.faults.lock().len()
    }

    /// Returns true if no faults have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.faults.lock().is_empty()
    }

    /// Checks if any fault of the specified kind has been collected.
    #[must_use]
    pub fn has_fault(&self, kind: FaultKind) -> bool {
        self.faults.lock().iter().any(|f| f.kind == kind)
    }

    /// Returns all faults matching the specified kind.
    #[must_use]
    pub fn faults_of_kind(&self, kind: FaultKind) -> Vec<Fault> {
        self.faults
            .lock()
            .iter()
            .filter(|f| f.kind == kind)
            .cloned()
            .collect()
    }

    /// Clears all collected faults.
    pub fn clear(&self) {
        self.faults.lock().clear();
    }
}

impl FaultObserver for CollectingObserver {
    fn on_fault(&self, fault: &Fault) {
        self.faults.lock().push(fault.clone());
    }
}

/// Forwards faults to several observers, e.g. tracing plus a collector.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn FaultObserver>>,
}

impl CompositeObserver {
    /// Creates a new composite observer with no child observers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    /// Adds an observer to the composite.
    pub fn add(&mut self, observer: Arc<dyn FaultObserver>) {
        self.observers.push(observer);
    }
}

impl FaultObserver for CompositeObserver {
    fn on_fault(&self, fault: &Fault) {
        for observer in &self.observers {
            observer.on_fault(fault);
        }
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("num_observers", &self.observers.len())
            .finish()
    }
}

/// Cloneable handle every gateway component reports through.
#[derive(Clone)]
pub struct Diagnostics {
    observer: Arc<dyn FaultObserver>,
}

impl Diagnostics {
    /// Reports to `observer`.
    #[must_use]
    pub fn new(observer: Arc<dyn FaultObserver>) -> Self {
        Self { observer }
    }

    /// Hands `fault` to the observer.
    pub fn report(&self, fault: Fault) {
        self.observer.on_fault(&fault);
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(Arc::new(TracingObserver))
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics").finish_non_exhaustive()
    }
}

/// Builds a [`Fault`] stamped with the current file and line.
///
/// ```text
/// fault!(severity, kind, "message");
/// fault!(severity, kind, "message with {}", format_args);
/// ```
#[macro_export]
macro_rules! fault {
    ($severity:expr, $kind:expr, $msg:literal) => {
        $crate::diagnostics::Fault::new($severity, $kind, $msg, concat!(file!(), ":", line!()))
    };

    ($severity:expr, $kind:expr, $fmt:literal, $($arg:tt)+) => {
        $crate::diagnostics::Fault::new(
            $severity,
            $kind,
            format!($fmt, $($arg)+),
            concat!(file!(), ":", line!()),
        )
    };
}

/// Asserts that no faults have been collected.
///
/// # Panics
///
/// Panics if the observer contains any faults, printing them for debugging.
#[macro_export]
macro_rules! assert_no_faults {
    ($observer:expr) => {{
        let faults = $observer.faults();
        assert!(
            faults.is_empty(),
            "Expected no faults, but found {}:\n{:#?}",
            faults.len(),
            faults
        );
    }};
}

/// Asserts that a fault of the specified kind was collected.
///
/// # Panics
///
/// Panics if no fault of the specified kind was found.
#[macro_export]
macro_rules! assert_fault {
    ($observer:expr, $kind:expr) => {{
        assert!(
            $observer.has_fault($kind),
            "Expected fault of kind {:?}, but found: {:#?}",
            $kind,
            $observer.faults()
        );
    }};
}
