//! Accept loop.
//!
//! One thread blocks in `accept`; every accepted socket gets its own thread
//! running [`serve`](crate::server::connection). There is no pool: the gateway
//! expects a handful of companion devices.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

use web_time::Duration;

use crate::diagnostics::{FaultKind, FaultSeverity};
use crate::fault;
use crate::gateway::GatewayCore;
use crate::server::connection::{self, Connection};
use crate::sync::Arc;
use crate::{GatewayConfig, GatewayError};

/// Pause after a failed `accept` so a persistent error (e.g. out of file
/// descriptors) does not spin the accept thread.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// How long shutdown waits for its wake-up connection.
const WAKE_TIMEOUT: Duration = Duration::from_millis(500);

/// A bound listening socket and its accept thread.
#[derive(Debug)]
pub struct Listener {
    local_addr: SocketAddr,
    accept_thread: Option<JoinHandle<()>>,
}

impl Listener {
    /// Binds `core.config.bind_addr` and starts accepting.
    pub(crate) fn bind(core: &Arc<GatewayCore>) -> Result<Self, GatewayError> {
        let addr = core.config.bind_addr;
        let socket = TcpListener::bind(addr).map_err(|err| GatewayError::Bind {
            addr,
            context: format!("{:?}: {}", err.kind(), err),
        })?;
        let local_addr = socket.local_addr()?;

        core.set_running(true);
        let accept_core = core.clone();
        let accept_thread = thread::Builder::new()
            .name("gateway-accept".to_owned())
            .spawn(move || accept_loop(&socket, &accept_core));
        let accept_thread = match accept_thread {
            Ok(handle) => handle,
            Err(err) => {
                core.set_running(false);
                return Err(err.into());
            },
        };

        tracing::info!(%local_addr, "gateway listening");
        Ok(Self {
            local_addr,
            accept_thread: Some(accept_thread),
        })
    }

    /// The address actually bound (resolves port 0).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and closes every registered connection.
    ///
    /// Clears the running flag, wakes the blocked `accept` with a throwaway
    /// connection and joins the accept thread, which drops the listening
    /// socket. Connection threads exit on their own once their sockets are shut.
    pub(crate) fn shutdown(&mut self, core: &GatewayCore) {
        core.set_running(false);
        if let Some(handle) = self.accept_thread.take() {
            match TcpStream::connect_timeout(&wake_addr(self.local_addr), WAKE_TIMEOUT) {
                Ok(_) => {
                    if handle.join().is_err() {
                        core.diagnostics.report(fault!(
                            FaultSeverity::Error,
                            FaultKind::Internal,
                            "accept thread panicked"
                        ));
                    }
                },
                Err(err) => {
                    // The thread exits on the next accept; leave it detached.
                    tracing::warn!(error = %err, "could not wake accept thread");
                },
            }
        }
        let closed = core.registry.close_all();
        tracing::info!(closed, "gateway shut down");
    }
}

/// Where to connect to reach our own listener.
fn wake_addr(local: SocketAddr) -> SocketAddr {
    match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), local.port()),
        IpAddr::V6(ip) if ip.is_unspecified() => SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), local.port()),
        _ => local,
    }
}

fn accept_loop(socket: &TcpListener, core: &Arc<GatewayCore>) {
    for stream in socket.incoming() {
        if !core.is_running() {
            break;
        }
        match stream {
            Ok(stream) => spawn_connection(core, stream),
            Err(err) => {
                core.diagnostics.report(fault!(
                    FaultSeverity::Warning,
                    FaultKind::Transport,
                    "accept failed: {:?}: {}",
                    err.kind(),
                    err
                ));
                thread::sleep(ACCEPT_BACKOFF);
            },
        }
    }
    tracing::debug!("accept loop exited");
}

fn configure(stream: &TcpStream, config: &GatewayConfig) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    stream.set_write_timeout(config.write_timeout)?;
    Ok(())
}

fn spawn_connection(core: &Arc<GatewayCore>, stream: TcpStream) {
    let peer = stream.peer_addr().ok();
    let reader = match configure(&stream, &core.config).and_then(|()| stream.try_clone()) {
        Ok(reader) => reader,
        Err(err) => {
            core.diagnostics.report(
                fault!(
                    FaultSeverity::Warning,
                    FaultKind::Transport,
                    "could not prepare accepted socket: {}",
                    err
                )
                .with_context("peer", format!("{peer:?}")),
            );
            return;
        },
    };

    let conn = Arc::new(Connection::new(stream, peer));
    let id = conn.id();
    tracing::debug!(connection_id = %id, ?peer, "accepted");

    let thread_core = core.clone();
    let spawned = thread::Builder::new()
        .name(format!("gateway-conn-{id}"))
        .spawn(move || connection::serve(conn, reader, &thread_core));
    if let Err(err) = spawned {
        core.diagnostics.report(
            fault!(
                FaultSeverity::Error,
                FaultKind::Transport,
                "could not spawn connection thread: {}",
                err
            )
            .with_connection(id.as_u64()),
        );
    }
}
