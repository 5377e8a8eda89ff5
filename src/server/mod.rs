//! TCP accept loop and connection lifecycle.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;

use crate::config::Limits;
use crate::store::Store;

pub mod proto;
pub mod session;

pub use session::SessionError;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub limits: Limits,
    /// Concurrent session cap. `None` means unlimited; at the cap new
    /// sockets are dropped before the greeting.
    pub max_connections: Option<NonZeroUsize>,
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub struct Server {
    store: Arc<Store>,
    config: ServerConfig,
}

/// Handle to a server running on a background thread. Dropping it leaves
/// the server running; `shutdown` stops the accept loop and joins.
pub struct ServerHandle {
    shutdown: Arc<AtomicBool>,
    join: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.join.join();
    }
}

impl Server {
    pub fn new(store: Arc<Store>, config: ServerConfig) -> Self {
        Self { store, config }
    }

    /// Binds the listener and serves on a background thread. The returned
    /// handle carries the bound address, so `:0` works for tests.
    pub fn start(self) -> Result<ServerHandle, ServeError> {
        let listener = TcpListener::bind(&self.config.listen_addr)?;
        let local_addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let runtime = ServerRuntime {
            store: self.store,
            limits: self.config.limits,
            max_connections: self.config.max_connections,
            shutdown: Arc::clone(&shutdown),
            active_connections: Arc::new(AtomicUsize::new(0)),
        };

        tracing::info!(%local_addr, "listening");
        let join = thread::spawn(move || run_accept_loop(listener, runtime));

        Ok(ServerHandle {
            shutdown,
            join,
            local_addr,
        })
    }

    /// Serves on the calling thread until the process exits. The binary's
    /// entry point; tests use `start` plus the handle instead.
    pub fn run(self) -> Result<(), ServeError> {
        let handle = self.start()?;
        let _ = handle.join.join();
        Ok(())
    }
}

struct ServerRuntime {
    store: Arc<Store>,
    limits: Limits,
    max_connections: Option<NonZeroUsize>,
    shutdown: Arc<AtomicBool>,
    active_connections: Arc<AtomicUsize>,
}

struct ConnectionGuard {
    active: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    fn try_acquire(active: &Arc<AtomicUsize>, max: NonZeroUsize) -> Option<Self> {
        let mut current = active.load(Ordering::Acquire);
        loop {
            if current >= max.get() {
                return None;
            }
            match active.compare_exchange(
                current,
                current.saturating_add(1),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(Self {
                        active: Arc::clone(active),
                    });
                }
                Err(next) => current = next,
            }
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let prev = self.active.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "active connection counter underflow");
    }
}

fn run_accept_loop(listener: TcpListener, runtime: ServerRuntime) {
    loop {
        if runtime.shutdown.load(Ordering::Relaxed) {
            break;
        }

        match listener.accept() {
            Ok((stream, peer)) => spawn_session(stream, peer, &runtime),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(25));
            }
            Err(err) => {
                tracing::warn!("accept error: {err}");
                thread::sleep(Duration::from_millis(25));
            }
        }
    }
}

fn spawn_session(stream: TcpStream, peer: SocketAddr, runtime: &ServerRuntime) {
    let guard = match runtime.max_connections {
        Some(max) => {
            match ConnectionGuard::try_acquire(&runtime.active_connections, max) {
                Some(guard) => Some(guard),
                None => {
                    tracing::warn!(%peer, "connection limit reached, dropping client");
                    return;
                }
            }
        }
        None => None,
    };

    let store = Arc::clone(&runtime.store);
    let limits = runtime.limits.clone();
    thread::spawn(move || {
        let _guard = guard;
        tracing::debug!(%peer, "client connected");
        if let Err(err) = session::serve(stream, store, limits) {
            tracing::debug!(%peer, "session ended: {err}");
        }
        tracing::debug!(%peer, "client disconnected");
    });
}
