//! Acceptor and admission control
//!
//! Two independent counting semaphores bound the work:
//!
//! - the connection semaphore (capacity `max_connections`) is acquired as
//!   the first act of every spawned connection task and held until the
//!   connection ends, so a saturated server backpressures right after
//!   the OS-level accept;
//! - the processing semaphore (capacity `handle_connections`) is taken
//!   around each handler dispatch only, bounding concurrent handler work
//!   below the ceiling of idle connections held open.
//!
//! Invariant: `active_handlers ≤ handle_connections ≤ active_connections
//! ≤ max_connections`.

use crate::config::ServerConfig;
use crate::connection::Connection;
use htcp_core::dispatcher::DispatcherStats;
use htcp_core::{Dispatcher, Error, HandlerRegistry};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

/// State shared between the acceptor and every connection task
pub(crate) struct Shared {
    pub(crate) config: ServerConfig,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) connection_semaphore: Semaphore,
    pub(crate) processing_semaphore: Semaphore,
    pub(crate) active_connections: AtomicUsize,
}

/// HTCP server
///
/// Built from a validated [`ServerConfig`] and a frozen
/// [`HandlerRegistry`]; holds no state beyond the sockets it serves.
/// Clones share the same semaphores, counters and registry.
#[derive(Clone)]
pub struct Server {
    shared: Arc<Shared>,
}

impl Server {
    /// Validate the configuration and freeze the registry
    pub fn new(config: ServerConfig, registry: HandlerRegistry) -> anyhow::Result<Self> {
        config.validate()?;

        let shared = Shared {
            connection_semaphore: Semaphore::new(config.max_connections),
            processing_semaphore: Semaphore::new(config.handle_connections),
            active_connections: AtomicUsize::new(0),
            dispatcher: Dispatcher::new(registry),
            config,
        };

        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Connections currently holding a permit
    pub fn active_connections(&self) -> usize {
        self.shared.active_connections.load(Ordering::Relaxed)
    }

    /// Dispatch counters
    pub fn stats(&self) -> &DispatcherStats {
        self.shared.dispatcher.stats()
    }

    /// Bind the configured address and serve until cancelled
    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.shared.config.bind_addr()).await?;
        info!(
            "{} listening on {}",
            self.shared.config.name,
            self.shared.config.bind_addr()
        );
        self.serve(listener).await
    }

    /// Accept connections on an already-bound listener until cancelled
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            self.accept_one(&listener).await;
        }
    }

    /// Serve until the shutdown future resolves, then stop accepting
    ///
    /// In-flight connection tasks are detached and drain naturally.
    pub async fn serve_with_shutdown<F>(
        &self,
        listener: TcpListener,
        shutdown: F,
    ) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!(
                        "{} stopped accepting; draining connections",
                        self.shared.config.name
                    );
                    return Ok(());
                }
                () = self.accept_one(&listener) => {}
            }
        }
    }

    async fn accept_one(&self, listener: &TcpListener) {
        match listener.accept().await {
            Ok((socket, addr)) => {
                let shared = Arc::clone(&self.shared);
                tokio::spawn(handle_client(shared, socket, addr));
            }
            Err(e) => {
                error!("failed to accept connection: {e}");
            }
        }
    }
}

/// Drive one accepted socket through its whole life
async fn handle_client(shared: Arc<Shared>, socket: TcpStream, addr: SocketAddr) {
    // Admission: the accept already happened at the OS layer; protocol
    // work waits here until a connection slot frees up.
    let Ok(_permit) = shared.connection_semaphore.acquire().await else {
        return;
    };

    shared.active_connections.fetch_add(1, Ordering::Relaxed);
    debug!("connection from {addr}");

    let mut connection = Connection::new(socket, addr.into(), Arc::clone(&shared));
    match connection.run().await {
        Ok(()) => {}
        Err(Error::Closed) => {}
        Err(e) => error!("error handling client {addr}: {e}"),
    }
    connection.close().await;

    shared.active_connections.fetch_sub(1, Ordering::Relaxed);
    debug!("connection closed: {addr}");
}
