//! Transaction handler infrastructure
//!
//! Handlers are registered against a transaction string during startup;
//! the serving path sees an immutable snapshot. A handler receives the
//! request (package plus client address) and returns the response bytes.

use crate::package::Package;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::warn;

/// Address of the requesting peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: IpAddr,
    pub port: u16,
}

impl ClientInfo {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }
}

impl From<std::net::SocketAddr> for ClientInfo {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl fmt::Display for ClientInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// One request as seen by a handler
#[derive(Debug, Clone)]
pub struct Request {
    pub package: Package,
    pub client: ClientInfo,
}

impl Request {
    /// The request content bytes
    pub fn data(&self) -> &[u8] {
        &self.package.content
    }
}

/// Trait for transaction handlers
///
/// Implementations may suspend freely; the connection loop awaits the
/// handler before replying, so a synchronous handler is simply one that
/// never yields.
#[async_trait]
pub trait TransactionHandler: Send + Sync {
    /// Handle a request, returning the response content bytes
    async fn handle(&self, request: &Request) -> anyhow::Result<Vec<u8>>;
}

/// Type alias for a shared handler
pub type BoxedHandler = Arc<dyn TransactionHandler>;

/// Adapter exposing a plain closure as a handler
struct FnHandler<F>(F);

#[async_trait]
impl<F> TransactionHandler for FnHandler<F>
where
    F: Fn(&Request) -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    async fn handle(&self, request: &Request) -> anyhow::Result<Vec<u8>> {
        (self.0)(request)
    }
}

/// Registry mapping transaction names to handlers
///
/// Registration is a startup-phase activity; once the registry is handed
/// to a server it is no longer mutated.
pub struct HandlerRegistry {
    handlers: HashMap<String, BoxedHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a transaction. Last registration wins.
    pub fn register(&mut self, transaction: impl Into<String>, handler: BoxedHandler) {
        let transaction = transaction.into();
        if self.handlers.contains_key(&transaction) {
            warn!("overwriting handler for transaction: {transaction}");
        }
        self.handlers.insert(transaction, handler);
    }

    /// Register a synchronous closure as a handler
    pub fn register_fn<F>(&mut self, transaction: impl Into<String>, f: F)
    where
        F: Fn(&Request) -> anyhow::Result<Vec<u8>> + Send + Sync + 'static,
    {
        self.register(transaction, Arc::new(FnHandler(f)));
    }

    /// Look up the handler for a transaction
    pub fn get(&self, transaction: &str) -> Option<&BoxedHandler> {
        self.handlers.get(transaction)
    }

    /// Whether a handler is registered for the transaction
    pub fn has_handler(&self, transaction: &str) -> bool {
        self.handlers.contains_key(transaction)
    }

    /// Names of all registered transactions
    pub fn registered_transactions(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
