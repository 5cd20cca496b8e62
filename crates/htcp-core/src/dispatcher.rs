//! Request dispatch
//!
//! The dispatcher owns the frozen handler registry and routes each
//! decoded request to its handler. It is shared immutably across every
//! connection, so the counters are atomics rather than fields behind a
//! lock.

use crate::handler::{HandlerRegistry, Request};
use crate::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error};

/// Routes requests to registered handlers and keeps serving statistics
pub struct Dispatcher {
    registry: HandlerRegistry,
    stats: DispatcherStats,
}

/// Dispatch counters, readable while the server runs
#[derive(Debug, Default)]
pub struct DispatcherStats {
    /// Total requests dispatched
    pub processed: AtomicU64,

    /// Requests whose handler returned bytes
    pub succeeded: AtomicU64,

    /// Requests whose handler failed
    pub failed: AtomicU64,

    /// Requests with no registered handler
    pub unhandled: AtomicU64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.processed.load(Ordering::Relaxed),
            self.succeeded.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            self.unhandled.load(Ordering::Relaxed),
        )
    }
}

impl Dispatcher {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry,
            stats: DispatcherStats::default(),
        }
    }

    /// Dispatch one request to its handler
    ///
    /// Failures come back as errors for the connection layer to translate
    /// into error packages; the connection itself stays healthy.
    pub async fn dispatch(&self, request: &Request) -> anyhow::Result<Vec<u8>> {
        self.stats.processed.fetch_add(1, Ordering::Relaxed);

        let transaction = request.package.transaction.as_str();
        let Some(handler) = self.registry.get(transaction) else {
            self.stats.unhandled.fetch_add(1, Ordering::Relaxed);
            error!("no handler for transaction: {transaction}");
            return Err(Error::UnknownTransaction(transaction.to_string()).into());
        };

        debug!("dispatching {} from {}", transaction, request.client);

        match handler.handle(request).await {
            Ok(response) => {
                self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
                Ok(response)
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!("handler for {transaction} failed: {e}");
                Err(e)
            }
        }
    }

    /// Whether a handler is registered for the transaction
    pub fn has_handler(&self, transaction: &str) -> bool {
        self.registry.has_handler(transaction)
    }

    /// Serving statistics
    pub fn stats(&self) -> &DispatcherStats {
        &self.stats
    }
}
