//! Per-connection state machine
//!
//! One task owns the socket and drives the connection through its whole
//! life: optional DH handshake, optional passkey check, then the serving
//! loop. Requests on a connection are handled strictly in arrival order;
//! the processing permit is taken per request, so a slow handler blocks
//! its own connection's reads while other connections keep going.

use crate::server::Shared;
use htcp_core::crypto::{DhExchange, DhInit, DhReply, RecordCipher};
use htcp_core::frame;
use htcp_core::package::AUTH_TRANSACTION;
use htcp_core::{ClientInfo, Error, Package, Request, Result, create_error_package};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Lifecycle states of one accepted connection
enum ConnectionState {
    Handshaking,
    Authenticating,
    Serving,
    Closed,
}

pub(crate) struct Connection {
    stream: TcpStream,
    client: ClientInfo,
    cipher: Option<RecordCipher>,
    shared: Arc<Shared>,
}

impl Connection {
    pub(crate) fn new(stream: TcpStream, client: ClientInfo, shared: Arc<Shared>) -> Self {
        Self {
            stream,
            client,
            cipher: None,
            shared,
        }
    }

    /// Drive the connection until the peer leaves or a fatal error ends it
    pub(crate) async fn run(&mut self) -> Result<()> {
        let mut state = ConnectionState::Handshaking;

        loop {
            state = match state {
                ConnectionState::Handshaking => {
                    if self.shared.config.dh_encryption {
                        let cipher = self.handshake().await?;
                        self.cipher = Some(cipher);
                        debug!("DH handshake completed for {}", self.client);
                    }
                    ConnectionState::Authenticating
                }
                ConnectionState::Authenticating => {
                    // Any auth failure closes silently: no error reply,
                    // and no ack on success either.
                    match self.shared.config.connect_passkey.clone() {
                        Some(expected) => {
                            if self.authenticate(&expected).await {
                                ConnectionState::Serving
                            } else {
                                ConnectionState::Closed
                            }
                        }
                        None => ConnectionState::Serving,
                    }
                }
                ConnectionState::Serving => {
                    self.serve().await?;
                    ConnectionState::Closed
                }
                ConnectionState::Closed => break,
            };
        }

        Ok(())
    }

    /// Close the writer, best effort
    pub(crate) async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }

    /// Server side of the DH exchange, over the raw handshake framing
    async fn handshake(&mut self) -> Result<RecordCipher> {
        let mut dh = DhExchange::new();
        dh.generate_parameters();

        let init = DhInit::from_exchange(&dh)?;
        frame::write_raw(&mut self.stream, &init.to_bytes()?).await?;

        let reply_bytes = frame::read_raw(&mut self.stream).await?;
        let reply = DhReply::from_bytes(&reply_bytes)?;

        dh.derive(&reply.public)
    }

    /// Validate the first post-handshake package against the configured
    /// passkey. Returns false on any mismatch; the caller closes.
    async fn authenticate(&mut self, expected: &str) -> bool {
        let package = match self.read_package().await {
            Ok(Some(package)) => package,
            Ok(None) => {
                debug!("no auth package from {}", self.client);
                return false;
            }
            Err(e) => {
                warn!("auth read failed for {}: {e}", self.client);
                return false;
            }
        };

        if package.transaction != AUTH_TRANSACTION {
            warn!(
                "expected {AUTH_TRANSACTION} transaction from {}, got {}",
                self.client, package.transaction
            );
            return false;
        }

        match package.passkey.as_deref() {
            Some(supplied) if constant_time_eq(supplied.as_bytes(), expected.as_bytes()) => {
                debug!("passkey validated for {}", self.client);
                true
            }
            _ => {
                warn!("invalid passkey from {}", self.client);
                false
            }
        }
    }

    /// The request loop: read, dispatch under a processing permit, reply
    async fn serve(&mut self) -> Result<()> {
        loop {
            let Some(package) = self.read_package().await? else {
                return Ok(());
            };

            let shared = self.shared.clone();
            let _permit = shared
                .processing_semaphore
                .acquire()
                .await
                .map_err(|_| Error::Closed)?;

            self.process(package).await?;
        }
    }

    /// Dispatch one request and send its response or error package
    async fn process(&mut self, package: Package) -> Result<()> {
        let from_addr = self.shared.config.advertised_addr();
        let transaction = package.transaction.clone();
        let uuid = package.uuid.clone();

        let request = Request {
            package,
            client: self.client.clone(),
        };

        let response = match self.shared.dispatcher.dispatch(&request).await {
            Ok(content) => Package::new(&transaction, content)
                .with_uuid(&uuid)
                .with_from_addr(from_addr),
            // Handler failures go back to the client on the same uuid;
            // the connection keeps serving.
            Err(e) => create_error_package(&transaction, &e.to_string(), Some(&uuid))
                .with_from_addr(from_addr),
        };

        self.send_package(&response, true).await?;
        debug!("processed {transaction} from {}", self.client);
        Ok(())
    }

    /// Read one package, decrypting the payload when the frame says so
    ///
    /// Returns `None` when the peer closed the stream at a frame
    /// boundary.
    async fn read_package(&mut self) -> Result<Option<Package>> {
        let (flags, mut payload) = match frame::read_frame(&mut self.stream).await {
            Ok(frame) => frame,
            Err(Error::Closed) => return Ok(None),
            Err(e) => return Err(e),
        };

        if frame::is_encrypted(flags) {
            if let Some(cipher) = &self.cipher {
                // Downstream sees the plaintext payload; the header
                // length is recomputed when the response is framed.
                payload = cipher.decrypt(&payload)?;
            }
        }

        Ok(Some(Package::from_payload(&payload)?))
    }

    /// Frame and send a package, encrypting iff a session key exists
    async fn send_package(&mut self, package: &Package, response: bool) -> Result<()> {
        let flags = package.flags(self.cipher.is_some(), response);

        let mut payload = package.to_payload()?;
        if let Some(cipher) = &self.cipher {
            payload = cipher.encrypt(&payload)?;
        }

        frame::write_frame(&mut self.stream, &payload, flags).await
    }
}

/// Compare two byte strings without early exit
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
