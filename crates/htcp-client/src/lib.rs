//! HTCP Client Library
//!
//! Opens a connection to an HTCP server, completes the optional DH
//! handshake and passkey exchange, and issues request/response exchanges
//! correlated by package uuid.

use htcp_core::crypto::{DhExchange, DhInit, DhReply, RecordCipher};
use htcp_core::frame;
use htcp_core::package::AUTH_TRANSACTION;
use htcp_core::Package;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

/// Client-side failures
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Wire(#[from] htcp_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A response arrived with a uuid that does not match the request
    #[error("response uuid {got} does not match request uuid {expected}")]
    Correlation { expected: String, got: String },
}

/// Connection settings, mirroring the server's negotiation options
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub dh_encryption: bool,
    pub passkey: Option<String>,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            dh_encryption: false,
            passkey: None,
        }
    }

    /// Negotiate a session key before the first frame
    pub fn with_dh_encryption(mut self, enabled: bool) -> Self {
        self.dh_encryption = enabled;
        self
    }

    /// Authenticate with the server's connect passkey
    pub fn with_passkey(mut self, passkey: impl Into<String>) -> Self {
        self.passkey = Some(passkey.into());
        self
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// An established HTCP connection
pub struct Client {
    stream: TcpStream,
    cipher: Option<RecordCipher>,
}

impl Client {
    /// Dial the server and complete the configured negotiation
    ///
    /// A wrong passkey is not reported here: the server closes silently,
    /// which surfaces on the next receive.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(config.addr()).await?;
        let mut client = Self {
            stream,
            cipher: None,
        };

        if config.dh_encryption {
            client.handshake().await?;
            debug!("DH handshake completed with {}", config.addr());
        }

        if let Some(passkey) = &config.passkey {
            client.send_auth(passkey).await?;
        }

        Ok(client)
    }

    /// Send a request and wait for its response
    pub async fn ask(&mut self, package: &Package) -> Result<Package, ClientError> {
        self.send(package).await?;
        let response = self.receive().await?;

        if response.uuid != package.uuid {
            return Err(ClientError::Correlation {
                expected: package.uuid.clone(),
                got: response.uuid,
            });
        }

        Ok(response)
    }

    /// Send a package without waiting for a response
    pub async fn send(&mut self, package: &Package) -> Result<(), ClientError> {
        let flags = package.flags(self.cipher.is_some(), false);

        let mut payload = package.to_payload()?;
        if let Some(cipher) = &self.cipher {
            payload = cipher.encrypt(&payload)?;
        }

        frame::write_frame(&mut self.stream, &payload, flags).await?;
        Ok(())
    }

    /// Receive one package from the server
    pub async fn receive(&mut self) -> Result<Package, ClientError> {
        let (flags, mut payload) = frame::read_frame(&mut self.stream).await?;

        if frame::is_encrypted(flags) {
            if let Some(cipher) = &self.cipher {
                payload = cipher.decrypt(&payload)?;
            }
        }

        Ok(Package::from_payload(&payload)?)
    }

    /// Shut the connection down
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Client side of the DH exchange: the server owns the parameters
    async fn handshake(&mut self) -> Result<(), ClientError> {
        let init_bytes = frame::read_raw(&mut self.stream).await?;
        let init = DhInit::from_bytes(&init_bytes)?;

        let mut dh = DhExchange::new();
        dh.load_parameters(init.p, init.g)?;
        let cipher = dh.derive(&init.public)?;

        let reply = DhReply::from_exchange(&dh)?;
        frame::write_raw(&mut self.stream, &reply.to_bytes()?).await?;

        self.cipher = Some(cipher);
        Ok(())
    }

    /// Send the `_auth` package; the passkey travels in the top-level
    /// field so `FLAG_PASSKEY` is set on the frame. No ack follows.
    async fn send_auth(&mut self, passkey: &str) -> Result<(), ClientError> {
        let package = Package::new(AUTH_TRANSACTION, vec![]).with_passkey(passkey);
        self.send(&package).await
    }
}
