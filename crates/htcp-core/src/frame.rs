//! HTCP frame codec
//!
//! Every normal HTCP message travels inside a frame:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Length (u32 BE) │ Flags (u8) │ Payload       │
//! │ incl. header    │            │ (JSON bytes)  │
//! ├─────────────────┼────────────┼───────────────┤
//! │ 4 bytes         │ 1 byte     │ length − 5    │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The DH handshake uses a different, flagless framing (`write_raw` /
//! `read_raw`): `u32 BE length || bytes`, where the length excludes the
//! prefix. The two formats share a socket but never a code path.

use crate::{Error, Result};
use bytes::BufMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the frame header in bytes
pub const HEADER_LEN: usize = 5;

/// Maximum accepted frame length including the header (16 MiB)
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Maximum accepted handshake message length (handshake payloads are a
/// few KiB of JSON-encoded group parameters at most)
pub const MAX_HANDSHAKE_LEN: usize = 64 * 1024;

/// Bit 0: payload is AES-CBC encrypted
pub const FLAG_ENCRYPTED: u8 = 0x01;

/// Bit 1: package carries a passkey
pub const FLAG_PASSKEY: u8 = 0x02;

/// Bit 2: this is a response, not a request
pub const FLAG_RESPONSE: u8 = 0x04;

/// Bits 3-7 are reserved and senders keep them zero
pub const FLAG_RESERVED_MASK: u8 = 0xF8;

/// Test a flag mask against a raw header without touching the payload
pub fn peek_flag(header: &[u8; HEADER_LEN], mask: u8) -> bool {
    header[4] & mask != 0
}

/// Whether the flags byte marks an encrypted payload
pub fn is_encrypted(flags: u8) -> bool {
    flags & FLAG_ENCRYPTED != 0
}

/// Whether the flags byte marks a passkey-carrying package
pub fn has_passkey(flags: u8) -> bool {
    flags & FLAG_PASSKEY != 0
}

/// Whether the flags byte marks a response
pub fn is_response(flags: u8) -> bool {
    flags & FLAG_RESPONSE != 0
}

/// Encode a payload into a complete frame
///
/// The length word counts the header itself, so an empty payload encodes
/// as a legal 5-byte frame.
pub fn encode_frame(payload: &[u8], flags: u8) -> Result<Vec<u8>> {
    if payload.len() > MAX_FRAME_LEN - HEADER_LEN {
        return Err(Error::protocol(format!(
            "payload of {} bytes exceeds frame cap of {} bytes",
            payload.len(),
            MAX_FRAME_LEN - HEADER_LEN
        )));
    }

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.put_u32((HEADER_LEN + payload.len()) as u32);
    buf.put_u8(flags);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Read one complete frame from the stream
///
/// Returns the flags byte and the payload. A peer that closes the stream
/// at a frame boundary yields [`Error::Closed`]; EOF anywhere inside a
/// frame is a protocol violation.
pub async fn read_frame<R>(stream: &mut R) -> Result<(u8, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;

    while filled < HEADER_LEN {
        let n = stream.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Err(Error::Closed);
            }
            return Err(Error::protocol(format!(
                "stream ended after {filled} header bytes"
            )));
        }
        filled += n;
    }

    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if length < HEADER_LEN {
        return Err(Error::protocol(format!(
            "frame length {length} is below the {HEADER_LEN}-byte header"
        )));
    }
    if length > MAX_FRAME_LEN {
        return Err(Error::protocol(format!(
            "frame length {length} exceeds cap of {MAX_FRAME_LEN} bytes"
        )));
    }

    let mut payload = vec![0u8; length - HEADER_LEN];
    if !payload.is_empty() {
        stream.read_exact(&mut payload).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::protocol("stream ended inside frame payload")
            } else {
                Error::Io(e)
            }
        })?;
    }

    Ok((header[4], payload))
}

/// Write a complete frame to the stream
pub async fn write_frame<W>(stream: &mut W, payload: &[u8], flags: u8) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(payload, flags)?;
    stream.write_all(&frame).await?;
    stream.flush().await?;
    Ok(())
}

/// Write a raw length-prefixed handshake message (no flags byte)
pub async fn write_raw<W>(stream: &mut W, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if data.len() > MAX_HANDSHAKE_LEN {
        return Err(Error::protocol(format!(
            "handshake message of {} bytes exceeds cap of {MAX_HANDSHAKE_LEN} bytes",
            data.len()
        )));
    }

    let mut buf = Vec::with_capacity(4 + data.len());
    buf.put_u32(data.len() as u32);
    buf.extend_from_slice(data);
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

/// Read a raw length-prefixed handshake message (no flags byte)
pub async fn read_raw<R>(stream: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Closed
        } else {
            Error::Io(e)
        }
    })?;

    let length = u32::from_be_bytes(prefix) as usize;
    if length > MAX_HANDSHAKE_LEN {
        return Err(Error::protocol(format!(
            "handshake message length {length} exceeds cap of {MAX_HANDSHAKE_LEN} bytes"
        )));
    }

    let mut data = vec![0u8; length];
    if !data.is_empty() {
        stream.read_exact(&mut data).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::protocol("stream ended inside handshake message")
            } else {
                Error::Io(e)
            }
        })?;
    }
    Ok(data)
}
