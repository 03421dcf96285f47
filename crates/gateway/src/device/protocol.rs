// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire framing shared by the server and client halves of the device
//! protocol (spec §4.5 / §6): newline-terminated UTF-8 lines, with binary
//! payloads introduced by a 4-byte little-endian length prefix.

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Classify, ErrorKind};

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("peer closed the connection")]
    Closed,
    #[error("malformed frame: {0}")]
    Framing(String),
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
    #[error("operation timed out")]
    Timeout,
    #[error("device unknown or has no known address")]
    UnknownDevice,
}

impl Classify for DeviceError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) | Self::Timeout | Self::UnknownDevice => ErrorKind::Transport,
            Self::Closed | Self::Framing(_) | Self::UnexpectedReply(_) => ErrorKind::Framing,
        }
    }
}

/// Read one newline-terminated UTF-8 line, without the trailing `\n`.
pub async fn read_line<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, DeviceError> {
    let mut line = String::new();
    let n = tokio::io::AsyncBufReadExt::read_line(reader, &mut line).await?;
    if n == 0 {
        return Err(DeviceError::Closed);
    }
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    Ok(line)
}

/// Write a line, appending the terminating `\n`.
pub async fn write_line<W: tokio::io::AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<(), DeviceError> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Read a 4-byte little-endian length prefix followed by that many bytes.
pub async fn read_framed<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, DeviceError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write `bytes` prefixed with its 4-byte little-endian length.
pub async fn write_framed<W: tokio::io::AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> Result<(), DeviceError> {
    let len = u32::try_from(bytes.len()).map_err(|_| DeviceError::Framing("payload too large".into()))?;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn line_round_trip() {
        let mut buf = Vec::new();
        write_line(&mut buf, "UUID:abc").await.unwrap();
        let mut reader = BufReader::new(Cursor::new(buf));
        let line = read_line(&mut reader).await.unwrap();
        assert_eq!(line, "UUID:abc");
    }

    #[tokio::test]
    async fn framed_round_trip() {
        let mut buf = Vec::new();
        write_framed(&mut buf, b"hello").await.unwrap();
        let mut reader = Cursor::new(buf);
        let out = read_framed(&mut reader).await.unwrap();
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn read_line_on_empty_stream_is_closed() {
        let mut reader = BufReader::new(Cursor::new(Vec::new()));
        assert!(matches!(read_line(&mut reader).await, Err(DeviceError::Closed)));
    }
}
