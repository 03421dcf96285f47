// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound half of the Device Session Handler (C5): dials a device and
//! drives one request/response exchange per call, opening a fresh
//! connection each time (spec §4.5).

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::io::BufReader;
use tokio::net::TcpStream;

use crate::device::protocol::{read_framed, read_line, write_framed, write_line, DeviceError};

#[derive(Debug, Clone, Deserialize)]
pub struct VersionPoint {
    pub version: String,
    pub installed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VersionsDoc {
    pub current: VersionPoint,
    pub available: Vec<VersionPoint>,
}

/// A fetched log file, ready to be uploaded to the cloud.
#[derive(Debug, Clone)]
pub struct FetchedLog {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Narrow, one-directional handle for dialing devices. Holds no reference
/// to any other component, which is what lets it be shared freely among
/// the License Coordinator, Update Engine, Command Engine, and Log Puller
/// without creating a reference cycle back to the Cloud Control Channel
/// Worker (spec §9).
#[derive(Debug, Clone)]
pub struct DeviceClient {
    pub connect_port: u16,
    pub read_timeout: Duration,
}

impl DeviceClient {
    pub fn new(connect_port: u16, read_timeout: Duration) -> Self {
        Self { connect_port, read_timeout }
    }

    async fn dial(&self, ip: &str) -> Result<TcpStream, DeviceError> {
        let addr = format!("{ip}:{}", self.connect_port);
        Ok(tokio::time::timeout(self.read_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| DeviceError::Timeout)??)
    }

    pub async fn send_license(&self, ip: &str, license_xml: &str) -> Result<(), DeviceError> {
        let mut stream = self.dial(ip).await?;
        write_line(&mut stream, &format!("LICENSE:{license_xml}")).await
    }

    pub async fn send_update(&self, ip: &str, file_name: &str, bytes: &[u8]) -> Result<(), DeviceError> {
        let mut stream = self.dial(ip).await?;
        write_line(&mut stream, &format!("SEND_PACKAGE:{file_name}")).await?;
        let mut reader = BufReader::new(&mut stream);
        let reply = tokio::time::timeout(self.read_timeout, read_line(&mut reader))
            .await
            .map_err(|_| DeviceError::Timeout)??;
        if reply != "READY_FOR_PACKAGE" {
            return Err(DeviceError::UnexpectedReply(reply));
        }
        write_framed(&mut stream, bytes).await
    }

    pub async fn send_rollback(&self, ip: &str, params: &str) -> Result<(), DeviceError> {
        let mut stream = self.dial(ip).await?;
        write_line(&mut stream, &format!("ROLLBACK:{params}")).await?;
        let mut reader = BufReader::new(&mut stream);
        let initiated = tokio::time::timeout(self.read_timeout, read_line(&mut reader))
            .await
            .map_err(|_| DeviceError::Timeout)??;
        if initiated != "ROLLBACK_INITIATED" {
            return Err(DeviceError::UnexpectedReply(initiated));
        }
        let outcome = tokio::time::timeout(self.read_timeout, read_line(&mut reader))
            .await
            .map_err(|_| DeviceError::Timeout)??;
        if outcome == "ROLLBACK_COMPLETED" {
            Ok(())
        } else {
            Err(DeviceError::UnexpectedReply(outcome))
        }
    }

    pub async fn request_versions(&self, ip: &str) -> Result<VersionsDoc, DeviceError> {
        let mut stream = self.dial(ip).await?;
        write_line(&mut stream, "GET_VERSIONS").await?;
        let mut reader = BufReader::new(&mut stream);
        let line = tokio::time::timeout(self.read_timeout, read_line(&mut reader))
            .await
            .map_err(|_| DeviceError::Timeout)??;
        serde_json::from_str(&line).map_err(|e| DeviceError::Framing(e.to_string()))
    }

    /// Fetch all pending log files and persist them under
    /// `<logs_dir>/DeviceLogs/<uuid>_<yyyymmddHHMMSS>_<name>`, returning the
    /// written paths.
    pub async fn request_logs(&self, ip: &str, uuid: &str, logs_dir: &Path) -> Result<Vec<PathBuf>, DeviceError> {
        let mut stream = self.dial(ip).await?;
        write_line(&mut stream, "REQUEST_LOGS").await?;

        let mut count_buf = [0u8; 4];
        tokio::time::timeout(self.read_timeout, tokio::io::AsyncReadExt::read_exact(&mut stream, &mut count_buf))
            .await
            .map_err(|_| DeviceError::Timeout)??;
        let count = u32::from_le_bytes(count_buf);

        let dest_dir = logs_dir.join("DeviceLogs");
        tokio::fs::create_dir_all(&dest_dir).await?;
        let stamp = Utc::now().format("%Y%m%d%H%M%S");

        let mut paths = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name_bytes = read_framed(&mut stream).await?;
            let name = String::from_utf8(name_bytes).map_err(|e| DeviceError::Framing(e.to_string()))?;
            let data = read_framed(&mut stream).await?;
            let path = dest_dir.join(format!("{uuid}_{stamp}_{name}"));
            tokio::fs::write(&path, &data).await?;
            paths.push(path);
        }
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dial_unreachable_host_times_out_or_errors() {
        let client = DeviceClient::new(1, Duration::from_millis(200));
        let result = client.send_license("127.0.0.1", "<xml/>").await;
        assert!(result.is_err());
    }
}
