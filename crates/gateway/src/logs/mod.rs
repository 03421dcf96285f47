// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Log Puller (C9): on-demand device log retrieval, streamed back to the
//! cloud as one `LogUpload` per file, terminated by a single `LogResponse`.

use std::path::PathBuf;
use std::sync::Arc;

use crate::cloud::CloudHandle;
use crate::device::client::DeviceClient;
use crate::storage::DeviceStore;

pub struct LogPuller {
    devices: Arc<dyn DeviceStore>,
    device_client: DeviceClient,
    cloud: CloudHandle,
    logs_directory: PathBuf,
}

impl LogPuller {
    pub fn new(devices: Arc<dyn DeviceStore>, device_client: DeviceClient, cloud: CloudHandle, logs_directory: PathBuf) -> Self {
        Self { devices, device_client, cloud, logs_directory }
    }

    /// Collect logs for `uuid`, returning the saved file paths.
    pub async fn collect(&self, uuid: &str) -> Vec<PathBuf> {
        let Ok(Some(device)) = self.devices.get(uuid).await else { return Vec::new() };
        let Some(ip) = device.ip else { return Vec::new() };
        match self.device_client.request_logs(&ip, uuid, &self.logs_directory).await {
            Ok(paths) => paths,
            Err(e) => {
                tracing::warn!(uuid, err = %e, "failed to collect device logs");
                Vec::new()
            }
        }
    }

    /// Handle an inbound `LogRequest`: collect every uuid's logs, stream
    /// each file up as a `LogUpload`, then emit one terminating `LogResponse`.
    pub async fn handle_log_request(&self, uuids: Vec<String>) {
        let mut any_failed = false;
        for uuid in &uuids {
            let paths = self.collect(uuid).await;
            if paths.is_empty() {
                any_failed = true;
            }
            for path in paths {
                match tokio::fs::read(&path).await {
                    Ok(bytes) => {
                        let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
                        self.cloud.send_log_upload(uuid.clone(), file_name, bytes);
                    }
                    Err(e) => {
                        tracing::warn!(uuid, path = %path.display(), err = %e, "failed to read collected log file");
                        any_failed = true;
                    }
                }
            }
        }

        let message = if any_failed { "one or more devices failed to supply logs".to_owned() } else { "logs delivered".to_owned() };
        self.cloud.send_log_response(!any_failed, message);
    }
}
