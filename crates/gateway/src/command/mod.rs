// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command Engine (C8): fan-out for cloud-issued commands. Only `Rollback`
//! is in scope (spec §4.8). Structurally identical to the Update Engine's
//! immediate distribution path, but without a signature gate or retries.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::cloud::CloudHandle;
use crate::device::client::DeviceClient;
use crate::domain::FanOutStatus;
use crate::storage::DeviceStore;

pub struct CommandEngine {
    devices: Arc<dyn DeviceStore>,
    device_client: DeviceClient,
    cloud: CloudHandle,
}

impl CommandEngine {
    pub fn new(devices: Arc<dyn DeviceStore>, device_client: DeviceClient, cloud: CloudHandle) -> Self {
        Self { devices, device_client, cloud }
    }

    /// Fan out a rollback to every target, once each, and emit a single
    /// `CommandResponse` describing overall success.
    pub async fn handle_rollback(&self, command_id: String, params: String, targets: Vec<String>) {
        let status = Mutex::new(FanOutStatus::new(targets.clone()));

        let tasks = targets.into_iter().map(|uuid| {
            let status = &status;
            let params = params.clone();
            async move {
                let ok = self.rollback_one(&uuid, &params).await;
                let mut status = status.lock().await;
                if ok {
                    status.mark_succeeded(&uuid);
                } else {
                    status.mark_failed(&uuid);
                }
            }
        });
        futures_util::future::join_all(tasks).await;

        let status = status.into_inner();
        let success = status.failed.is_empty();
        let details = if success {
            "rollback completed on all targets".to_owned()
        } else {
            let mut succeeded: Vec<_> = status.succeeded.iter().cloned().collect();
            succeeded.sort();
            let mut failed: Vec<_> = status.failed.iter().cloned().collect();
            failed.sort();
            format!("Rollback partial success: succeeded on {}; failed on {}", succeeded.join(", "), failed.join(", "))
        };
        self.cloud.send_command_response(command_id, success, details);
    }

    async fn rollback_one(&self, uuid: &str, params: &str) -> bool {
        let Ok(Some(device)) = self.devices.get(uuid).await else { return false };
        let Some(ip) = device.ip else { return false };
        match self.device_client.send_rollback(&ip, params).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(uuid, err = %e, "rollback failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDeviceStore;
    use std::time::Duration;

    #[tokio::test]
    async fn rollback_with_no_known_targets_reports_all_failed() {
        let devices: Arc<dyn DeviceStore> = Arc::new(MemoryDeviceStore::new());
        let (handle, mut rx) = CloudHandle::channel();
        let engine = CommandEngine::new(devices, DeviceClient::new(1, Duration::from_millis(50)), handle);
        engine.handle_rollback("cmd-1".to_owned(), "{}".to_owned(), vec!["ghost".to_owned()]).await;
        let crate::cloud::Payload::CommandResponse { success, .. } = rx.try_recv().unwrap() else { panic!("expected CommandResponse") };
        assert!(!success);
    }
}
