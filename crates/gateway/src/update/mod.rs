// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Update Engine (C7): signature-gated fan-out distribution of update
//! packages, with per-device retry and a scheduled-execution ticker.
//!
//! The retry-with-backoff loop is grounded on the teacher's
//! `credential::refresh::refresh_with_retries`, generalized from a single
//! HTTP refresh call to a per-device `send_update` call.

pub mod signature;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cloud::CloudHandle;
use crate::device::client::DeviceClient;
use crate::domain::{FanOutStatus, ScheduledUpdate};
use crate::storage::{DeviceStore, VersionStore};

pub struct UpdateEngine {
    devices: Arc<dyn DeviceStore>,
    versions: Arc<dyn VersionStore>,
    device_client: DeviceClient,
    cloud: CloudHandle,
    trusted_key: VerifyingKey,
    max_retries: u32,
    schedule: Mutex<HashMap<String, ScheduledUpdate>>,
}

impl UpdateEngine {
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        versions: Arc<dyn VersionStore>,
        device_client: DeviceClient,
        cloud: CloudHandle,
        trusted_key: VerifyingKey,
        max_retries: u32,
    ) -> Arc<Self> {
        Arc::new(Self { devices, versions, device_client, cloud, trusted_key, max_retries, schedule: Mutex::new(HashMap::new()) })
    }

    /// Immediate distribution path (spec §4.7). Verifies the detached
    /// signature, fans out to every target in parallel with per-device
    /// retry, then emits a single `UpdateAck`.
    pub async fn handle_update_package(
        &self,
        file_name: String,
        bytes: Bytes,
        signature_bytes: Vec<u8>,
        targets: Vec<String>,
    ) {
        if let Err(e) = signature::verify(&self.trusted_key, &bytes, &signature_bytes) {
            tracing::warn!(file_name, err = %e, "update package failed signature verification");
            self.cloud.send_update_ack(Uuid::new_v4().to_string(), false, "signature_rejected".to_owned(), Vec::new(), targets);
            return;
        }

        let update_id = Uuid::new_v4().to_string();
        let status = self.distribute(&file_name, &bytes, targets).await;
        let details = format_details(&status);
        self.cloud.send_update_ack(
            update_id,
            status.failed.is_empty(),
            details,
            status.succeeded.into_iter().collect(),
            status.failed.into_iter().collect(),
        );
    }

    /// Scheduled path (spec §4.7): signature-verify then store for the
    /// ticker to pick up. Persistence across restarts is not required.
    pub async fn handle_scheduled_update(
        &self,
        schedule_id: String,
        targets: Vec<String>,
        file_name: String,
        bytes: Bytes,
        signature_bytes: Vec<u8>,
        start_time_utc: DateTime<Utc>,
    ) {
        if let Err(e) = signature::verify(&self.trusted_key, &bytes, &signature_bytes) {
            tracing::warn!(schedule_id, err = %e, "scheduled update failed signature verification");
            self.cloud.send_update_ack(schedule_id, false, "signature_rejected".to_owned(), Vec::new(), targets);
            return;
        }

        let entry = ScheduledUpdate {
            schedule_id: schedule_id.clone(),
            target_uuids: targets.into_iter().collect(),
            file_name,
            package_bytes: bytes,
            start_time_utc,
        };
        self.schedule.lock().await.insert(schedule_id.clone(), entry);
        self.cloud.send_command_response(schedule_id, true, format!("scheduled for {}", start_time_utc.to_rfc3339()));
    }

    /// Fan out to every target in parallel, retrying each failed device up
    /// to `max_retries` times with `2^attempt` second backoff.
    async fn distribute(&self, file_name: &str, bytes: &[u8], targets: Vec<String>) -> FanOutStatus {
        let status = Mutex::new(FanOutStatus::new(targets.clone()));

        let tasks = targets.into_iter().map(|uuid| {
            let status = &status;
            async move {
                let ok = self.send_with_retries(&uuid, file_name, bytes).await;
                let mut status = status.lock().await;
                if ok {
                    status.mark_succeeded(&uuid);
                } else {
                    status.mark_failed(&uuid);
                }
            }
        });
        futures_util::future::join_all(tasks).await;

        status.into_inner()
    }

    async fn send_with_retries(&self, uuid: &str, file_name: &str, bytes: &[u8]) -> bool {
        let Ok(Some(device)) = self.devices.get(uuid).await else { return false };
        let Some(ip) = device.ip else { return false };

        for attempt in 0..=self.max_retries {
            match self.device_client.send_update(&ip, file_name, bytes).await {
                Ok(()) => {
                    if let Err(e) = self.versions.insert_if_absent(uuid, file_name, Utc::now()).await {
                        tracing::warn!(uuid, err = %e, "failed to record installed version");
                    }
                    return true;
                }
                Err(e) => {
                    if attempt == self.max_retries {
                        tracing::warn!(uuid, err = %e, "update delivery exhausted retries");
                        return false;
                    }
                    tracing::debug!(uuid, attempt, err = %e, "update delivery attempt failed, retrying");
                    tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                }
            }
        }
        false
    }

    /// Spawn the 10-second scheduled-update ticker (spec §4.7).
    pub fn spawn_ticker(self: Arc<Self>, tick: Duration, cancel: CancellationToken) {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(tick);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => {}
                }

                let due: Vec<ScheduledUpdate> = {
                    let mut schedule = self.schedule.lock().await;
                    let now = Utc::now();
                    let due_ids: Vec<String> = schedule
                        .values()
                        .filter(|u| u.start_time_utc <= now)
                        .map(|u| u.schedule_id.clone())
                        .collect();
                    due_ids.into_iter().filter_map(|id| schedule.remove(&id)).collect()
                };

                for update in due {
                    let status = self
                        .distribute(&update.file_name, &update.package_bytes, update.target_uuids.into_iter().collect())
                        .await;
                    let details = format_details(&status);
                    self.cloud.send_update_ack(
                        update.schedule_id,
                        status.failed.is_empty(),
                        details,
                        status.succeeded.into_iter().collect(),
                        status.failed.into_iter().collect(),
                    );
                }
            }
        });
    }
}

/// Render a fan-out outcome as "Succeeded on: a, b; Failed on: c" (spec §8
/// scenario 4's canonical wording), with both sides sorted for determinism.
fn format_details(status: &FanOutStatus) -> String {
    let mut succeeded: Vec<_> = status.succeeded.iter().cloned().collect();
    succeeded.sort();
    let mut failed: Vec<_> = status.failed.iter().cloned().collect();
    failed.sort();
    format!("Succeeded on: {}; Failed on: {}", succeeded.join(", "), failed.join(", "))
}

/// Directory update packages land under while distribution is in progress
/// (spec §6 `update_package_directory`). Kept for callers that want to
/// stage bytes to disk before calling into the engine; the engine itself
/// only ever holds packages as in-memory `Bytes`.
pub fn package_path(directory: &std::path::Path, file_name: &str) -> PathBuf {
    directory.join(file_name)
}
