// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cloud Control Channel Worker (C10). Grounded on the teacher's `WsBridge`
//! / `run_loop`, generalized from "one upstream shared by N downstream
//! clients" to "one cloud stream, one gateway". The write-half stays
//! single-owner: every other component sends through [`CloudHandle`]
//! rather than touching the socket directly.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::cloud::messages::{Cluster, CommandType, ControlMessage, MonitoringMetrics, Payload, PlotPoint, VersionEntry, VersionPoint};
use crate::command::CommandEngine;
use crate::device::client::DeviceClient;
use crate::license::LicenseCoordinator;
use crate::logs::LogPuller;
use crate::storage::DeviceStore;
use crate::update::UpdateEngine;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Cheap-clone handle used by every other component to send upward,
/// without holding a reference back into [`CloudWorker`] (spec §9).
#[derive(Clone)]
pub struct CloudHandle {
    tx: mpsc::UnboundedSender<Payload>,
}

impl CloudHandle {
    /// Construct a detached handle/receiver pair. Production wiring passes
    /// the receiver into [`CloudWorker::spawn`]; tests can drain it directly.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Payload>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, payload: Payload) {
        let _ = self.tx.send(payload);
    }

    pub fn send_monitoring(&self, uuid: String, metrics: MonitoringMetrics) {
        self.send(Payload::MonitoringData { uuid, metrics });
    }

    pub fn send_license_request(&self, uuid: String, is_renewal: bool) {
        self.send(Payload::LicenseRequest { uuid, is_renewal });
    }

    pub fn send_alert(&self, alert: crate::alert::Alert) {
        self.send(Payload::AlertMessage {
            timestamp: alert.timestamp,
            level: format!("{:?}", alert.level).to_lowercase(),
            message: alert.message,
            exception: alert.exception,
            source: alert.source,
        });
    }

    pub fn send_recommendations(&self, clusters: Vec<Cluster>, plot_data: Vec<PlotPoint>) {
        self.send(Payload::AIRecommendations { clusters, plot_data });
    }

    pub fn send_device_status(&self, uuid: String, is_online: bool, last_seen: DateTime<Utc>) {
        self.send(Payload::DeviceStatus { uuid, is_online, last_seen });
    }

    pub fn send_command_response(&self, command_id: String, success: bool, details: String) {
        self.send(Payload::CommandResponse { command_id, success, details });
    }

    pub fn send_update_ack(&self, update_id: String, success: bool, details: String, succeeded: Vec<String>, failed: Vec<String>) {
        self.send(Payload::UpdateAck { update_id, success, details, succeeded, failed });
    }

    pub fn send_log_upload(&self, uuid: String, file_name: String, bytes: Vec<u8>) {
        self.send(Payload::LogUpload { uuid, file_name, bytes });
    }

    pub fn send_log_response(&self, success: bool, message: String) {
        self.send(Payload::LogResponse { success, message });
    }

    pub fn send_version_data_response(&self, success: bool, entries: Vec<VersionEntry>) {
        self.send(Payload::VersionDataResponse { success, entries });
    }
}

/// Collaborators the worker dispatches inbound variants to. Each is an
/// independently-owned `Arc`; none of them holds a reference back to the
/// worker, only a [`CloudHandle`].
pub struct CloudWorker {
    gateway_id: String,
    cloud_address: String,
    devices: Arc<dyn DeviceStore>,
    device_client: DeviceClient,
    license: Arc<LicenseCoordinator>,
    command: Arc<CommandEngine>,
    update: Arc<UpdateEngine>,
    logs: Arc<LogPuller>,
    /// Clone of the handle wired into every other component, used
    /// internally to answer requests (e.g. version queries) that are
    /// satisfied within `dispatch` itself rather than by a collaborator.
    self_handle: CloudHandle,
}

impl CloudWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway_id: String,
        cloud_address: String,
        devices: Arc<dyn DeviceStore>,
        device_client: DeviceClient,
        license: Arc<LicenseCoordinator>,
        command: Arc<CommandEngine>,
        update: Arc<UpdateEngine>,
        logs: Arc<LogPuller>,
        self_handle: CloudHandle,
    ) -> Self {
        Self { gateway_id, cloud_address, devices, device_client, license, command, update, logs, self_handle }
    }

    /// Run the reconnect loop until `cancel` fires. The reconnect delay is
    /// a flat 5 seconds, not exponential backoff: spec §4.10 explicitly
    /// allows but does not require backoff here, and the flat delay keeps
    /// this loop visibly distinct from the Update Engine's backing-off retry.
    pub async fn run(self, mut outbound: mpsc::UnboundedReceiver<Payload>, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            match tokio_tungstenite::connect_async(&self.cloud_address).await {
                Ok((stream, _)) => {
                    tracing::info!(gateway_id = %self.gateway_id, "cloud control channel connected");
                    let (mut write, mut read) = stream.split();

                    // The initial message carries only sender_id, no payload (spec §4.10).
                    if write
                        .send(Message::Text(serde_json::json!({ "sender_id": self.gateway_id }).to_string().into()))
                        .await
                        .is_err()
                    {
                        self.wait_before_reconnect(&cancel).await;
                        continue;
                    }

                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => self.dispatch(text.to_string()).await,
                                    Some(Ok(Message::Close(_))) | None => {
                                        tracing::debug!("cloud control channel closed");
                                        break;
                                    }
                                    Some(Err(e)) => {
                                        tracing::debug!(err = %e, "cloud control channel error");
                                        break;
                                    }
                                    _ => {}
                                }
                            }
                            outgoing = outbound.recv() => {
                                match outgoing {
                                    Some(payload) => {
                                        let msg = ControlMessage::new(self.gateway_id.clone(), payload);
                                        if let Ok(text) = serde_json::to_string(&msg) {
                                            if write.send(Message::Text(text.into())).await.is_err() {
                                                break;
                                            }
                                        }
                                    }
                                    None => return,
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(err = %e, "cloud control channel connect failed, retrying");
                }
            }

            self.wait_before_reconnect(&cancel).await;
        }
    }

    async fn wait_before_reconnect(&self, cancel: &CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }

    async fn dispatch(&self, text: String) {
        let message: ControlMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(err = %e, "dropping malformed control message");
                return;
            }
        };

        match message.payload {
            Payload::LicenseResponse { uuid, approved, license, expiration } => {
                self.license.handle_response(&uuid, approved, license, expiration).await;
            }
            Payload::CommandRequest { command_id, command_type: CommandType::Rollback, params, targets } => {
                self.command.handle_rollback(command_id, params, targets).await;
            }
            Payload::LogRequest { uuids } => {
                self.logs.handle_log_request(uuids).await;
            }
            Payload::UpdatePackage { file_name, bytes, signature, targets } => {
                self.update.handle_update_package(file_name, bytes::Bytes::from(bytes), signature, targets).await;
            }
            Payload::ScheduledUpdate { schedule_id, targets, file_name, bytes, signature, start_time_utc } => {
                self.update
                    .handle_scheduled_update(schedule_id, targets, file_name, bytes::Bytes::from(bytes), signature, start_time_utc)
                    .await;
            }
            Payload::VersionDataRequest => {
                self.handle_version_data_request().await;
            }
            other => {
                tracing::debug!(?other, "dropping control message with no inbound handler");
            }
        }
    }

    async fn handle_version_data_request(&self) {
        let known = match self.devices.list_all().await {
            Ok(devices) => devices,
            Err(e) => {
                tracing::warn!(err = %e, "version data request: failed to list devices");
                return;
            }
        };

        let mut entries = Vec::new();
        let mut any_failed = false;
        for device in known {
            let Some(ip) = device.ip else { continue };
            match self.device_client.request_versions(&ip).await {
                Ok(doc) => entries.push(VersionEntry {
                    uuid: device.uuid,
                    current: VersionPoint { version: doc.current.version, installed_at: doc.current.installed_at },
                    available: doc
                        .available
                        .into_iter()
                        .map(|v| VersionPoint { version: v.version, installed_at: v.installed_at })
                        .collect(),
                }),
                Err(e) => {
                    tracing::debug!(uuid = %device.uuid, err = %e, "version query failed");
                    any_failed = true;
                }
            }
        }

        self.self_handle.send_version_data_response(!any_failed, entries);
    }
}
