// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound half of the Device Session Handler (C5): a plain TCP listener,
//! one task per accepted connection, driving the per-connection state
//! machine from spec §4.5.
//!
//! The source transport used mTLS; here the listener is a bare
//! `TcpListener` with transport security left as a pluggable wrapper
//! (spec §9) rather than hard-coded in.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::alert::{Alert, AlertBus, AlertLevel};
use crate::cloud::{messages::MonitoringMetrics, CloudHandle};
use crate::device::protocol::{read_line, write_line, DeviceError};
use crate::domain::{Device, UsageSample};
use crate::license::{Gate, LicenseCoordinator};
use crate::storage::DeviceStore;
use crate::usage::UsageAggregator;

pub struct SessionDeps {
    pub devices: Arc<dyn DeviceStore>,
    pub usage: Arc<UsageAggregator>,
    pub license: Arc<LicenseCoordinator>,
    pub alerts: Arc<AlertBus>,
    pub cloud: CloudHandle,
    pub idle_timeout: Duration,
}

/// Bind the device-facing listener and accept connections until `cancel`
/// fires, spawning one task per connection.
pub async fn serve(addr: &str, deps: Arc<SessionDeps>, cancel: CancellationToken) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr, "device listener bound");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let deps = Arc::clone(&deps);
                        let session_cancel = cancel.child_token();
                        tokio::spawn(async move {
                            if let Err(e) = run_session(stream, peer.ip().to_string(), deps, session_cancel).await {
                                tracing::debug!(peer = %peer, err = %e, "device session ended");
                            }
                        });
                    }
                    Err(e) => tracing::warn!(err = %e, "accept failed"),
                }
            }
        }
    }
    Ok(())
}

async fn run_session(
    mut stream: TcpStream,
    peer_ip: String,
    deps: Arc<SessionDeps>,
    cancel: CancellationToken,
) -> Result<(), DeviceError> {
    write_line(&mut stream, "REQUEST_UUID").await?;

    let (read_half, mut write_half) = stream.split();
    let mut reader = BufReader::new(read_half);

    let line = read_line(&mut reader).await?;
    let uuid = line.strip_prefix("UUID:").ok_or_else(|| DeviceError::Framing(line.clone()))?.to_owned();

    // Consult the gate before `ensure_registered` upserts a placeholder row,
    // so a brand-new device is still "unknown" to `validate` (spec §4.5: an
    // unseen device must request with `is_renewal=false`).
    let gate = deps.license.validate(&uuid).await;
    ensure_registered(&deps.devices, &uuid, &peer_ip).await;

    if gate == Gate::Closed {
        write_line(&mut write_half, "LICENSE_INVALID").await?;
        return Ok(());
    }

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            line = tokio::time::timeout(deps.idle_timeout, read_line(&mut reader)) => {
                match line {
                    Ok(Ok(line)) => line,
                    Ok(Err(DeviceError::Closed)) => return Ok(()),
                    Ok(Err(e)) => return Err(e),
                    Err(_) => {
                        tracing::debug!(uuid, "device session idle timeout");
                        return Ok(());
                    }
                }
            }
        };

        if let Some(json) = line.strip_prefix("MONITORING_DATA:") {
            handle_monitoring(&deps, &uuid, json).await;
            write_line(&mut write_half, "DATA_RECEIVED").await?;
        } else if let Some(text) = line.strip_prefix("NOTIFICATION:") {
            deps.alerts
                .publish(Alert::new(&format!("Device-{uuid}"), AlertLevel::Information, text.to_owned()))
                .await;
        } else {
            tracing::debug!(uuid, line, "unrecognized device message, ignoring");
        }
    }
}

async fn ensure_registered(devices: &Arc<dyn DeviceStore>, uuid: &str, peer_ip: &str) {
    let now = Utc::now();
    match devices.get(uuid).await {
        Ok(Some(mut existing)) => {
            existing.ip = Some(peer_ip.to_owned());
            existing.last_seen = now;
            if let Err(e) = devices.upsert(&existing).await {
                tracing::warn!(uuid, err = %e, "failed to refresh device on handshake");
            }
        }
        Ok(None) => {
            let device = Device::new(uuid, Some(peer_ip.to_owned()), now);
            if let Err(e) = devices.upsert(&device).await {
                tracing::warn!(uuid, err = %e, "failed to register new device on first handshake");
            }
        }
        Err(e) => tracing::warn!(uuid, err = %e, "device lookup failed during handshake"),
    }
}

async fn handle_monitoring(deps: &Arc<SessionDeps>, uuid: &str, json: &str) {
    let now = Utc::now();
    if let Ok(Some(mut device)) = deps.devices.get(uuid).await {
        device.last_seen = now;
        if let Err(e) = deps.devices.upsert(&device).await {
            tracing::warn!(uuid, err = %e, "failed to update last_seen from monitoring data");
        }
    }

    match serde_json::from_str::<MonitoringMetrics>(json) {
        Ok(metrics) => {
            let sample = UsageSample {
                timestamp: now,
                cpu_pct: metrics.metrics.cpu_metrics.current_usage,
                mem_pct: percentage(metrics.metrics.memory_metrics.used_memory, metrics.metrics.memory_metrics.total_memory),
                net_sent_bytes: metrics.metrics.network_metrics.transmitted_bytes,
                net_recv_bytes: metrics.metrics.network_metrics.received_bytes,
            };
            deps.usage.record(uuid, sample).await;
            deps.cloud.send_monitoring(uuid.to_owned(), metrics);
        }
        Err(e) => tracing::warn!(uuid, err = %e, "malformed monitoring payload"),
    }
}

fn percentage(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (used as f64 / total as f64) * 100.0
    }
}

/// Staging directory for update packages before distribution (spec §6).
pub fn update_staging_dir(base: &std::path::Path) -> PathBuf {
    base.join("staging")
}
