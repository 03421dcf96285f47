// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Liveness Prober (C4): periodically probes every known device and emits a
//! `DeviceStatus` event on any online/offline transition.
//!
//! The source protocol uses an ICMP echo. No portable unprivileged ICMP
//! crate is available in this workspace's dependency stack, so probing is
//! done with a bounded TCP connect attempt against the device's listen port
//! (see [`Pinger`], [`TcpPinger`]) — a documented, swappable stand-in.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::cloud::CloudHandle;
use crate::storage::DeviceStore;

/// Abstraction over the liveness probe mechanism, so the transport can be
/// swapped (e.g. for real ICMP) without touching the scheduling loop.
#[async_trait]
pub trait Pinger: Send + Sync + 'static {
    async fn ping(&self, ip: &str, timeout: Duration) -> bool;
}

/// Default liveness probe: a bounded TCP connect attempt.
pub struct TcpPinger {
    pub port: u16,
}

#[async_trait]
impl Pinger for TcpPinger {
    async fn ping(&self, ip: &str, timeout: Duration) -> bool {
        let addr = format!("{ip}:{}", self.port);
        matches!(tokio::time::timeout(timeout, TcpStream::connect(&addr)).await, Ok(Ok(_)))
    }
}

const PING_TIMEOUT: Duration = Duration::from_secs(1);

/// Spawn the background liveness-probing loop. Runs until `cancel` fires.
pub fn spawn(
    interval: Duration,
    pinger: Arc<dyn Pinger>,
    devices: Arc<dyn DeviceStore>,
    cloud: CloudHandle,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let last_status: RwLock<HashMap<String, bool>> = RwLock::new(HashMap::new());
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }

            let known = match devices.list_all().await {
                Ok(devices) => devices,
                Err(e) => {
                    tracing::warn!(err = %e, "liveness: failed to list devices");
                    continue;
                }
            };

            for device in known {
                let Some(ip) = device.ip.clone() else { continue };
                let online = pinger.ping(&ip, PING_TIMEOUT).await;

                let changed = {
                    let mut guard = last_status.write().await;
                    match guard.insert(device.uuid.clone(), online) {
                        Some(prev) => prev != online,
                        None => true, // first observation always emits
                    }
                };
                if !changed {
                    continue;
                }

                let now = Utc::now();
                let mut updated = device.clone();
                updated.last_seen = now;
                if let Err(e) = devices.upsert(&updated).await {
                    tracing::warn!(err = %e, uuid = %device.uuid, "liveness: failed to persist last_seen");
                }

                cloud.send_device_status(device.uuid.clone(), online, now);
            }
        }
    });
}
