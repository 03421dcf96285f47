// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! License Coordinator (C6): in-flight request dedup, back-off on
//! rejection, and the license gating policy consulted by the Device
//! Session Handler (C5).
//!
//! Grounded on the teacher's credential broker, which tracks one
//! in-flight OAuth flow per account under a shared map; here the map is
//! narrowed to a dedup set since license requests carry no local state
//! beyond "already asked".

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::alert::Alert;
use crate::cloud::CloudHandle;
use crate::device::client::DeviceClient;
use crate::domain::Device;
use crate::error::Classify;
use crate::storage::DeviceStore;

const REJECTION_BACKOFF: chrono::Duration = chrono::Duration::minutes(30);

/// Result of consulting the license gate for an inbound device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Valid,
    Closed,
}

pub struct LicenseCoordinator {
    devices: Arc<dyn DeviceStore>,
    device_client: DeviceClient,
    cloud: CloudHandle,
    in_flight: RwLock<HashSet<String>>,
}

impl LicenseCoordinator {
    pub fn new(devices: Arc<dyn DeviceStore>, device_client: DeviceClient, cloud: CloudHandle) -> Self {
        Self { devices, device_client, cloud, in_flight: RwLock::new(HashSet::new()) }
    }

    /// Surface a storage failure as a critical alert rather than letting it
    /// pass as a log line only (spec §7: storage errors surface via C12).
    fn alert_storage_failure(&self, uuid: &str, err: &crate::storage::StoreError) {
        self.cloud.send_alert(Alert::from_error(
            "license_coordinator",
            err.kind(),
            format!("failed to persist license state for device {uuid}"),
        ));
    }

    /// Consult the gate for an inbound session, emitting a `LicenseRequest`
    /// upward when appropriate (spec §4.5 "License gating policy").
    pub async fn validate(&self, uuid: &str) -> Gate {
        let now = Utc::now();
        let Ok(Some(device)) = self.devices.get(uuid).await else {
            self.request(uuid, false).await;
            return Gate::Closed;
        };

        if device.has_valid_license(now) {
            return Gate::Valid;
        }
        if device.renewal_gated(now) {
            return Gate::Closed;
        }
        self.request(uuid, true).await;
        Gate::Closed
    }

    /// Emit a `LicenseRequest` unless one is already in flight for `uuid`.
    /// The in-flight insert is the atomic test-and-set required by spec §5.
    pub async fn request(&self, uuid: &str, is_renewal: bool) -> bool {
        let inserted = {
            let mut in_flight = self.in_flight.write().await;
            in_flight.insert(uuid.to_owned())
        };
        if !inserted {
            return false;
        }
        self.cloud.send_license_request(uuid.to_owned(), is_renewal);
        true
    }

    /// Apply a `LicenseResponse` from the cloud (spec §4.6).
    pub async fn handle_response(
        &self,
        uuid: &str,
        approved: bool,
        license: Option<String>,
        expiration: Option<DateTime<Utc>>,
    ) {
        self.in_flight.write().await.remove(uuid);

        let now = Utc::now();
        let Ok(existing) = self.devices.get(uuid).await else {
            tracing::warn!(uuid, "license response for device lookup failure");
            return;
        };
        let mut device = existing.unwrap_or_else(|| Device::new(uuid, None, now));

        if approved {
            device.license = license.clone();
            device.license_expiration = expiration;
            device.registration_status = crate::domain::RegistrationStatus::Registered;
            device.next_earliest_renewal = None;
        } else {
            device.next_earliest_renewal = Some(now + REJECTION_BACKOFF);
        }

        if let Err(e) = self.devices.upsert(&device).await {
            tracing::error!(uuid, err = %e, "failed to persist license response");
            self.alert_storage_failure(uuid, &e);
            return;
        }

        if approved {
            if let (Some(ip), Some(xml)) = (device.ip.as_deref(), license.as_deref()) {
                if let Err(e) = self.device_client.send_license(ip, xml).await {
                    tracing::warn!(uuid, err = %e, "failed to push approved license to device");
                }
            }
        }
    }
}
