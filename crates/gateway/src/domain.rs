// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Core data model: devices, version history, usage samples, scheduled
//! updates, and the in-flight bookkeeping shared across components.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A field device addressed by a stable UUID.
///
/// Invariant: `license.is_some() implies license_expiration.is_some()`.
/// Invariant: `next_earliest_renewal` is only in the future when the most
/// recent renewal attempt was rejected by the cloud.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub uuid: String,
    pub ip: Option<String>,
    pub license: Option<String>,
    pub license_expiration: Option<DateTime<Utc>>,
    pub next_earliest_renewal: Option<DateTime<Utc>>,
    pub registration_status: RegistrationStatus,
    pub last_seen: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

impl Device {
    /// A brand-new device record, as created on first successful handshake.
    pub fn new(uuid: impl Into<String>, ip: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            uuid: uuid.into(),
            ip,
            license: None,
            license_expiration: None,
            next_earliest_renewal: None,
            registration_status: RegistrationStatus::Pending,
            last_seen: now,
            registered_at: now,
        }
    }

    /// Whether the device currently holds a license valid at `now`.
    pub fn has_valid_license(&self, now: DateTime<Utc>) -> bool {
        matches!(self.license_expiration, Some(exp) if exp > now)
    }

    /// Whether a new renewal attempt is currently gated by back-off.
    pub fn renewal_gated(&self, now: DateTime<Utc>) -> bool {
        matches!(self.next_earliest_renewal, Some(t) if t > now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Pending,
    Registered,
}

/// Per-(device, version) install record. Keyed uniquely on `(device_uuid, version)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRecord {
    pub device_uuid: String,
    pub version: String,
    pub installed_at: DateTime<Utc>,
}

/// A single usage sample captured for one device at one instant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UsageSample {
    pub timestamp: DateTime<Utc>,
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub net_sent_bytes: u64,
    pub net_recv_bytes: u64,
}

/// Derived feature vector for one device, computed from its sliding window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageVector {
    pub uuid: String,
    pub busy_fraction: f64,
    pub avg_cpu: f64,
    pub avg_mem: f64,
    pub avg_net: f64,
}

/// Result of scanning a device's window for the next idle gap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IdlePrediction {
    pub next_idle_time: Option<DateTime<Utc>>,
    pub idle_duration_secs: u64,
}

impl IdlePrediction {
    pub const NONE: Self = Self { next_idle_time: None, idle_duration_secs: 0 };
}

/// An update held by the Gateway until its scheduled activation time.
///
/// Invariant: at most one stored entry per `schedule_id`. Persistence across
/// restarts is not required (spec §4.7); the schedule map lives in memory.
#[derive(Debug, Clone)]
pub struct ScheduledUpdate {
    pub schedule_id: String,
    pub target_uuids: HashSet<String>,
    pub file_name: String,
    pub package_bytes: bytes::Bytes,
    pub start_time_utc: DateTime<Utc>,
}

/// Value stored in the in-flight license request map, keyed by device UUID.
#[derive(Debug, Clone, Copy)]
pub struct InFlightLicenseRequest {
    pub is_renewal: bool,
}

/// Disjoint-set bookkeeping shared by the Update Engine and Command Engine
/// fan-out paths. `pending ∪ succeeded ∪ failed == targets` at every
/// observation point.
#[derive(Debug, Clone, Default)]
pub struct FanOutStatus {
    pub pending: HashSet<String>,
    pub succeeded: HashSet<String>,
    pub failed: HashSet<String>,
}

impl FanOutStatus {
    pub fn new(targets: impl IntoIterator<Item = String>) -> Self {
        Self { pending: targets.into_iter().collect(), succeeded: HashSet::new(), failed: HashSet::new() }
    }

    /// Move a target from `pending` to `succeeded`.
    pub fn mark_succeeded(&mut self, uuid: &str) {
        self.pending.remove(uuid);
        self.succeeded.insert(uuid.to_owned());
    }

    /// Move a target from `pending` to `failed`.
    pub fn mark_failed(&mut self, uuid: &str) {
        self.pending.remove(uuid);
        self.failed.insert(uuid.to_owned());
    }

    pub fn is_done(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn targets(&self) -> HashSet<String> {
        self.pending.iter().chain(self.succeeded.iter()).chain(self.failed.iter()).cloned().collect()
    }
}
