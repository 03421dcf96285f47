// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The cloud wire protocol: a single tagged-union `ControlMessage` carried
//! over the bidirectional control channel (spec §6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Every message exchanged over the control channel is wrapped with the
/// sender's gateway id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlMessage {
    pub sender_id: String,
    pub payload: Payload,
}

impl ControlMessage {
    pub fn new(sender_id: impl Into<String>, payload: Payload) -> Self {
        Self { sender_id: sender_id.into(), payload }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Payload {
    LicenseRequest { uuid: String, is_renewal: bool },
    LicenseResponse { uuid: String, approved: bool, license: Option<String>, expiration: Option<DateTime<Utc>> },
    MonitoringData { uuid: String, metrics: MonitoringMetrics },
    LogUpload { uuid: String, file_name: String, bytes: Vec<u8> },
    LogRequest { uuids: Vec<String> },
    LogResponse { success: bool, message: String },
    CommandRequest { command_id: String, command_type: CommandType, params: String, targets: Vec<String> },
    CommandResponse { command_id: String, success: bool, details: String },
    UpdatePackage { file_name: String, bytes: Vec<u8>, signature: Vec<u8>, targets: Vec<String> },
    UpdateAck { update_id: String, success: bool, details: String, succeeded: Vec<String>, failed: Vec<String> },
    ScheduledUpdate {
        schedule_id: String,
        targets: Vec<String>,
        file_name: String,
        bytes: Vec<u8>,
        signature: Vec<u8>,
        start_time_utc: DateTime<Utc>,
    },
    VersionDataRequest,
    VersionDataResponse { success: bool, entries: Vec<VersionEntry> },
    AlertMessage { timestamp: DateTime<Utc>, level: String, message: String, exception: Option<String>, source: String },
    AIRecommendations { clusters: Vec<Cluster>, plot_data: Vec<PlotPoint> },
    DeviceStatus { uuid: String, is_online: bool, last_seen: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    Rollback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionEntry {
    pub uuid: String,
    pub current: VersionPoint,
    pub available: Vec<VersionPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionPoint {
    pub version: String,
    pub installed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub uuids: Vec<String>,
    pub update_time_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotPoint {
    pub uuid: String,
    pub x: f64,
    pub y: f64,
    pub cluster_id: String,
}

/// The nested monitoring shape (spec §6); field names are preserved
/// verbatim from the device wire format for interoperability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringMetrics {
    #[serde(rename = "UUID")]
    pub uuid: String,
    #[serde(rename = "Metrics")]
    pub metrics: Metrics,
    #[serde(rename = "SensorData")]
    pub sensor_data: SensorData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(rename = "CpuMetrics")]
    pub cpu_metrics: CpuMetrics,
    #[serde(rename = "MemoryMetrics")]
    pub memory_metrics: MemoryMetrics,
    #[serde(rename = "NetworkMetrics")]
    pub network_metrics: NetworkMetrics,
    #[serde(rename = "DiskMetrics")]
    pub disk_metrics: DiskMetrics,
    #[serde(rename = "SystemUptimeMetrics")]
    pub uptime_metrics: SystemUptimeMetrics,
    #[serde(rename = "CpuTemperatureMetrics")]
    pub temperature_metrics: CpuTemperatureMetrics,
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuMetrics {
    #[serde(rename = "CurrentUsage")]
    pub current_usage: f64,
    #[serde(rename = "LoadAverage")]
    pub load_average: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMetrics {
    #[serde(rename = "TotalMemory")]
    pub total_memory: u64,
    #[serde(rename = "FreeMemory")]
    pub free_memory: u64,
    #[serde(rename = "UsedMemory")]
    pub used_memory: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkMetrics {
    #[serde(rename = "ReceivedBytes")]
    pub received_bytes: u64,
    #[serde(rename = "TransmittedBytes")]
    pub transmitted_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskMetrics {
    #[serde(rename = "TotalDiskSpace")]
    pub total_disk_space: u64,
    #[serde(rename = "FreeDiskSpace")]
    pub free_disk_space: u64,
    #[serde(rename = "UsedDiskSpace")]
    pub used_disk_space: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemUptimeMetrics {
    #[serde(rename = "UptimeSeconds")]
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuTemperatureMetrics {
    #[serde(rename = "TemperatureCelsius")]
    pub temperature_celsius: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorData {
    #[serde(rename = "RedValue")]
    pub red_value: u32,
    #[serde(rename = "GreenValue")]
    pub green_value: u32,
    #[serde(rename = "BlueValue")]
    pub blue_value: u32,
}
