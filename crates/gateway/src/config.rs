// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gateway configuration, built once at startup from CLI flags / env vars
//! and passed by reference into every component (spec §9 "Global/static
//! state").

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the UpFlux Gateway process.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "upflux-gateway")]
pub struct GatewayConfig {
    /// Identifier stamped as `sender_id` on every outbound ControlMessage.
    #[arg(long, env = "GATEWAY_ID")]
    pub gateway_id: String,

    /// WebSocket URL of the cloud control channel.
    #[arg(long, env = "CLOUD_ADDRESS")]
    pub cloud_address: String,

    /// Host to bind the device-facing TCP listener on.
    #[arg(long, default_value = "0.0.0.0", env = "DEVICE_LISTEN_HOST")]
    pub device_listen_host: String,

    /// TCP port the device-facing listener binds.
    #[arg(long, default_value_t = 5000, env = "DEVICE_LISTEN_PORT")]
    pub device_listen_port: u16,

    /// TCP port used to dial devices for outbound calls.
    #[arg(long, default_value_t = 6000, env = "DEVICE_CONNECT_PORT")]
    pub device_connect_port: u16,

    /// Local network interface used to filter device IP discovery.
    #[arg(long, env = "DEVICE_NETWORK_INTERFACE")]
    pub device_network_interface: Option<String>,

    /// Periodic renewal sweep interval, in minutes.
    #[arg(long, default_value_t = 60, env = "LICENSE_CHECK_INTERVAL_MIN")]
    pub license_check_interval_min: u64,

    /// Cap on per-device update retries.
    #[arg(long, default_value_t = 3, env = "UPDATE_MAX_RETRIES")]
    pub update_max_retries: u32,

    /// Directory `request_logs` persists fetched device log files under.
    #[arg(long, env = "LOGS_DIRECTORY")]
    pub logs_directory: PathBuf,

    /// Directory distributed update packages are persisted under.
    #[arg(long, env = "UPDATE_PACKAGE_DIRECTORY")]
    pub update_package_directory: PathBuf,

    /// HTTP base URL for `/ai/clustering` and `/ai/scheduling`.
    #[arg(long, env = "RECOMMENDER_ADDRESS")]
    pub recommender_address: String,

    /// Path to a redb file backing the Device Repository. Omit to fall
    /// back to an in-memory store (durability lost across restarts).
    #[arg(long, env = "DEVICE_DB_PATH")]
    pub device_db_path: Option<PathBuf>,

    /// Path to a redb file backing the Version Repository.
    #[arg(long, env = "VERSION_DB_PATH")]
    pub version_db_path: Option<PathBuf>,

    /// Path to the raw 32-byte Ed25519 public key trusted for update
    /// package signatures.
    #[arg(long, env = "UPDATE_SIGNING_KEY_PATH")]
    pub update_signing_key_path: PathBuf,

    /// Aggregate cap, in bytes, on package bytes held by in-flight and
    /// scheduled updates.
    #[arg(long, default_value_t = 512 * 1024 * 1024, env = "MAX_PENDING_PACKAGE_BYTES")]
    pub max_pending_package_bytes: u64,

    /// Idle timeout for a device `DataExchange` session, in seconds.
    #[arg(long, default_value_t = 300, env = "SESSION_IDLE_TIMEOUT_S")]
    pub session_idle_timeout_s: u64,

    /// Read timeout for individual outbound device protocol steps, in seconds.
    #[arg(long, default_value_t = 30, env = "DEVICE_READ_TIMEOUT_S")]
    pub device_read_timeout_s: u64,

    /// Liveness probe cadence, in seconds.
    #[arg(long, default_value_t = 2, env = "LIVENESS_INTERVAL_S")]
    pub liveness_interval_s: u64,

    /// Scheduled-update ticker cadence, in seconds.
    #[arg(long, default_value_t = 10, env = "SCHEDULED_UPDATE_TICK_S")]
    pub scheduled_update_tick_s: u64,

    /// Recommender tick cadence, in seconds.
    #[arg(long, default_value_t = 60, env = "RECOMMENDER_INTERVAL_S")]
    pub recommender_interval_s: u64,

    /// `pretty` or `json` — selects the `tracing_subscriber` formatter.
    #[arg(long, default_value = "pretty", env = "LOG_FORMAT")]
    pub log_format: String,
}

impl GatewayConfig {
    pub fn device_listen_addr(&self) -> String {
        format!("{}:{}", self.device_listen_host, self.device_listen_port)
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_s)
    }

    pub fn device_read_timeout(&self) -> Duration {
        Duration::from_secs(self.device_read_timeout_s)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_s)
    }

    pub fn scheduled_update_tick(&self) -> Duration {
        Duration::from_secs(self.scheduled_update_tick_s)
    }

    pub fn recommender_interval(&self) -> Duration {
        Duration::from_secs(self.recommender_interval_s)
    }

    pub fn license_check_interval(&self) -> Duration {
        Duration::from_secs(self.license_check_interval_min * 60)
    }
}
