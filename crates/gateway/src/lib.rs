// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! UpFlux Gateway: the on-premises relay between field devices and the
//! cloud control plane.

pub mod alert;
pub mod cloud;
pub mod command;
pub mod config;
pub mod device;
pub mod domain;
pub mod error;
pub mod license;
pub mod liveness;
pub mod logs;
pub mod recommender;
pub mod storage;
pub mod update;
pub mod usage;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::alert::AlertBus;
use crate::cloud::{CloudHandle, CloudWorker};
use crate::command::CommandEngine;
use crate::config::GatewayConfig;
use crate::device::client::DeviceClient;
use crate::device::server::SessionDeps;
use crate::license::LicenseCoordinator;
use crate::liveness::TcpPinger;
use crate::logs::LogPuller;
use crate::recommender::RecommenderBridge;
use crate::storage::{DeviceStore, MemoryDeviceStore, RedbDeviceStore, MemoryVersionStore, RedbVersionStore, VersionStore};
use crate::update::UpdateEngine;
use crate::usage::UsageAggregator;

/// Run the Gateway until shutdown (ctrl-c or an owned `CancellationToken`
/// is cancelled by the caller).
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    let devices: Arc<dyn DeviceStore> = match &config.device_db_path {
        Some(path) => Arc::new(RedbDeviceStore::open(path)?),
        None => {
            tracing::warn!("no device_db_path configured, device records will not survive a restart");
            Arc::new(MemoryDeviceStore::new())
        }
    };
    let versions: Arc<dyn VersionStore> = match &config.version_db_path {
        Some(path) => Arc::new(RedbVersionStore::open(path)?),
        None => {
            tracing::warn!("no version_db_path configured, version history will not survive a restart");
            Arc::new(MemoryVersionStore::new())
        }
    };
    let trusted_key = crate::update::signature::load_trusted_key(&config.update_signing_key_path)?;

    let usage = Arc::new(UsageAggregator::new());
    let alerts = Arc::new(AlertBus::new());
    let device_client = DeviceClient::new(config.device_connect_port, config.device_read_timeout());

    let (cloud_handle, cloud_rx) = CloudHandle::channel();

    let license = Arc::new(LicenseCoordinator::new(Arc::clone(&devices), device_client.clone(), cloud_handle.clone()));
    let command = Arc::new(CommandEngine::new(Arc::clone(&devices), device_client.clone(), cloud_handle.clone()));
    let update = UpdateEngine::new(
        Arc::clone(&devices),
        versions,
        device_client.clone(),
        cloud_handle.clone(),
        trusted_key,
        config.update_max_retries,
    );
    let logs = Arc::new(LogPuller::new(Arc::clone(&devices), device_client.clone(), cloud_handle.clone(), config.logs_directory.clone()));

    // The Cloud Control Channel Worker is the single place the upward-facing
    // collaborators converge; it never holds a reference back to anything
    // that in turn holds a CloudHandle, which is what keeps this wiring
    // acyclic (spec §9).
    let cloud_worker = CloudWorker::new(
        config.gateway_id.clone(),
        config.cloud_address.clone(),
        Arc::clone(&devices),
        device_client.clone(),
        Arc::clone(&license),
        Arc::clone(&command),
        Arc::clone(&update),
        Arc::clone(&logs),
        cloud_handle.clone(),
    );
    let cloud_shutdown = shutdown.clone();
    let cloud_task = tokio::spawn(async move { cloud_worker.run(cloud_rx, cloud_shutdown).await });

    update::UpdateEngine::spawn_ticker(Arc::clone(&update), config.scheduled_update_tick(), shutdown.clone());

    liveness::spawn(
        config.liveness_interval(),
        Arc::new(TcpPinger { port: config.device_connect_port }),
        Arc::clone(&devices),
        cloud_handle.clone(),
        shutdown.clone(),
    );

    let recommender = Arc::new(RecommenderBridge::new(config.recommender_address.clone(), Arc::clone(&usage), cloud_handle.clone()));
    recommender.spawn(config.recommender_interval(), shutdown.clone());

    // The Cloud Control Channel Worker is the Alert Bus's one subscriber; it
    // forwards everything it receives upward as an `AlertMessage` (spec §4.12).
    let mut alert_rx = alerts.subscribe().await;
    let alert_cloud = cloud_handle.clone();
    let alert_shutdown = shutdown.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = alert_shutdown.cancelled() => break,
                alert = alert_rx.recv() => {
                    match alert {
                        Some(alert) => alert_cloud.send_alert(alert),
                        None => break,
                    }
                }
            }
        }
    });

    let session_deps = Arc::new(SessionDeps {
        devices: Arc::clone(&devices),
        usage: Arc::clone(&usage),
        license: Arc::clone(&license),
        alerts: Arc::clone(&alerts),
        cloud: cloud_handle.clone(),
        idle_timeout: config.session_idle_timeout(),
    });

    let listen_addr = config.device_listen_addr();
    let listener_shutdown = shutdown.clone();
    let listener_task =
        tokio::spawn(async move { device::server::serve(&listen_addr, session_deps, listener_shutdown).await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();

    let shutdown_bound = tokio::time::sleep(Duration::from_secs(5));
    tokio::pin!(shutdown_bound);
    tokio::select! {
        _ = async {
            let _ = cloud_task.await;
            let _ = listener_task.await;
        } => {}
        _ = &mut shutdown_bound => {
            tracing::warn!("shutdown grace period elapsed before all tasks exited");
        }
    }

    Ok(())
}
