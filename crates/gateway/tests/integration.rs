// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios driving the Gateway's public component API
//! in-process: no real cloud connection or binary is started, just a
//! loopback `TcpStream` standing in for a device and an `mpsc` channel
//! standing in for the cloud control stream, per the teacher's
//! `tests/integration.rs` convention of exercising the crate's public API
//! directly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use ed25519_dalek::{Signer, SigningKey};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use upflux_gateway::alert::AlertBus;
use upflux_gateway::cloud::{CloudHandle, Payload};
use upflux_gateway::command::CommandEngine;
use upflux_gateway::device::protocol::{read_framed, read_line, write_framed, write_line};
use upflux_gateway::device::{serve, DeviceClient, SessionDeps};
use upflux_gateway::domain::{Device, UsageSample};
use upflux_gateway::license::LicenseCoordinator;
use upflux_gateway::liveness::{self, Pinger};
use upflux_gateway::recommender::RecommenderBridge;
use upflux_gateway::storage::{DeviceStore, MemoryDeviceStore, MemoryVersionStore, VersionStore};
use upflux_gateway::update::UpdateEngine;
use upflux_gateway::usage::UsageAggregator;

fn monitoring_json() -> String {
    r#"{"UUID":"dev-1","Metrics":{"CpuMetrics":{"CurrentUsage":40.0,"LoadAverage":1.2},"MemoryMetrics":{"TotalMemory":1000,"FreeMemory":500,"UsedMemory":500},"NetworkMetrics":{"ReceivedBytes":100,"TransmittedBytes":200},"DiskMetrics":{"TotalDiskSpace":1000,"FreeDiskSpace":400,"UsedDiskSpace":600},"SystemUptimeMetrics":{"UptimeSeconds":3600},"CpuTemperatureMetrics":{"TemperatureCelsius":45.0},"Timestamp":"2026-01-01T00:00:00Z"},"SensorData":{"RedValue":1,"GreenValue":2,"BlueValue":3}}"#
        .to_owned()
}

/// Connect to a loopback listener, retrying briefly while the server task
/// finishes binding.
async fn connect_retrying(addr: &str) -> TcpStream {
    for _ in 0..50 {
        if let Ok(stream) = TcpStream::connect(addr).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("could not connect to {addr}");
}

// -- Scenario 1: fresh registration -------------------------------------------

#[tokio::test]
async fn fresh_registration_then_reconnect_skips_license_request() {
    let devices: Arc<dyn DeviceStore> = Arc::new(MemoryDeviceStore::new());
    let usage = Arc::new(UsageAggregator::new());
    let alerts = Arc::new(AlertBus::new());
    let (cloud, mut cloud_rx) = CloudHandle::channel();
    let device_client = DeviceClient::new(47710, Duration::from_millis(500));
    let license = Arc::new(LicenseCoordinator::new(Arc::clone(&devices), device_client.clone(), cloud.clone()));

    let deps = Arc::new(SessionDeps {
        devices: Arc::clone(&devices),
        usage,
        license: Arc::clone(&license),
        alerts,
        cloud: cloud.clone(),
        idle_timeout: Duration::from_millis(500),
    });

    let cancel = CancellationToken::new();
    let server_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = serve("127.0.0.1:47711", deps, server_cancel).await;
    });

    // First session: unknown device, gated closed.
    let mut stream = connect_retrying("127.0.0.1:47711").await;
    let (read_half, mut write_half) = stream.split();
    let mut reader = BufReader::new(read_half);
    assert_eq!(read_line(&mut reader).await.unwrap(), "REQUEST_UUID");
    write_line(&mut write_half, "UUID:dev-1").await.unwrap();
    assert_eq!(read_line(&mut reader).await.unwrap(), "LICENSE_INVALID");
    drop(stream);

    let Payload::LicenseRequest { uuid, is_renewal } = cloud_rx.recv().await.unwrap() else {
        panic!("expected LicenseRequest")
    };
    assert_eq!(uuid, "dev-1");
    assert!(!is_renewal);

    // Cloud approves: the License Coordinator pushes the license straight
    // to the device, so a listener standing in for the device must be up
    // before `handle_response` runs.
    let license_listener = TcpListener::bind("127.0.0.1:47710").await.unwrap();
    let pushed = tokio::spawn(async move {
        let (mut stream, _) = license_listener.accept().await.unwrap();
        read_line(&mut BufReader::new(&mut stream)).await.unwrap()
    });

    license
        .handle_response("dev-1", true, Some("<xml/>".to_owned()), Some(Utc::now() + chrono::Duration::days(1)))
        .await;

    assert_eq!(pushed.await.unwrap(), "LICENSE:<xml/>");

    let stored = devices.get("dev-1").await.unwrap().unwrap();
    assert!(stored.has_valid_license(Utc::now()));

    // Second session: license is valid, so no new LicenseRequest and the
    // session proceeds straight into the monitoring exchange.
    let mut stream = connect_retrying("127.0.0.1:47711").await;
    let (read_half, mut write_half) = stream.split();
    let mut reader = BufReader::new(read_half);
    assert_eq!(read_line(&mut reader).await.unwrap(), "REQUEST_UUID");
    write_line(&mut write_half, "UUID:dev-1").await.unwrap();
    write_line(&mut write_half, &format!("MONITORING_DATA:{}", monitoring_json())).await.unwrap();
    assert_eq!(read_line(&mut reader).await.unwrap(), "DATA_RECEIVED");

    assert!(cloud_rx.try_recv().is_err(), "no new LicenseRequest should fire on reconnect");
    let Payload::MonitoringData { uuid, .. } = cloud_rx.recv().await.unwrap() else {
        panic!("expected MonitoringData")
    };
    assert_eq!(uuid, "dev-1");

    cancel.cancel();
}

// -- Scenario 2: rollback fan-out, partial failure ----------------------------

#[tokio::test]
async fn rollback_fan_out_partial_failure() {
    const PORT: u16 = 47601;

    let devices: Arc<dyn DeviceStore> = Arc::new(MemoryDeviceStore::new());
    let now = Utc::now();
    for (uuid, ip) in [("a", "127.0.0.1"), ("b", "127.0.0.2"), ("c", "127.0.0.3")] {
        devices.upsert(&Device::new(uuid, Some(ip.to_owned()), now)).await.unwrap();
    }
    // c's address is left without a listener: the dial itself fails.

    let listener_a = TcpListener::bind(("127.0.0.1", PORT)).await.unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener_a.accept().await.unwrap();
        let line = read_line(&mut BufReader::new(&mut stream)).await.unwrap();
        assert!(line.starts_with("ROLLBACK:"));
        write_line(&mut stream, "ROLLBACK_INITIATED").await.unwrap();
        write_line(&mut stream, "ROLLBACK_COMPLETED").await.unwrap();
    });

    let listener_b = TcpListener::bind(("127.0.0.2", PORT)).await.unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener_b.accept().await.unwrap();
        read_line(&mut BufReader::new(&mut stream)).await.unwrap();
        write_line(&mut stream, "ROLLBACK_INITIATED").await.unwrap();
        // drop without completing
    });

    let (cloud, mut cloud_rx) = CloudHandle::channel();
    let engine = CommandEngine::new(devices, DeviceClient::new(PORT, Duration::from_millis(500)), cloud);
    engine
        .handle_rollback("c-1".to_owned(), "version=1.2.3".to_owned(), vec!["a".to_owned(), "b".to_owned(), "c".to_owned()])
        .await;

    let Payload::CommandResponse { command_id, success, details } = cloud_rx.try_recv().unwrap() else {
        panic!("expected CommandResponse")
    };
    assert_eq!(command_id, "c-1");
    assert!(!success);
    assert_eq!(details, "Rollback partial success: succeeded on a; failed on b, c");
}

// -- Scenario 3: signature-rejected update -------------------------------------

#[tokio::test]
async fn signature_rejected_update_performs_no_device_dial() {
    let devices: Arc<dyn DeviceStore> = Arc::new(MemoryDeviceStore::new());
    let versions: Arc<dyn VersionStore> = Arc::new(MemoryVersionStore::new());
    // Port 1 refuses instantly; if the engine ever dialed, the test would hang
    // on the read_timeout instead of returning immediately.
    let device_client = DeviceClient::new(1, Duration::from_millis(50));
    let (cloud, mut cloud_rx) = CloudHandle::channel();
    let key = SigningKey::from_bytes(&[7u8; 32]).verifying_key();
    let engine = UpdateEngine::new(devices, versions, device_client, cloud, key, 0);

    engine
        .handle_update_package("app_2.0.deb".to_owned(), Bytes::from_static(b"payload"), vec![0u8; 64], vec!["a".to_owned()])
        .await;

    let Payload::UpdateAck { success, details, .. } = cloud_rx.try_recv().unwrap() else { panic!("expected UpdateAck") };
    assert!(!success);
    assert_eq!(details, "signature_rejected");
}

// -- Scenario 4: scheduled update fires ----------------------------------------

#[tokio::test]
async fn scheduled_update_fires_and_delivers() {
    const PORT: u16 = 47602;

    let devices: Arc<dyn DeviceStore> = Arc::new(MemoryDeviceStore::new());
    devices.upsert(&Device::new("a", Some("127.0.0.1".to_owned()), Utc::now())).await.unwrap();
    let versions: Arc<dyn VersionStore> = Arc::new(MemoryVersionStore::new());

    let package = Bytes::from_static(b"package-bytes");
    let signing_key = SigningKey::from_bytes(&[9u8; 32]);
    let signature = signing_key.sign(&package).to_bytes().to_vec();

    let listener = TcpListener::bind(("127.0.0.1", PORT)).await.unwrap();
    let delivered = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let line = read_line(&mut BufReader::new(&mut stream)).await.unwrap();
        assert_eq!(line, "SEND_PACKAGE:app_2.1.deb");
        write_line(&mut stream, "READY_FOR_PACKAGE").await.unwrap();
        read_framed(&mut stream).await.unwrap()
    });

    let device_client = DeviceClient::new(PORT, Duration::from_millis(500));
    let (cloud, mut cloud_rx) = CloudHandle::channel();
    let engine = UpdateEngine::new(devices, versions, device_client, cloud, signing_key.verifying_key(), 0);

    let cancel = CancellationToken::new();
    UpdateEngine::spawn_ticker(Arc::clone(&engine), Duration::from_millis(200), cancel.clone());

    engine
        .handle_scheduled_update(
            "s-1".to_owned(),
            vec!["a".to_owned()],
            "app_2.1.deb".to_owned(),
            package.clone(),
            signature,
            Utc::now() + chrono::Duration::milliseconds(300),
        )
        .await;

    let Payload::CommandResponse { command_id, success, .. } = cloud_rx.recv().await.unwrap() else {
        panic!("expected CommandResponse")
    };
    assert_eq!(command_id, "s-1");
    assert!(success);

    let Payload::UpdateAck { success, details, .. } =
        tokio::time::timeout(Duration::from_secs(2), cloud_rx.recv()).await.unwrap().unwrap()
    else {
        panic!("expected UpdateAck")
    };
    assert!(success);
    assert_eq!(details, "Succeeded on: a; Failed on: ");

    assert_eq!(delivered.await.unwrap(), package.to_vec());
    cancel.cancel();
}

// -- Scenario 5: liveness transition -------------------------------------------

struct ScriptedPinger {
    responses: Vec<bool>,
    next: AtomicUsize,
}

#[async_trait]
impl Pinger for ScriptedPinger {
    async fn ping(&self, _ip: &str, _timeout: Duration) -> bool {
        let i = self.next.fetch_add(1, Ordering::SeqCst);
        self.responses[i.min(self.responses.len() - 1)]
    }
}

#[tokio::test]
async fn liveness_transition_emits_on_change_only() {
    let devices: Arc<dyn DeviceStore> = Arc::new(MemoryDeviceStore::new());
    devices.upsert(&Device::new("a", Some("10.0.0.5".to_owned()), Utc::now())).await.unwrap();

    let pinger = Arc::new(ScriptedPinger { responses: vec![true, true, false, false, false], next: AtomicUsize::new(0) });
    let (cloud, mut cloud_rx) = CloudHandle::channel();
    let cancel = CancellationToken::new();

    liveness::spawn(Duration::from_millis(50), pinger, devices, cloud, cancel.clone());

    let Payload::DeviceStatus { uuid, is_online, .. } =
        tokio::time::timeout(Duration::from_secs(2), cloud_rx.recv()).await.unwrap().unwrap()
    else {
        panic!("expected DeviceStatus")
    };
    assert_eq!(uuid, "a");
    assert!(is_online);

    let Payload::DeviceStatus { is_online, .. } =
        tokio::time::timeout(Duration::from_secs(2), cloud_rx.recv()).await.unwrap().unwrap()
    else {
        panic!("expected DeviceStatus")
    };
    assert!(!is_online);

    // No third event should show up even after several more probe ticks.
    assert!(tokio::time::timeout(Duration::from_millis(300), cloud_rx.recv()).await.is_err());
    cancel.cancel();
}

// -- Scenario 6: recommender tick -----------------------------------------------

async fn respond_with_json(listener: &TcpListener, body: &str) {
    let (mut stream, _) = listener.accept().await.unwrap();
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        buf.extend_from_slice(&chunk[..n]);
        if let Some(header_end) = find_subslice(&buf, b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
            let content_length = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                .unwrap_or(0);
            if buf.len() >= header_end + 4 + content_length {
                break;
            }
        }
        if n == 0 {
            break;
        }
    }

    let response =
        format!("HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}", body.len(), body);
    stream.write_all(response.as_bytes()).await.unwrap();
    stream.shutdown().await.unwrap();
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[tokio::test]
async fn recommender_tick_emits_ai_recommendations() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let usage = Arc::new(UsageAggregator::new());
    let t0 = Utc::now() - chrono::Duration::minutes(1);
    for i in 0..60 {
        usage
            .record(
                "a",
                UsageSample {
                    timestamp: t0 + chrono::Duration::milliseconds(i * 10),
                    cpu_pct: 40.0,
                    mem_pct: 50.0,
                    net_sent_bytes: 500,
                    net_recv_bytes: 500,
                },
            )
            .await;
    }

    let (cloud, mut cloud_rx) = CloudHandle::channel();
    let bridge = Arc::new(RecommenderBridge::new(base_url, Arc::clone(&usage), cloud));

    let http_task = tokio::spawn(async move {
        respond_with_json(&listener, r#"{"clusters":[{"id":"k-0","uuids":["a"]}],"plot_data":[]}"#).await;
        respond_with_json(
            &listener,
            r#"{"clusters":[{"id":"k-0","uuids":["a"],"update_time_utc":"2026-01-01T00:00:00Z"}]}"#,
        )
        .await;
    });

    bridge.tick().await;
    http_task.await.unwrap();

    let Payload::AIRecommendations { clusters, .. } = cloud_rx.try_recv().unwrap() else { panic!("expected AIRecommendations") };
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].id, "k-0");
    assert_eq!(clusters[0].uuids, vec!["a".to_owned()]);

    let vectors = usage.compute_vectors().await;
    assert_eq!(vectors[0].busy_fraction, 0.5);
    assert_eq!(vectors[0].avg_cpu, 40.0);
    assert_eq!(vectors[0].avg_mem, 50.0);
    assert_eq!(vectors[0].avg_net, 1000.0);
}
