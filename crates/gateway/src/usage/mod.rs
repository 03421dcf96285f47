// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Usage Aggregator (C3): a bounded, per-device sliding window of usage
//! samples, used both to forward monitoring data and to feed the
//! Recommender Bridge (C11).

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::domain::{IdlePrediction, UsageSample, UsageVector};

const WINDOW: Duration = Duration::seconds(6 * 60);
const BUSY_DENOMINATOR: f64 = 120.0;
const IDLE_GAP: Duration = Duration::seconds(20);

/// Per-device sliding window, guarded by its own mutex so that contention on
/// one device never blocks reads or writes for another.
struct DeviceWindow {
    samples: Mutex<VecDeque<UsageSample>>,
}

impl Default for DeviceWindow {
    fn default() -> Self {
        Self { samples: Mutex::new(VecDeque::new()) }
    }
}

/// Tracks usage samples for every known device.
#[derive(Default)]
pub struct UsageAggregator {
    windows: tokio::sync::RwLock<HashMap<String, DeviceWindow>>,
}

impl UsageAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample for `uuid` at `now`, trimming anything older than the
    /// 6-minute window.
    pub async fn record(&self, uuid: &str, sample: UsageSample) {
        self.ensure_window(uuid).await;
        let windows = self.windows.read().await;
        let window = windows.get(uuid).expect("window inserted above");
        let mut samples = window.samples.lock().await;
        samples.push_back(sample);
        let cutoff = sample.timestamp - WINDOW;
        while matches!(samples.front(), Some(s) if s.timestamp < cutoff) {
            samples.pop_front();
        }
    }

    async fn ensure_window(&self, uuid: &str) {
        if self.windows.read().await.contains_key(uuid) {
            return;
        }
        self.windows.write().await.entry(uuid.to_owned()).or_default();
    }

    /// Snapshot a feature vector per device with at least one sample.
    /// Devices with an empty window are omitted (treated as inactive).
    pub async fn compute_vectors(&self) -> Vec<UsageVector> {
        let windows = self.windows.read().await;
        let mut out = Vec::new();
        for (uuid, window) in windows.iter() {
            let samples = window.samples.lock().await;
            if samples.is_empty() {
                continue;
            }
            let count = samples.len() as f64;
            let avg_cpu = samples.iter().map(|s| s.cpu_pct).sum::<f64>() / count;
            let avg_mem = samples.iter().map(|s| s.mem_pct).sum::<f64>() / count;
            let avg_net = samples
                .iter()
                .map(|s| (s.net_sent_bytes + s.net_recv_bytes) as f64)
                .sum::<f64>()
                / count;
            out.push(UsageVector {
                uuid: uuid.clone(),
                busy_fraction: count / BUSY_DENOMINATOR,
                avg_cpu,
                avg_mem,
                avg_net,
            });
        }
        out
    }

    /// Scan `uuid`'s window for the next gap of at least 20 seconds between
    /// consecutive samples.
    pub async fn predict_next_idle(&self, uuid: &str) -> IdlePrediction {
        let windows = self.windows.read().await;
        let Some(window) = windows.get(uuid) else {
            return IdlePrediction::NONE;
        };
        let samples = window.samples.lock().await;
        for pair in samples.iter().collect::<Vec<_>>().windows(2) {
            let gap = pair[1].timestamp - pair[0].timestamp;
            if gap >= IDLE_GAP {
                return IdlePrediction {
                    next_idle_time: Some(pair[0].timestamp),
                    idle_duration_secs: gap.num_seconds().max(0) as u64,
                };
            }
        }
        IdlePrediction::NONE
    }
}

fn sample_at(now: DateTime<Utc>, cpu: f64) -> UsageSample {
    UsageSample { timestamp: now, cpu_pct: cpu, mem_pct: 0.0, net_sent_bytes: 0, net_recv_bytes: 0 }
}
