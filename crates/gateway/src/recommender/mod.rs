// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recommender Bridge (C11): a 1-minute ticker that hands usage vectors and
//! idle-window data to an external recommender service, then forwards its
//! clustering and scheduling results upward as `AIRecommendations`.
//!
//! The HTTP client shape is grounded on the teacher's `UpstreamClient`.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::cloud::messages::{Cluster, PlotPoint};
use crate::cloud::CloudHandle;
use crate::usage::UsageAggregator;

#[derive(Debug, Serialize)]
struct ClusteringRequest<'a> {
    vectors: &'a [crate::domain::UsageVector],
}

#[derive(Debug, Deserialize)]
struct ClusteringResponse {
    clusters: Vec<RawCluster>,
    plot_data: Vec<PlotPoint>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawCluster {
    id: String,
    uuids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SchedulingRequest<'a> {
    clusters: &'a [RawCluster],
    idle_windows: Vec<IdleWindow>,
}

#[derive(Debug, Serialize)]
struct IdleWindow {
    uuid: String,
    next_idle_time: Option<chrono::DateTime<chrono::Utc>>,
    idle_duration_secs: u64,
}

#[derive(Debug, Deserialize)]
struct SchedulingResponse {
    clusters: Vec<Cluster>,
}

pub struct RecommenderBridge {
    client: Client,
    base_url: String,
    usage: Arc<UsageAggregator>,
    cloud: CloudHandle,
}

impl RecommenderBridge {
    pub fn new(base_url: String, usage: Arc<UsageAggregator>, cloud: CloudHandle) -> Self {
        let client = Client::builder().timeout(Duration::from_secs(30)).build().unwrap_or_default();
        Self { client, base_url, usage, cloud }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Run one tick: compute vectors, call clustering then scheduling, emit
    /// the combined result. Any failure is logged and the tick is skipped.
    pub async fn tick(&self) {
        let vectors = self.usage.compute_vectors().await;

        let clustering = match self.clustering(&vectors).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(err = %e, "recommender clustering call failed, skipping tick");
                return;
            }
        };

        let mut idle_windows = Vec::with_capacity(vectors.len());
        for vector in &vectors {
            let prediction = self.usage.predict_next_idle(&vector.uuid).await;
            idle_windows.push(IdleWindow {
                uuid: vector.uuid.clone(),
                next_idle_time: prediction.next_idle_time,
                idle_duration_secs: prediction.idle_duration_secs,
            });
        }

        let scheduling = match self.scheduling(&clustering.clusters, idle_windows).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(err = %e, "recommender scheduling call failed, skipping tick");
                return;
            }
        };

        self.cloud.send_recommendations(scheduling.clusters, clustering.plot_data);
    }

    async fn clustering(&self, vectors: &[crate::domain::UsageVector]) -> anyhow::Result<ClusteringResponse> {
        let resp = self
            .client
            .post(self.url("/ai/clustering"))
            .json(&ClusteringRequest { vectors })
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    async fn scheduling(&self, clusters: &[RawCluster], idle_windows: Vec<IdleWindow>) -> anyhow::Result<SchedulingResponse> {
        let resp = self
            .client
            .post(self.url("/ai/scheduling"))
            .json(&SchedulingRequest { clusters, idle_windows })
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    /// Spawn the 1-minute recommender ticker. Runs until `cancel` fires.
    pub fn spawn(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => {}
                }
                self.tick().await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tick_with_no_usage_data_and_unreachable_endpoint_does_not_panic() {
        let usage = Arc::new(UsageAggregator::new());
        let (handle, _rx) = CloudHandle::channel();
        let bridge = RecommenderBridge::new("http://127.0.0.1:1".to_owned(), usage, handle);
        bridge.tick().await;
    }
}
