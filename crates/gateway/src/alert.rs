// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Alert Bus (C12): a single-subscriber sink for operator-facing alerts.
//!
//! Unlike the teacher's multi-subscriber event fan-out, the Gateway publishes
//! alerts to at most one live listener (the Cloud Control Channel Worker).
//! Publishing with no subscriber attached logs a warning and drops the alert.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};

use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Information,
    Warning,
    Error,
}

/// An operator-facing alert emitted by any component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub timestamp: DateTime<Utc>,
    pub level: AlertLevel,
    pub message: String,
    pub exception: Option<String>,
    pub source: String,
}

impl Alert {
    pub fn new(source: &str, level: AlertLevel, message: impl Into<String>) -> Self {
        Self { timestamp: Utc::now(), level, message: message.into(), exception: None, source: source.to_owned() }
    }

    pub fn from_error(source: &str, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level: AlertLevel::Error,
            message: message.into(),
            exception: Some(kind.to_string()),
            source: source.to_owned(),
        }
    }
}

/// Bus with exactly one live subscriber slot.
#[derive(Default)]
pub struct AlertBus {
    subscriber: RwLock<Option<mpsc::UnboundedSender<Alert>>>,
}

impl AlertBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the single live subscriber, replacing any previous one.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<Alert> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.subscriber.write().await = Some(tx);
        rx
    }

    /// Deliver `alert` to the live subscriber, if any.
    pub async fn publish(&self, alert: Alert) {
        let guard = self.subscriber.read().await;
        match guard.as_ref() {
            Some(tx) if tx.send(alert).is_ok() => {}
            _ => tracing::warn!(source = %alert.source, message = %alert.message, "alert dropped, no subscriber"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscriber_does_not_panic() {
        let bus = AlertBus::new();
        bus.publish(Alert::new("test", AlertLevel::Warning, "no one listening")).await;
    }

    #[tokio::test]
    async fn subscriber_receives_published_alert() {
        let bus = AlertBus::new();
        let mut rx = bus.subscribe().await;
        bus.publish(Alert::new("test", AlertLevel::Error, "boom")).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.message, "boom");
        assert_eq!(received.level, AlertLevel::Error);
    }

    #[tokio::test]
    async fn resubscribe_replaces_previous_subscriber() {
        let bus = AlertBus::new();
        let _rx1 = bus.subscribe().await;
        let mut rx2 = bus.subscribe().await;
        bus.publish(Alert::new("test", AlertLevel::Warning, "routed to newest")).await;
        assert!(rx2.recv().await.is_some());
    }
}
