//! Inbound message routing.
//!
//! Topics follow `devices/<device_id>/<kind>`. Any well-formed message
//! marks its device online; what happens next depends on the kind.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{InboundHandler, InboundMessage};
use crate::ota::OtaService;
use crate::storage::Database;

/// Numeric sensor fields lifted into the metrics table.
const SENSOR_METRICS: &[&str] = &["temperature", "humidity", "voltage", "battery", "air_quality"];

pub struct Ingestor {
    db: Database,
    ota: OtaService,
}

impl Ingestor {
    pub fn new(db: Database, ota: OtaService) -> Self {
        Self { db, ota }
    }

    async fn handle_sensor(&self, device_id: &str, body: &serde_json::Value) {
        for metric in SENSOR_METRICS {
            if let Some(value) = body.get(*metric).and_then(serde_json::Value::as_f64) {
                if let Err(err) = self.db.insert_metric(device_id, metric, value).await {
                    warn!(device_id, metric, "Failed to record metric: {err}");
                }
            }
        }

        // Firmware nests connectivity under a "status" object in sensor
        // documents.
        if let Some(status) = body.get("status") {
            self.record_link_status(device_id, status).await;
        }
    }

    async fn record_link_status(&self, device_id: &str, body: &serde_json::Value) {
        for (key, metric) in [
            ("wifi", "status.wifi"),
            ("mqtt", "status.mqtt"),
            ("uptime", "status.uptime"),
        ] {
            if let Some(value) = body.get(key).and_then(link_metric_value) {
                if let Err(err) = self.db.insert_metric(device_id, metric, value).await {
                    warn!(device_id, metric, "Failed to record metric: {err}");
                }
            }
        }
    }

    async fn handle_status(&self, device_id: &str, body: &serde_json::Value) {
        self.record_link_status(device_id, body).await;

        // Status messages double as OTA progress reports.
        if let (Some(task_id), Some(status)) = (
            body.get("task_id").and_then(serde_json::Value::as_str),
            body.get("status").and_then(serde_json::Value::as_str),
        ) {
            let progress = body.get("progress").and_then(serde_json::Value::as_i64);
            let detail = body.get("detail").and_then(serde_json::Value::as_str);
            if let Err(err) = self.ota.report_status(task_id, status, progress, detail).await {
                warn!(device_id, task_id, "Rejected OTA status report: {err}");
            }
        }
    }
}

#[async_trait]
impl InboundHandler for Ingestor {
    async fn handle(&self, message: InboundMessage) {
        let Some((device_id, kind)) = parse_topic(&message.topic) else {
            warn!(topic = %message.topic, "Dropping message with unrecognised topic");
            return;
        };

        if let Err(err) = self.db.touch_device(device_id).await {
            warn!(device_id, "Failed to update device liveness: {err}");
            return;
        }

        if kind == "heartbeat" {
            debug!(device_id, "Heartbeat");
            return;
        }

        let body: serde_json::Value = match serde_json::from_slice(&message.payload) {
            Ok(body) => body,
            Err(err) => {
                warn!(device_id, kind, "Dropping malformed JSON payload: {err}");
                return;
            }
        };

        match kind {
            "sensor" => self.handle_sensor(device_id, &body).await,
            "status" => self.handle_status(device_id, &body).await,
            "alerts" => {
                warn!(device_id, alert = %body, "Device alert");
            }
            "data" => {
                debug!(device_id, "Device data frame");
            }
            other => {
                warn!(device_id, kind = other, "Unknown topic kind");
            }
        }
    }
}

/// Connectivity values arrive as booleans, numbers, or the firmware's
/// `"connected"`/`"disconnected"` strings.
fn link_metric_value(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Bool(flag) => Some(f64::from(u8::from(*flag))),
        serde_json::Value::String(s) => match s.as_str() {
            "connected" => Some(1.0),
            "disconnected" => Some(0.0),
            _ => None,
        },
        other => other.as_f64(),
    }
}

/// Extract `(device_id, kind)` from `devices/<device_id>/<kind>`.
fn parse_topic(topic: &str) -> Option<(&str, &str)> {
    let mut parts = topic.split('/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("devices"), Some(device_id), Some(kind), None)
            if !device_id.is_empty() && !kind.is_empty() =>
        {
            Some((device_id, kind))
        }
        _ => None,
    }
}
