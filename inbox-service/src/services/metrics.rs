//! Metrics collection for inbox-service.

use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

use crate::models::{Channel, NotificationStatus, NotificationType};

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Safe to call more than once; only the
/// first call installs.
pub fn init_metrics() {
    if METRICS_HANDLE.get().is_some() {
        return;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = METRICS_HANDLE.set(handle);
        }
        Err(e) => tracing::warn!("Failed to install Prometheus recorder: {}", e),
    }
}

/// Get metrics output in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

/// Record the final status of a dispatched notification.
pub fn record_dispatch(notification_type: NotificationType, status: NotificationStatus) {
    counter!(
        "notification_dispatch_total",
        "type" => notification_type.as_str(),
        "status" => status.as_str()
    )
    .increment(1);
}

/// Record a single provider call.
pub fn record_delivery_attempt(channel: Channel, outcome: &'static str) {
    counter!(
        "notification_delivery_attempts_total",
        "channel" => channel.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}
