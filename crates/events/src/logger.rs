//! Background sink that writes every [`SprayEvent`] to the tracing log.
//!
//! Runs as a long-lived task and shuts down when the
//! [`EventBus`](crate::bus::EventBus) is dropped.

use tokio::sync::broadcast;

use crate::bus::{Envelope, SprayEvent};

pub struct EventLogger;

impl EventLogger {
    /// Run the logging loop until the channel closes.
    pub async fn run(mut receiver: broadcast::Receiver<Envelope>) {
        loop {
            match receiver.recv().await {
                Ok(envelope) => Self::log(&envelope.event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event logger lagged, some events were not logged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, event logger shutting down");
                    break;
                }
            }
        }
    }

    fn log(event: &SprayEvent) {
        let event_type = event.event_type();
        match event {
            SprayEvent::ErrorOccurred { message } => {
                tracing::error!(event_type, %message, "Error reported");
            }
            SprayEvent::ConnectionStatusChanged { target, status } => {
                tracing::info!(event_type, %target, %status, "Connection status changed");
            }
            SprayEvent::SyncProgress { percent } => {
                tracing::debug!(event_type, percent, "Sync progress");
            }
            SprayEvent::InitializationProgress { percent, message } => {
                tracing::info!(event_type, percent, %message, "Initialization progress");
            }
            SprayEvent::BatchAnalysisCompleted { batch_id, report } => {
                tracing::info!(
                    event_type,
                    %batch_id,
                    utilization = report.space_utilization,
                    estimated_minutes = report.estimated_time,
                    "Batch analysis completed"
                );
            }
            other => {
                tracing::info!(event_type, event = ?other, "Event");
            }
        }
    }
}
