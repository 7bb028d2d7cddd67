//! Status sinks for pipeline progress events.
//!
//! - **[`NoopSink`]** drops every event.
//! - **[`LogSink`]** writes events to the `tracing` log.
//! - **[`BroadcastSink`]** fans events out on a `tokio` broadcast channel;
//!   subscribers join an organization room and see only that
//!   organization's events.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::traits::{StatusEvent, StatusSink};

pub struct NoopSink;

#[async_trait]
impl StatusSink for NoopSink {
    async fn emit(&self, _event: StatusEvent) -> Result<()> {
        Ok(())
    }
}

pub struct LogSink;

#[async_trait]
impl StatusSink for LogSink {
    async fn emit(&self, event: StatusEvent) -> Result<()> {
        tracing::info!(
            room = %event.room(),
            data_source = %event.data_source_id,
            status = ?event.status,
            error = event.error.as_deref().unwrap_or(""),
            "dataSourceUpdate"
        );
        Ok(())
    }
}

/// In-process publisher of `dataSourceUpdate` events.
pub struct BroadcastSink {
    sender: broadcast::Sender<StatusEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Join the room of `organization_id`.
    pub fn subscribe(&self, organization_id: i64) -> RoomSubscription {
        RoomSubscription {
            room: format!("org_{}", organization_id),
            receiver: self.sender.subscribe(),
        }
    }
}

#[async_trait]
impl StatusSink for BroadcastSink {
    async fn emit(&self, event: StatusEvent) -> Result<()> {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
        Ok(())
    }
}

pub struct RoomSubscription {
    room: String,
    receiver: broadcast::Receiver<StatusEvent>,
}

impl RoomSubscription {
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Next event for this room. `None` once the sink is dropped.
    pub async fn recv(&mut self) -> Option<StatusEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.room() == self.room => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(room = %self.room, skipped = n, "status subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::PipelineStatus;
    use nl_query_core::models::DataSourceId;

    #[tokio::test]
    async fn rooms_only_see_their_organization() {
        let sink = BroadcastSink::new(16);
        let mut acme = sink.subscribe(1);
        assert_eq!(acme.room(), "org_1");

        sink.emit(StatusEvent::new(DataSourceId(5), 2, PipelineStatus::Executing))
            .await
            .unwrap();
        sink.emit(StatusEvent::new(DataSourceId(5), 1, PipelineStatus::Completed))
            .await
            .unwrap();

        let event = acme.recv().await.unwrap();
        assert_eq!(event.organization_id, 1);
        assert_eq!(event.status, PipelineStatus::Completed);
    }

    #[tokio::test]
    async fn emitting_without_subscribers_succeeds() {
        let sink = BroadcastSink::new(1);
        assert!(sink
            .emit(StatusEvent::new(DataSourceId(1), 1, PipelineStatus::Failed))
            .await
            .is_ok());
        assert!(NoopSink
            .emit(StatusEvent::new(DataSourceId(1), 1, PipelineStatus::Failed))
            .await
            .is_ok());
    }
}
