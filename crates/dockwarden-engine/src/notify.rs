//! Notification chain contract. Out of full-implementation scope (dashboard-
//! adjacent), but the seam the core depends on is real: a future HTTP/webhook/
//! Slack sink plugs in here without the core knowing about any concrete provider.

use async_trait::async_trait;
use tracing::info;

use dockwarden_core::events::Event;

/// A sink that receives every published event. Notification failures are
/// swallowed — the updater's success does not depend on whether a notification
/// was ever delivered (§7 propagation policy).
#[async_trait]
pub trait NotifySink: Send + Sync {
    async fn notify(&self, event: &Event);
}

/// Default sink: logs at `info` and never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifySink;

#[async_trait]
impl NotifySink for LoggingNotifySink {
    async fn notify(&self, event: &Event) {
        info!(
            kind = ?event.kind,
            container = ?event.container_name,
            host = ?event.host_name,
            message = ?event.message,
            "notification"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dockwarden_core::events::EventKind;

    #[tokio::test]
    async fn logging_sink_never_panics() {
        let sink = LoggingNotifySink;
        sink.notify(&Event::new(EventKind::ScanComplete, Utc::now())).await;
    }
}
