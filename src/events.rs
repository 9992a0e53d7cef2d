//! Event pipeline: parambus events re-published as uplink notifications.
//!
//! Consumes [`BusEvent`]s from a channel fed by the parambus's background
//! callback thread (via [`crate::parambus::registry::SubscriptionRegistry`]),
//! never calling back into the adapter from inside that callback itself —
//! this pipeline is a separate consumer task that only ever reads from the
//! channel, so any adapter calls it makes (to recover a newly-created row's
//! fields, say) happen well after the bus's own callback has returned.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{instrument, warn};

use crate::cache::ParameterCache;
use crate::parambus::{BusEvent, ParambusAdapter};
use crate::uplink::{Frame, FrameKind};

/// Configuration the event pipeline needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct EventPipelineConfig {
    /// Service name this gateway registered under the uplink as.
    pub service_name: String,
    /// Destination every outbound notification is addressed to.
    pub events_endpoint: String,
    /// Table-path prefix whose row lifecycle events become
    /// `NOTIFY_CONNECTED_CLIENT` notifications, e.g. `"Device.Hosts."`.
    pub clients_table_prefix: String,
    /// Whether `oldValue` is filled from the cache's last-known rendering,
    /// or always reported as `"unknown"` for bit-compatibility with a
    /// deployment that needs it. Defaults to `true`.
    pub fill_old_value_from_cache: bool,
}

/// Drives parambus events to outbound uplink notifications.
pub struct EventPipeline {
    adapter: Arc<dyn ParambusAdapter>,
    cache: Arc<ParameterCache>,
    outbound: UnboundedSender<Frame>,
    config: EventPipelineConfig,
}

impl EventPipeline {
    /// Build a pipeline wired to the given collaborators.
    #[must_use]
    pub const fn new(
        adapter: Arc<dyn ParambusAdapter>,
        cache: Arc<ParameterCache>,
        outbound: UnboundedSender<Frame>,
        config: EventPipelineConfig,
    ) -> Self {
        Self {
            adapter,
            cache,
            outbound,
            config,
        }
    }

    /// Consume `receiver` until it closes, turning every [`BusEvent`] into a
    /// notification frame pushed onto the session's outbound channel.
    #[instrument(skip(self, receiver))]
    pub async fn run(self, mut receiver: UnboundedReceiver<BusEvent>) {
        while let Some(event) = receiver.recv().await {
            let notification = self.translate_event(event).await;
            let Some(notification) = notification else {
                continue;
            };
            self.emit(notification).await;
        }
    }

    async fn translate_event(&self, event: BusEvent) -> Option<crate::notification::Notification> {
        match event {
            BusEvent::ValueChanged {
                name,
                new_value,
                write_id,
            } => Some(self.param_change_notification(&name, &new_value, write_id)),
            BusEvent::RowCreated { table_path, row_path } if table_path.starts_with(&self.config.clients_table_prefix) => {
                let mac = self.read_mac(&row_path).await;
                Some(self.connected_client_notification(mac, crate::notification::ClientStatus::Online))
            }
            BusEvent::RowDeleted { table_path, row_path } if table_path.starts_with(&self.config.clients_table_prefix) => {
                let mac = row_path
                    .trim_end_matches('.')
                    .rsplit('.')
                    .next()
                    .map_or_else(|| "unknown".to_owned(), ToOwned::to_owned);
                Some(self.connected_client_notification(mac, crate::notification::ClientStatus::Offline))
            }
            BusEvent::RowCreated { .. } | BusEvent::RowDeleted { .. } => None,
        }
    }

    fn param_change_notification(&self, name: &str, new_value: &str, write_id: Option<String>) -> crate::notification::Notification {
        let old_value = if self.config.fill_old_value_from_cache {
            self.cache.get(name).map_or_else(|| "unknown".to_owned(), |value| value.rendering)
        } else {
            "unknown".to_owned()
        };
        self.cache.invalidate(name);
        crate::notification::Notification::param_change(
            self.config.service_name.clone(),
            self.config.events_endpoint.clone(),
            now_ms(),
            name.to_owned(),
            old_value,
            new_value.to_owned(),
            write_id.unwrap_or_else(generate_write_id),
        )
    }

    fn connected_client_notification(
        &self,
        mac: String,
        status: crate::notification::ClientStatus,
    ) -> crate::notification::Notification {
        crate::notification::Notification::connected_client(
            self.config.service_name.clone(),
            self.config.events_endpoint.clone(),
            now_ms(),
            mac,
            status,
        )
    }

    /// Recover a newly-created client row's MAC field. Best-effort: a
    /// failure here still yields a notification, with `"unknown"` standing
    /// in for the MAC.
    async fn read_mac(&self, row_path: &str) -> String {
        self.adapter
            .get(&format!("{row_path}MAC"))
            .await
            .unwrap_or_else(|_| "unknown".to_owned())
    }

    /// Hand a built notification to the uplink session as an outbound event
    /// frame.
    pub async fn emit(&self, notification: crate::notification::Notification) {
        let Ok(payload) = serde_json::to_vec(&notification.to_json()) else {
            warn!("failed to encode notification payload");
            return;
        };
        let frame = Frame {
            kind: FrameKind::Event,
            source: self.config.service_name.clone(),
            dest: self.config.events_endpoint.clone(),
            transaction_uuid: None,
            content_type: "application/json".to_owned(),
            payload: Bytes::from(payload),
        };
        if self.outbound.send(frame).is_err() {
            warn!("uplink session outbound channel closed, dropping notification");
        }
    }
}

fn now_ms() -> i64 {
    i64::try_from(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis(),
    )
    .unwrap_or(i64::MAX)
}

fn generate_write_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
