//! Notification envelope types re-published to uplink destinations.
//!
//! [`Notification`] is the outbound counterpart of a [`crate::parambus::BusEvent`]
//! (or of a completed [`crate::engine::TransactionOutcome`]): the event
//! pipeline and transaction engine both build one of these and hand it to
//! [`crate::uplink::UplinkSession`] for framing, keeping the wire envelope
//! separate from the connection handling that frames it.

use serde::Serialize;

/// Notification type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NotificationType {
    /// A subscribed parameter's value changed.
    ParamChange = 1,
    /// A factory reset was performed.
    FactoryReset = 2,
    /// A firmware upgrade event.
    FirmwareUpgrade = 3,
    /// A client connected to or disconnected from a hosts/clients table.
    ConnectedClient = 4,
    /// A transaction reached a terminal state.
    TransactionStatus = 5,
    /// A device-level status change.
    DeviceStatus = 6,
    /// A component-level status change.
    ComponentStatus = 7,
}

impl From<NotificationType> for u8 {
    fn from(kind: NotificationType) -> Self {
        kind as Self
    }
}

impl Serialize for NotificationType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*self))
    }
}

/// Online/offline state carried by a [`ConnectedClientData`] notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub enum ClientStatus {
    /// The client's row was created.
    Online,
    /// The client's row was deleted.
    Offline,
}

/// `data` payload for [`NotificationType::ParamChange`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamChangeData {
    /// Fully-qualified parameter name.
    pub param_name: String,
    /// Prior value, `"unknown"` when unavailable.
    pub old_value: String,
    /// The value the bus reported.
    pub new_value: String,
    /// Bus-supplied write identifier, or a locally generated one.
    #[serde(rename = "writeID")]
    pub write_id: String,
}

/// `data` payload for [`NotificationType::ConnectedClient`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedClientData {
    /// MAC address of the client, when it could be recovered.
    pub mac: String,
    /// Whether the row was created or deleted.
    pub status: ClientStatus,
}

/// `data` payload for [`NotificationType::TransactionStatus`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStatusData {
    /// The transaction's correlation id.
    pub transaction_id: String,
    /// `"Success"`, `"Failure"`, or `"Partial"`.
    pub status: String,
    /// Whether the transaction engine rolled this transaction back.
    pub rolled_back: bool,
}

/// `data` payload for [`NotificationType::DeviceStatus`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatusData {
    /// Free-form status string (e.g. `"online"`, `"rebooting"`).
    pub status: String,
}

/// `data` payload for [`NotificationType::FactoryReset`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FactoryResetData {
    /// Why the reset was triggered, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `data` payload for [`NotificationType::FirmwareUpgrade`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareUpgradeData {
    /// Target firmware version.
    pub version: String,
    /// Free-form status string (e.g. `"downloading"`, `"applied"`).
    pub status: String,
}

/// `data` payload for [`NotificationType::ComponentStatus`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatusData {
    /// Name of the component whose status changed.
    pub component: String,
    /// Free-form status string.
    pub status: String,
}

/// The `data` union carried by a notification envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NotificationData {
    /// See [`ParamChangeData`].
    ParamChange(ParamChangeData),
    /// See [`ConnectedClientData`].
    ConnectedClient(ConnectedClientData),
    /// See [`TransactionStatusData`].
    TransactionStatus(TransactionStatusData),
    /// See [`DeviceStatusData`].
    DeviceStatus(DeviceStatusData),
    /// See [`FactoryResetData`].
    FactoryReset(FactoryResetData),
    /// See [`FirmwareUpgradeData`].
    FirmwareUpgrade(FirmwareUpgradeData),
    /// See [`ComponentStatusData`].
    ComponentStatus(ComponentStatusData),
}

/// A notification envelope re-published to an uplink destination.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// The notification's type code.
    #[serde(rename = "type")]
    pub kind: NotificationType,
    /// Service name this gateway registered under the uplink as.
    pub source: String,
    /// Destination the notification is addressed to.
    pub destination: String,
    /// Milliseconds since the Unix epoch when the notification was built.
    pub timestamp: i64,
    /// The type-specific payload.
    pub data: NotificationData,
}

impl Notification {
    /// Build a [`NotificationType::ParamChange`] notification.
    #[must_use]
    pub fn param_change(
        source: String,
        destination: String,
        timestamp: i64,
        param_name: String,
        old_value: String,
        new_value: String,
        write_id: String,
    ) -> Self {
        Self {
            kind: NotificationType::ParamChange,
            source,
            destination,
            timestamp,
            data: NotificationData::ParamChange(ParamChangeData {
                param_name,
                old_value,
                new_value,
                write_id,
            }),
        }
    }

    /// Build a [`NotificationType::ConnectedClient`] notification.
    #[must_use]
    pub fn connected_client(
        source: String,
        destination: String,
        timestamp: i64,
        mac: String,
        status: ClientStatus,
    ) -> Self {
        Self {
            kind: NotificationType::ConnectedClient,
            source,
            destination,
            timestamp,
            data: NotificationData::ConnectedClient(ConnectedClientData { mac, status }),
        }
    }

    /// Build a [`NotificationType::TransactionStatus`] notification.
    #[must_use]
    pub fn transaction_status(
        source: String,
        destination: String,
        timestamp: i64,
        transaction_id: String,
        status: String,
        rolled_back: bool,
    ) -> Self {
        Self {
            kind: NotificationType::TransactionStatus,
            source,
            destination,
            timestamp,
            data: NotificationData::TransactionStatus(TransactionStatusData {
                transaction_id,
                status,
                rolled_back,
            }),
        }
    }

    /// Serialize to the JSON shape carried on the wire.
    ///
    /// # Panics
    /// Never: every field type here is a plain `Serialize` implementor with
    /// no fallible custom logic.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_change_notification_has_expected_shape() {
        let notification = Notification::param_change(
            "config".into(),
            "events-endpoint".into(),
            1_700_000_000_000,
            "Device.WiFi.Radio.1.Enable".into(),
            "false".into(),
            "true".into(),
            "w-1".into(),
        );
        let json = notification.to_json();
        assert_eq!(json["type"], 1);
        assert_eq!(json["data"]["paramName"], "Device.WiFi.Radio.1.Enable");
        assert_eq!(json["data"]["newValue"], "true");
        assert_eq!(json["destination"], "events-endpoint");
    }

    #[test]
    fn connected_client_serializes_status_as_pascal_case() {
        let notification = Notification::connected_client(
            "config".into(),
            "events-endpoint".into(),
            0,
            "AA:BB:CC:DD:EE:FF".into(),
            ClientStatus::Online,
        );
        let json = notification.to_json();
        assert_eq!(json["type"], 4);
        assert_eq!(json["data"]["status"], "Online");
    }

    #[test]
    fn transaction_status_notification_shape() {
        let notification = Notification::transaction_status(
            "config".into(),
            "events-endpoint".into(),
            0,
            "txn-1".into(),
            "Failure".into(),
            true,
        );
        let json = notification.to_json();
        assert_eq!(json["type"], 5);
        assert_eq!(json["data"]["transactionId"], "txn-1");
        assert_eq!(json["data"]["rolledBack"], true);
    }
}
