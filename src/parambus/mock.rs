//! In-memory [`ParambusAdapter`] used as the reference backend for tests and
//! for `mode = mock` deployments, giving the rest of the crate something
//! concrete to run against without a live collaborator.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{mpsc::UnboundedSender, Mutex};

use super::{
    Access, AdapterError, Attribute, BusEvent, Notify, ParambusAdapter, Row, TestAndSetOutcome,
};
use crate::codec::{TypedValue, WireType};

#[derive(Default)]
struct Store {
    open: bool,
    params: HashMap<String, TypedValue>,
    attributes: HashMap<String, Attribute>,
    /// Table path → ordered list of live row paths.
    tables: HashMap<String, Vec<String>>,
    /// Table path → next row instance number to allocate.
    next_instance: HashMap<String, u64>,
    subscriptions: HashMap<String, UnboundedSender<BusEvent>>,
}

/// An in-memory stand-in for a real parambus connection.
///
/// All state lives behind one coarse `tokio::sync::Mutex` — this adapter's
/// state is small and sees no meaningful contention, so a single lock is
/// simpler than sharding it.
#[derive(Default)]
pub struct MockParambusAdapter {
    store: Mutex<Store>,
}

impl MockParambusAdapter {
    /// Build an adapter with no parameters and no open handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a parameter's value and wire type directly, bypassing `set`.
    /// Test-only convenience; panics are acceptable here since this runs
    /// only from fixture setup, never from request handling.
    pub async fn seed(&self, name: &str, rendering: &str, wire_type: WireType) {
        let mut store = self.store.lock().await;
        store.params.insert(
            name.to_owned(),
            TypedValue {
                rendering: rendering.to_owned(),
                wire_type,
            },
        );
    }

    /// Whether `event_name` currently has a live mock subscription. Test-only.
    pub async fn is_subscribed(&self, event_name: &str) -> bool {
        self.store.lock().await.subscriptions.contains_key(event_name)
    }

    /// Push a [`BusEvent`] to whatever subscriber is registered for
    /// `event_name`, if any. Used by tests to simulate the bus's background
    /// callback thread.
    pub async fn emit(&self, event_name: &str, event: BusEvent) {
        let store = self.store.lock().await;
        if let Some(sender) = store.subscriptions.get(event_name) {
            let _ignored = sender.send(event);
        }
    }
}

#[async_trait]
impl ParambusAdapter for MockParambusAdapter {
    async fn open(&self, _component_name: &str) -> Result<(), AdapterError> {
        let mut store = self.store.lock().await;
        if store.open {
            return Err(AdapterError::Internal("bus handle already open".into()));
        }
        store.open = true;
        Ok(())
    }

    async fn close(&self) -> Result<(), AdapterError> {
        let mut store = self.store.lock().await;
        if !store.open {
            return Err(AdapterError::NotConnected);
        }
        store.open = false;
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<String, AdapterError> {
        self.get_typed(name).await.map(|value| value.rendering)
    }

    async fn get_typed(&self, name: &str) -> Result<TypedValue, AdapterError> {
        let store = self.store.lock().await;
        store
            .params
            .get(name)
            .cloned()
            .ok_or_else(|| AdapterError::NotFound(name.to_owned()))
    }

    async fn set(&self, name: &str, value: &str) -> Result<(), AdapterError> {
        let wire_type = {
            let store = self.store.lock().await;
            store
                .params
                .get(name)
                .map_or(WireType::String, |existing| existing.wire_type)
        };
        self.set_typed(
            name,
            &TypedValue {
                rendering: value.to_owned(),
                wire_type,
            },
        )
        .await
    }

    async fn set_typed(&self, name: &str, value: &TypedValue) -> Result<(), AdapterError> {
        let mut store = self.store.lock().await;
        store.params.insert(name.to_owned(), value.clone());
        Ok(())
    }

    async fn expand_wildcard(&self, prefix: &str) -> Result<Vec<String>, AdapterError> {
        let store = self.store.lock().await;
        let mut children: Vec<String> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let all_names = store
            .params
            .keys()
            .chain(store.tables.values().flatten())
            .filter_map(|name| name.strip_prefix(prefix));
        for remainder in all_names {
            if remainder.is_empty() {
                continue;
            }
            let segment_end = remainder.find('.').map_or(remainder.len(), |idx| idx + 1);
            let child = format!("{prefix}{}", &remainder[..segment_end]);
            if seen.insert(child.clone()) {
                children.push(child);
            }
        }
        Ok(children)
    }

    async fn add_table_row(&self, table_path: &str, row: &Row) -> Result<String, AdapterError> {
        let mut store = self.store.lock().await;
        let instance = store.next_instance.entry(table_path.to_owned()).or_insert(1);
        let row_path = format!("{table_path}{instance}.");
        *instance += 1;
        store
            .tables
            .entry(table_path.to_owned())
            .or_default()
            .push(row_path.clone());
        for field in row {
            store.params.insert(
                format!("{row_path}{}", field.name),
                TypedValue {
                    rendering: field.value.clone(),
                    wire_type: field.wire_type,
                },
            );
        }
        Ok(row_path)
    }

    async fn delete_table_row(&self, row_path: &str) -> Result<(), AdapterError> {
        let mut store = self.store.lock().await;
        let mut found = false;
        for rows in store.tables.values_mut() {
            if let Some(pos) = rows.iter().position(|existing| existing == row_path) {
                rows.remove(pos);
                found = true;
                break;
            }
        }
        if !found {
            return Err(AdapterError::NotFound(row_path.to_owned()));
        }
        store.params.retain(|name, _| !name.starts_with(row_path));
        Ok(())
    }

    async fn replace_table(&self, table_path: &str, rows: &[Row]) -> Result<(), AdapterError> {
        let existing_rows = {
            let store = self.store.lock().await;
            store.tables.get(table_path).cloned().unwrap_or_default()
        };
        for row_path in existing_rows {
            self.delete_table_row(&row_path).await?;
        }
        for row in rows {
            self.add_table_row(table_path, row).await?;
        }
        Ok(())
    }

    async fn get_attributes(&self, name: &str) -> Result<Attribute, AdapterError> {
        let store = self.store.lock().await;
        if !store.params.contains_key(name) {
            return Err(AdapterError::NotFound(name.to_owned()));
        }
        Ok(store.attributes.get(name).copied().unwrap_or(Attribute {
            notify: Notify::Off,
            access: Some(Access::ReadWrite),
        }))
    }

    async fn set_attributes(&self, name: &str, attribute: Attribute) -> Result<(), AdapterError> {
        let mut store = self.store.lock().await;
        if !store.params.contains_key(name) {
            return Err(AdapterError::NotFound(name.to_owned()));
        }
        store.attributes.insert(name.to_owned(), attribute);
        Ok(())
    }

    async fn subscribe_raw(
        &self,
        event_name: &str,
        sender: UnboundedSender<BusEvent>,
    ) -> Result<(), AdapterError> {
        let mut store = self.store.lock().await;
        store.subscriptions.insert(event_name.to_owned(), sender);
        Ok(())
    }

    async fn unsubscribe_raw(&self, event_name: &str) -> Result<(), AdapterError> {
        let mut store = self.store.lock().await;
        store.subscriptions.remove(event_name);
        Ok(())
    }

    async fn test_and_set(
        &self,
        name: &str,
        expected: &str,
        new_value: &TypedValue,
    ) -> Result<TestAndSetOutcome, AdapterError> {
        let mut store = self.store.lock().await;
        let current = store
            .params
            .get(name)
            .ok_or_else(|| AdapterError::NotFound(name.to_owned()))?;
        if current.rendering != expected {
            return Ok(TestAndSetOutcome::PreconditionFailed);
        }
        store.params.insert(name.to_owned(), new_value.clone());
        Ok(TestAndSetOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::parambus::RowField;

    #[tokio::test]
    async fn open_twice_fails() {
        let adapter = MockParambusAdapter::new();
        adapter.open("gateway").await.expect("first open succeeds");
        let err = adapter.open("gateway").await.expect_err("second open must fail");
        assert!(matches!(err, AdapterError::Internal(_)));
    }

    #[tokio::test]
    async fn get_missing_parameter_is_not_found() {
        let adapter = MockParambusAdapter::new();
        let err = adapter.get("Device.Missing").await.expect_err("must be not found");
        assert_eq!(err, AdapterError::NotFound("Device.Missing".into()));
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let adapter = MockParambusAdapter::new();
        adapter
            .set_typed(
                "Device.Name",
                &TypedValue {
                    rendering: "gateway-1".into(),
                    wire_type: WireType::String,
                },
            )
            .await
            .expect("set succeeds");
        let value = adapter.get_typed("Device.Name").await.expect("get succeeds");
        assert_eq!(value.rendering, "gateway-1");
        assert_eq!(value.wire_type, WireType::String);
    }

    #[rstest]
    #[tokio::test]
    async fn expand_wildcard_on_empty_prefix_is_empty_success() {
        let adapter = MockParambusAdapter::new();
        let children = adapter
            .expand_wildcard("Device.Unused.")
            .await
            .expect("empty expansion is success");
        assert!(children.is_empty());
    }

    #[tokio::test]
    async fn expand_wildcard_returns_immediate_children_only() {
        let adapter = MockParambusAdapter::new();
        adapter
            .set("Device.WiFi.Radio.1.Channel", "6")
            .await
            .expect("set succeeds");
        adapter
            .set("Device.WiFi.Radio.2.Channel", "11")
            .await
            .expect("set succeeds");
        let mut children = adapter
            .expand_wildcard("Device.WiFi.Radio.")
            .await
            .expect("expansion succeeds");
        children.sort();
        assert_eq!(children, vec!["Device.WiFi.Radio.1.", "Device.WiFi.Radio.2."]);
    }

    #[tokio::test]
    async fn add_then_delete_table_row() {
        let adapter = MockParambusAdapter::new();
        let row = vec![RowField {
            name: "SSID".into(),
            value: "guest".into(),
            wire_type: WireType::String,
        }];
        let row_path = adapter
            .add_table_row("Device.WiFi.SSID.", &row)
            .await
            .expect("add succeeds");
        assert_eq!(row_path, "Device.WiFi.SSID.1.");
        assert_eq!(
            adapter.get(&format!("{row_path}SSID")).await.expect("field readable"),
            "guest"
        );
        adapter.delete_table_row(&row_path).await.expect("delete succeeds");
        assert!(adapter.get(&format!("{row_path}SSID")).await.is_err());
    }

    #[tokio::test]
    async fn test_and_set_fails_precondition_on_mismatch() {
        let adapter = MockParambusAdapter::new();
        adapter.set("Device.Name", "gateway-1").await.expect("set succeeds");
        let outcome = adapter
            .test_and_set(
                "Device.Name",
                "wrong-value",
                &TypedValue {
                    rendering: "gateway-2".into(),
                    wire_type: WireType::String,
                },
            )
            .await
            .expect("call succeeds");
        assert_eq!(outcome, TestAndSetOutcome::PreconditionFailed);
        assert_eq!(adapter.get("Device.Name").await.expect("readable"), "gateway-1");
    }

    #[tokio::test]
    async fn test_and_set_applies_on_match() {
        let adapter = MockParambusAdapter::new();
        adapter.set("Device.Name", "gateway-1").await.expect("set succeeds");
        let outcome = adapter
            .test_and_set(
                "Device.Name",
                "gateway-1",
                &TypedValue {
                    rendering: "gateway-2".into(),
                    wire_type: WireType::String,
                },
            )
            .await
            .expect("call succeeds");
        assert_eq!(outcome, TestAndSetOutcome::Applied);
        assert_eq!(adapter.get("Device.Name").await.expect("readable"), "gateway-2");
    }
}
