//! End-to-end scenarios exercising the translator, transaction engine, and
//! uplink session together against a seeded mock backend, rather than each
//! module's narrower unit slice.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use paramgate::auth::AuthContext;
use paramgate::codec::WireType;
use paramgate::engine::{EngineConfig, Transaction, TransactionEngine, TransactionParam, TransactionStatus, TxnOp};
use paramgate::parambus::ParambusAdapter;
use paramgate::uplink::{Frame, FrameKind, Transport, TransportError, UplinkSession};
use test_util::{mock_bus, reply_payload, request_line};

fn unauth() -> AuthContext {
    AuthContext::default()
}

#[tokio::test]
async fn internal_get_returns_value_and_wire_type() {
    let bus = mock_bus(&[("Device.DeviceInfo.ModelName", "Gateway-X1", WireType::String)]).await;

    let payload = serde_json::json!({"op": "GET", "params": ["Device.DeviceInfo.ModelName"]});
    let response = bus
        .translator
        .translate(&payload, None, &unauth())
        .await
        .expect("translate succeeds");

    assert_eq!(response["status"], 200);
    assert_eq!(response["results"]["Device.DeviceInfo.ModelName"]["v"], "Gateway-X1");
    assert_eq!(response["results"]["Device.DeviceInfo.ModelName"]["t"], 0);
}

#[tokio::test]
async fn webpa_get_with_single_name_stays_flat() {
    let bus = mock_bus(&[("Device.WiFi.SSID.1.Enable", "true", WireType::Bool)]).await;

    let payload = serde_json::json!({"command": "GET", "names": ["Device.WiFi.SSID.1.Enable"]});
    let response = bus
        .translator
        .translate(&payload, None, &unauth())
        .await
        .expect("translate succeeds");

    assert_eq!(response["parameters"][0]["name"], "Device.WiFi.SSID.1.Enable");
    assert_eq!(response["parameters"][0]["value"], "true");
}

#[tokio::test]
async fn webpa_set_requires_authentication_and_invalidates_cache_on_success() {
    let bus = mock_bus(&[("Device.WiFi.SSID.1.Enable", "false", WireType::Bool)]).await;

    let denied = bus
        .translator
        .translate(
            &serde_json::json!({"command": "SET", "parameters": [{"name": "Device.WiFi.SSID.1.Enable", "value": "true", "dataType": 3}]}),
            None,
            &unauth(),
        )
        .await
        .expect("translate succeeds even when denied");
    assert_eq!(denied["statusCode"], 403);

    let authed = AuthContext {
        authenticated: true,
        role: 0,
    };
    let granted = bus
        .translator
        .translate(
            &serde_json::json!({"command": "SET", "parameters": [{"name": "Device.WiFi.SSID.1.Enable", "value": "true", "dataType": 3}]}),
            None,
            &authed,
        )
        .await
        .expect("translate succeeds");
    assert_eq!(granted["statusCode"], 200);

    let value = bus.adapter.get("Device.WiFi.SSID.1.Enable").await.expect("value present");
    assert_eq!(value, "true");
}

#[tokio::test]
async fn add_row_then_delete_row_round_trips() {
    let bus = mock_bus(&[]).await;
    let authed = AuthContext {
        authenticated: true,
        role: 0,
    };

    let added = bus
        .translator
        .translate(
            &serde_json::json!({"op": "ADD_ROW", "tableName": "Device.Hosts.", "rowData": [{"name": "MAC", "value": "AA:BB:CC:DD:EE:FF", "dataType": 0}]}),
            None,
            &authed,
        )
        .await
        .expect("translate succeeds");
    assert_eq!(added["status"], 200);
    let row_name = added["newRowName"].as_str().expect("newRowName present").to_owned();

    let deleted = bus
        .translator
        .translate(&serde_json::json!({"op": "DELETE_ROW", "rowName": row_name}), None, &authed)
        .await
        .expect("translate succeeds");
    assert_eq!(deleted["status"], 200);
}

#[tokio::test]
async fn atomic_transaction_rolls_back_every_param_on_failure() {
    let bus = mock_bus(&[
        ("Device.A", "0", WireType::Int),
        ("Device.B", "0", WireType::Int),
    ])
    .await;

    let engine = TransactionEngine::new(
        bus.adapter.clone(),
        Arc::new(paramgate::cache::ParameterCache::new(64, Duration::from_secs(60), true)),
        EngineConfig {
            max_transaction_size: 8,
            transaction_timeout: Duration::from_secs(5),
            enable_rollback: true,
            enable_validation: true,
        },
    );

    let transaction = Transaction {
        id: "txn-rollback".into(),
        params: vec![
            TransactionParam {
                name: "Device.A".into(),
                value: Some("1".into()),
                wire_type: WireType::Int,
                op: TxnOp::Set,
            },
            TransactionParam {
                name: "Device.B".into(),
                value: Some("2".into()),
                wire_type: WireType::Int,
                op: TxnOp::Add,
            },
        ],
        atomic: true,
        user_id: "tester".into(),
        source: "test-suite".into(),
    };

    let outcome = engine.run(&transaction).await.expect("transaction runs");
    assert_eq!(outcome.status, TransactionStatus::Failure);
    assert!(outcome.rolled_back);

    let restored = bus.adapter.get("Device.A").await.expect("value present");
    assert_eq!(restored, "0", "rollback must restore the pre-transaction value");
}

struct LineTransport {
    inbound: std::collections::VecDeque<Frame>,
    sent: Arc<std::sync::Mutex<Vec<Frame>>>,
}

#[async_trait]
impl Transport for LineTransport {
    async fn receive(&mut self, _timeout: Duration) -> Result<Option<Frame>, TransportError> {
        Ok(self.inbound.pop_front())
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.sent.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(frame);
        Ok(())
    }
}

#[tokio::test]
async fn uplink_session_round_trips_a_request_through_the_translator() {
    let bus = mock_bus(&[("Device.DeviceInfo.ModelName", "Gateway-X1", WireType::String)]).await;

    let line = request_line("request", "peer-1", "config", Some("txn-42"), &serde_json::json!({"op": "GET", "params": ["Device.DeviceInfo.ModelName"]}));
    let payload: serde_json::Value = serde_json::from_str(&line).expect("line is valid JSON");
    let frame = Frame {
        kind: FrameKind::Request,
        source: payload["source"].as_str().expect("source").to_owned(),
        dest: payload["dest"].as_str().expect("dest").to_owned(),
        transaction_uuid: payload["transactionUuid"].as_str().map(ToOwned::to_owned),
        content_type: "application/json".into(),
        payload: bytes::Bytes::from(serde_json::to_vec(&payload["payload"]).expect("payload encodes")),
    };

    let sent = Arc::new(std::sync::Mutex::new(Vec::new()));
    let transport = LineTransport {
        inbound: std::collections::VecDeque::from([frame]),
        sent: sent.clone(),
    };
    let session = UplinkSession::new(transport, bus.translator.clone(), "config".into(), "events".into(), Duration::from_millis(10));

    let shutdown = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let (_outbound_tx, outbound_rx) = tokio::sync::mpsc::unbounded_channel();
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_clone.store(true, std::sync::atomic::Ordering::Relaxed);
    });
    session.run(shutdown, outbound_rx).await.expect("session exits cleanly");

    let sent = sent.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    assert_eq!(sent.len(), 1);
    let reply_line = serde_json::to_string(&serde_json::json!({
        "kind": "request",
        "source": sent[0].source,
        "dest": sent[0].dest,
        "transactionUuid": sent[0].transaction_uuid,
        "contentType": sent[0].content_type,
        "payload": serde_json::from_slice::<serde_json::Value>(&sent[0].payload).expect("payload is JSON"),
    }))
    .expect("encodes");
    let payload = reply_payload(&reply_line);
    assert_eq!(payload["results"]["Device.DeviceInfo.ModelName"]["v"], "Gateway-X1");
}
