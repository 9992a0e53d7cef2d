//! Shared fixtures for `paramgate` integration tests.
//!
//! Shared setup helpers pulled out of the main crate's `tests/` tree so
//! every integration test doesn't rebuild the same scaffolding: a mock
//! parambus builder, sample configuration fixtures, and a pair of
//! JSON-line helpers for driving the uplink session's mock transport.

use std::sync::Arc;

use ortho_config::OrthoConfig;
use paramgate::auth::AuthorizationHook;
use paramgate::cache::ParameterCache;
use paramgate::codec::WireType;
use paramgate::config::AppConfig;
use paramgate::parambus::mock::MockParambusAdapter;
use paramgate::parambus::registry::SubscriptionRegistry;
use paramgate::translator::Translator;
use tokio::sync::mpsc::UnboundedReceiver;

/// Build an [`AppConfig`] with every field at its documented default,
/// parsed the same way the binary parses its own `std::env::args()`, so
/// fixture config never drifts from what a real deployment sees.
///
/// # Panics
/// Panics if the default configuration somehow fails to load — a fixture
/// bug, never a caller error.
#[must_use]
pub fn sample_config() -> AppConfig {
    AppConfig::load_from_iter(["paramgated"]).expect("default configuration loads")
}

/// A seeded [`MockParambusAdapter`] plus the collaborators a
/// [`Translator`] needs, assembled the way [`paramgate::service::Service::init`]
/// assembles them but without the process-wide singleton, so a test can
/// build several independent instances in one process.
pub struct MockBus {
    /// The seeded adapter, kept around so a test can assert on post-request
    /// state (a row's fields, a subscription's refcount) after exercising
    /// the translator.
    pub adapter: Arc<MockParambusAdapter>,
    /// The translator under test, wired to `adapter` with a fresh cache and
    /// subscription registry.
    pub translator: Arc<Translator>,
    /// Every [`paramgate::parambus::BusEvent`] the translator's subscribe/
    /// unsubscribe path would hand to an event pipeline, for a test to
    /// drain and assert on directly instead of wiring a full pipeline.
    pub bus_events: UnboundedReceiver<paramgate::parambus::BusEvent>,
}

/// Builds a [`MockBus`] from a list of `(name, rendering, wire_type)`
/// seed values, opening the adapter so it's immediately usable.
///
/// # Panics
/// Panics if the mock adapter's `open` call fails — it never does for a
/// freshly constructed adapter, so this would only fire on a fixture bug.
pub async fn mock_bus(seed: &[(&str, &str, WireType)]) -> MockBus {
    let adapter = Arc::new(MockParambusAdapter::new());
    adapter.open("test-component").await.expect("mock adapter opens");
    for (name, rendering, wire_type) in seed {
        adapter.seed(name, rendering, *wire_type).await;
    }

    let cache = Arc::new(ParameterCache::new(1_024, std::time::Duration::from_secs(300), true));
    let registry = Arc::new(SubscriptionRegistry::new(adapter.clone()));
    let (event_tx, bus_events) = tokio::sync::mpsc::unbounded_channel();
    let translator = Arc::new(Translator::new(
        adapter.clone(),
        cache,
        registry,
        event_tx,
        AuthorizationHook::new(vec![]),
    ));

    MockBus {
        adapter,
        translator,
        bus_events,
    }
}

/// Encode a request as the single-line JSON frame
/// [`paramgate::uplink::MockTransport`] expects on stdin: `{kind, source,
/// dest, transactionUuid?, contentType, payload}`.
///
/// # Panics
/// Panics if `payload` somehow fails to serialize — callers pass
/// [`serde_json::Value`]s built from literals or `serde_json::json!`, which
/// never fail to encode.
#[must_use]
pub fn request_line(kind: &str, source: &str, dest: &str, transaction_uuid: Option<&str>, payload: &serde_json::Value) -> String {
    let mut frame = serde_json::json!({
        "kind": kind,
        "source": source,
        "dest": dest,
        "contentType": "application/json",
        "payload": payload,
    });
    if let Some(uuid) = transaction_uuid {
        frame["transactionUuid"] = serde_json::Value::String(uuid.to_owned());
    }
    frame.to_string()
}

/// Parse a line emitted by [`paramgate::uplink::MockTransport::send`] back
/// into its `payload` field, the shape most integration tests want to
/// assert on.
///
/// # Panics
/// Panics if `line` is not the JSON frame shape `MockTransport` emits, or
/// carries no `payload` field — either is a test-authoring bug, not a
/// runtime condition to recover from.
#[must_use]
pub fn reply_payload(line: &str) -> serde_json::Value {
    let frame: serde_json::Value = serde_json::from_str(line).expect("reply line is valid JSON");
    frame
        .get("payload")
        .cloned()
        .expect("reply frame carries a payload field")
}
