//! Transaction engine: multi-parameter atomic/best-effort bulk operations
//! with snapshot/rollback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{instrument, warn};

use crate::cache::ParameterCache;
use crate::codec::{TypedValue, WireType};
use crate::notification::Notification;
use crate::parambus::ParambusAdapter;
use crate::uplink::{Frame, FrameKind};

/// Per-transaction operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnOp {
    /// Write a value, overwriting any existing one.
    Set,
    /// Read a value; never fails the transaction on a mismatch, only on a
    /// genuine adapter error.
    Get,
    /// Remove a table row addressed by `name`.
    Delete,
    /// Overwrite a value. Transaction-level params carry no nested row
    /// table, so this is synonymous with [`TxnOp::Set`] for this engine;
    /// see `DESIGN.md`.
    Replace,
    /// Create a parameter that must not already exist; 409 if it does.
    Add,
}

/// A single parameter targeted by a transaction.
#[derive(Debug, Clone)]
pub struct TransactionParam {
    /// Fully-qualified parameter (or row) name.
    pub name: String,
    /// New value, absent for [`TxnOp::Get`]/[`TxnOp::Delete`].
    pub value: Option<String>,
    /// Wire type the value is encoded under.
    pub wire_type: WireType,
    /// The operation to perform on this parameter.
    pub op: TxnOp,
}

/// A bulk configuration change touching multiple parameters at once.
#[derive(Debug, Clone)]
pub struct Transaction {
    /// Correlation id for this transaction.
    pub id: String,
    /// The parameters this transaction touches, in apply order.
    pub params: Vec<TransactionParam>,
    /// Whether a failure aborts and rolls back the whole transaction.
    pub atomic: bool,
    /// Caller identity, carried through to the notification callback.
    pub user_id: String,
    /// Originating uplink source, carried through to the notification
    /// callback.
    pub source: String,
}

/// Per-transaction engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Upper bound on `Transaction::params.len()`.
    pub max_transaction_size: usize,
    /// Wall-clock budget for the whole `apply` phase.
    pub transaction_timeout: Duration,
    /// Whether atomic transactions snapshot and roll back on failure.
    pub enable_rollback: bool,
    /// Whether the validate step runs at all.
    pub enable_validation: bool,
}

/// Errors raised during validation, before any parambus operation runs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransactionError {
    /// `params.len()` exceeds `max_transaction_size`.
    #[error("transaction too large: {0}")]
    TooLarge(String),
    /// A parameter failed a validation rule (empty name, missing value for
    /// a mutating op).
    #[error("invalid transaction parameter: {0}")]
    InvalidParam(String),
    /// Rollback itself failed after an atomic transaction aborted.
    #[error("rollback failed: {0}")]
    RollbackFailed(String),
}

/// Overall outcome classification. Atomic transactions terminate in
/// exactly one of {Success, Failure}; never Partial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Every parameter applied successfully.
    Success,
    /// Every parameter failed.
    Failure,
    /// A mix of successes and failures; only possible for non-atomic
    /// transactions.
    Partial,
}

/// Per-parameter outcome within a transaction.
#[derive(Debug, Clone)]
pub struct ParamResult {
    /// The parameter name this result is for.
    pub name: String,
    /// HTTP-shaped status code for this parameter's own outcome.
    pub status: u16,
    /// Human-readable detail, present on failure.
    pub message: Option<String>,
}

/// The complete result of running one [`Transaction`].
#[derive(Debug, Clone)]
pub struct TransactionOutcome {
    /// Originating transaction id.
    pub transaction_id: String,
    /// Overall classification.
    pub status: TransactionStatus,
    /// Per-parameter results, in apply order (truncated at the abort point
    /// for an atomic transaction).
    pub results: Vec<ParamResult>,
    /// Whether a rollback was performed.
    pub rolled_back: bool,
}

/// Where a completed transaction's outcome is published to, set via
/// [`TransactionEngine::with_notifier`].
struct Notifier {
    outbound: UnboundedSender<Frame>,
    service_name: String,
    events_endpoint: String,
}

/// Drives [`Transaction`]s against a [`ParambusAdapter`], invalidating the
/// [`ParameterCache`] for every parameter it touches.
pub struct TransactionEngine {
    adapter: Arc<dyn ParambusAdapter>,
    cache: Arc<ParameterCache>,
    config: EngineConfig,
    rolled_back_count: AtomicU64,
    notifier: Option<Notifier>,
}

impl TransactionEngine {
    /// Build an engine wired to the given adapter, cache, and
    /// configuration. No transaction-status notifications are published
    /// until [`Self::with_notifier`] attaches an outbound channel.
    #[must_use]
    pub fn new(adapter: Arc<dyn ParambusAdapter>, cache: Arc<ParameterCache>, config: EngineConfig) -> Self {
        Self {
            adapter,
            cache,
            config,
            rolled_back_count: AtomicU64::new(0),
            notifier: None,
        }
    }

    /// Attach an outbound uplink channel so every completed transaction
    /// publishes a [`NotificationType::TransactionStatus`](crate::notification::NotificationType::TransactionStatus)
    /// notification.
    #[must_use]
    pub fn with_notifier(mut self, outbound: UnboundedSender<Frame>, service_name: String, events_endpoint: String) -> Self {
        self.notifier = Some(Notifier {
            outbound,
            service_name,
            events_endpoint,
        });
        self
    }

    /// Total number of atomic transactions rolled back since this engine
    /// was built.
    #[must_use]
    pub fn rolled_back_count(&self) -> u64 {
        self.rolled_back_count.load(Ordering::Relaxed)
    }

    fn publish(&self, outcome: &TransactionOutcome) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let status = match outcome.status {
            TransactionStatus::Success => "Success",
            TransactionStatus::Failure => "Failure",
            TransactionStatus::Partial => "Partial",
        };
        let notification = Notification::transaction_status(
            notifier.service_name.clone(),
            notifier.events_endpoint.clone(),
            now_ms(),
            outcome.transaction_id.clone(),
            status.to_owned(),
            outcome.rolled_back,
        );
        let Ok(payload) = serde_json::to_vec(&notification.to_json()) else {
            warn!("failed to encode transaction status notification");
            return;
        };
        let frame = Frame {
            kind: FrameKind::Event,
            source: notifier.service_name.clone(),
            dest: notifier.events_endpoint.clone(),
            transaction_uuid: Some(outcome.transaction_id.clone()),
            content_type: "application/json".to_owned(),
            payload: Bytes::from(payload),
        };
        if notifier.outbound.send(frame).is_err() {
            warn!("uplink session outbound channel closed, dropping transaction status notification");
        }
    }

    /// Validate, snapshot (if applicable), apply, and (on atomic failure)
    /// roll back a transaction.
    #[instrument(skip(self, transaction), fields(transaction_id = %transaction.id, atomic = transaction.atomic))]
    pub async fn run(&self, transaction: &Transaction) -> Result<TransactionOutcome, TransactionError> {
        if self.config.enable_validation {
            self.validate(transaction)?;
        }

        let snapshot = if transaction.atomic && self.config.enable_rollback {
            Some(self.snapshot(transaction).await)
        } else {
            None
        };

        let apply = tokio::time::timeout(self.config.transaction_timeout, self.apply(transaction));
        let results = match apply.await {
            Ok(results) => results,
            Err(_) => {
                vec![ParamResult {
                    name: String::new(),
                    status: 408,
                    message: Some("transaction timed out".into()),
                }]
            }
        };

        let failures = results.iter().filter(|result| result.status >= 400).count();
        let successes = results.len() - failures;

        let (status, rolled_back) = if transaction.atomic {
            if failures == 0 {
                (TransactionStatus::Success, false)
            } else {
                if let Some(snapshot) = snapshot {
                    if let Err(err) = self.rollback(&snapshot).await {
                        warn!(transaction_id = %transaction.id, error = %err, "rollback failed");
                        return Err(err);
                    }
                    self.rolled_back_count.fetch_add(1, Ordering::Relaxed);
                    (TransactionStatus::Failure, true)
                } else {
                    (TransactionStatus::Failure, false)
                }
            }
        } else if failures == 0 {
            (TransactionStatus::Success, false)
        } else if successes == 0 {
            (TransactionStatus::Failure, false)
        } else {
            (TransactionStatus::Partial, false)
        };

        let outcome = TransactionOutcome {
            transaction_id: transaction.id.clone(),
            status,
            results,
            rolled_back,
        };
        self.publish(&outcome);
        Ok(outcome)
    }

    fn validate(&self, transaction: &Transaction) -> Result<(), TransactionError> {
        if transaction.params.len() > self.config.max_transaction_size {
            return Err(TransactionError::TooLarge(format!(
                "{} params exceeds max_transaction_size {}",
                transaction.params.len(),
                self.config.max_transaction_size
            )));
        }
        for param in &transaction.params {
            if param.name.is_empty() {
                return Err(TransactionError::InvalidParam("parameter name is empty".into()));
            }
            let requires_value = matches!(param.op, TxnOp::Set | TxnOp::Replace | TxnOp::Add);
            if requires_value && param.value.is_none() {
                return Err(TransactionError::InvalidParam(format!(
                    "{} requires a value for op {:?}",
                    param.name, param.op
                )));
            }
        }
        Ok(())
    }

    async fn snapshot(&self, transaction: &Transaction) -> Vec<(String, Option<String>)> {
        let mut backup = Vec::with_capacity(transaction.params.len());
        for param in &transaction.params {
            let previous = self.adapter.get(&param.name).await.ok();
            backup.push((param.name.clone(), previous));
        }
        backup
    }

    async fn apply(&self, transaction: &Transaction) -> Vec<ParamResult> {
        let mut results = Vec::with_capacity(transaction.params.len());
        for param in &transaction.params {
            let result = self.apply_one(param).await;
            let aborted_atomic = transaction.atomic && result.status >= 400;
            results.push(result);
            if aborted_atomic {
                break;
            }
        }
        results
    }

    async fn apply_one(&self, param: &TransactionParam) -> ParamResult {
        let outcome = match param.op {
            TxnOp::Get => self.adapter.get_typed(&param.name).await.map(|_| ()),
            TxnOp::Delete => self.adapter.delete_table_row(&param.name).await,
            TxnOp::Set | TxnOp::Replace => self.set_value(param).await,
            TxnOp::Add => self.add_value(param).await,
        };
        match outcome {
            Ok(()) => {
                if matches!(param.op, TxnOp::Set | TxnOp::Replace | TxnOp::Add | TxnOp::Delete) {
                    self.cache.invalidate(&param.name);
                }
                ParamResult {
                    name: param.name.clone(),
                    status: 200,
                    message: None,
                }
            }
            Err(err) => {
                let gateway_err: crate::error::GatewayError = err.into();
                ParamResult {
                    name: param.name.clone(),
                    status: gateway_err.status_code(),
                    message: Some(gateway_err.to_string()),
                }
            }
        }
    }

    async fn set_value(&self, param: &TransactionParam) -> Result<(), crate::parambus::AdapterError> {
        let rendering = param.value.clone().unwrap_or_default();
        self.adapter
            .set_typed(
                &param.name,
                &TypedValue {
                    rendering,
                    wire_type: param.wire_type,
                },
            )
            .await
    }

    async fn add_value(&self, param: &TransactionParam) -> Result<(), crate::parambus::AdapterError> {
        if self.adapter.get(&param.name).await.is_ok() {
            return Err(crate::parambus::AdapterError::AlreadyExists(param.name.clone()));
        }
        self.set_value(param).await
    }

    async fn rollback(&self, snapshot: &[(String, Option<String>)]) -> Result<(), TransactionError> {
        for (name, previous) in snapshot {
            if let Some(previous) = previous {
                self.adapter
                    .set(name, previous)
                    .await
                    .map_err(|err| TransactionError::RollbackFailed(format!("{name}: {err}")))?;
                self.cache.invalidate(name);
            }
        }
        Ok(())
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

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::parambus::mock::MockParambusAdapter;

    fn default_config() -> EngineConfig {
        EngineConfig {
            max_transaction_size: 16,
            transaction_timeout: Duration::from_secs(5),
            enable_rollback: true,
            enable_validation: true,
        }
    }

    fn set_param(name: &str, value: &str) -> TransactionParam {
        TransactionParam {
            name: name.to_owned(),
            value: Some(value.to_owned()),
            wire_type: WireType::String,
            op: TxnOp::Set,
        }
    }

    #[tokio::test]
    async fn atomic_bulk_set_rolls_back_all_three_on_second_failure() {
        let adapter = Arc::new(MockParambusAdapter::new());
        adapter.set("Device.A", "a0").await.expect("seed A");
        adapter.set("Device.B", "b0").await.expect("seed B");
        adapter.set("Device.C", "c0").await.expect("seed C");
        let cache = Arc::new(ParameterCache::new(64, Duration::from_secs(60), true));
        let engine = TransactionEngine::new(adapter.clone(), cache, default_config());

        let transaction = Transaction {
            id: "txn-1".into(),
            atomic: true,
            user_id: "tester".into(),
            source: "uplink".into(),
            params: vec![
                set_param("Device.A", "a1"),
                TransactionParam {
                    name: "Device.Missing".into(),
                    value: Some("x".into()),
                    wire_type: WireType::String,
                    op: TxnOp::Delete,
                },
                set_param("Device.C", "c1"),
            ],
        };

        let outcome = engine.run(&transaction).await.expect("run completes");
        assert_eq!(outcome.status, TransactionStatus::Failure);
        assert!(outcome.rolled_back);
        assert_eq!(engine.rolled_back_count(), 1);
        assert_eq!(adapter.get("Device.A").await.expect("readable"), "a0");
        assert_eq!(adapter.get("Device.B").await.expect("readable"), "b0");
    }

    #[tokio::test]
    async fn non_atomic_mixed_result_is_partial() {
        let adapter = Arc::new(MockParambusAdapter::new());
        adapter.set("Device.A", "a0").await.expect("seed A");
        let cache = Arc::new(ParameterCache::new(64, Duration::from_secs(60), true));
        let engine = TransactionEngine::new(adapter, cache, default_config());
        let transaction = Transaction {
            id: "txn-2".into(),
            atomic: false,
            user_id: "tester".into(),
            source: "uplink".into(),
            params: vec![
                set_param("Device.A", "a1"),
                TransactionParam {
                    name: "Device.Missing".into(),
                    value: Some("x".into()),
                    wire_type: WireType::String,
                    op: TxnOp::Delete,
                },
            ],
        };
        let outcome = engine.run(&transaction).await.expect("run completes");
        assert_eq!(outcome.status, TransactionStatus::Partial);
        assert!(!outcome.rolled_back);
    }

    #[tokio::test]
    async fn add_on_existing_parameter_conflicts() {
        let adapter = Arc::new(MockParambusAdapter::new());
        adapter.set("Device.A", "a0").await.expect("seed A");
        let cache = Arc::new(ParameterCache::new(64, Duration::from_secs(60), true));
        let engine = TransactionEngine::new(adapter, cache, default_config());
        let transaction = Transaction {
            id: "txn-3".into(),
            atomic: false,
            user_id: "tester".into(),
            source: "uplink".into(),
            params: vec![TransactionParam {
                name: "Device.A".into(),
                value: Some("a1".into()),
                wire_type: WireType::String,
                op: TxnOp::Add,
            }],
        };
        let outcome = engine.run(&transaction).await.expect("run completes");
        assert_eq!(outcome.results[0].status, 409);
    }

    #[tokio::test]
    async fn oversized_transaction_is_rejected_before_any_apply() {
        let adapter = Arc::new(MockParambusAdapter::new());
        let cache = Arc::new(ParameterCache::new(64, Duration::from_secs(60), true));
        let mut config = default_config();
        config.max_transaction_size = 1;
        let engine = TransactionEngine::new(adapter, cache, config);
        let transaction = Transaction {
            id: "txn-4".into(),
            atomic: false,
            user_id: "tester".into(),
            source: "uplink".into(),
            params: vec![set_param("Device.A", "a1"), set_param("Device.B", "b1")],
        };
        let err = engine.run(&transaction).await.expect_err("too large");
        assert!(matches!(err, TransactionError::TooLarge(_)));
    }

    #[tokio::test]
    async fn successful_run_publishes_transaction_status_notification() {
        let adapter = Arc::new(MockParambusAdapter::new());
        adapter.set("Device.A", "a0").await.expect("seed A");
        let cache = Arc::new(ParameterCache::new(64, Duration::from_secs(60), true));
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        let engine = TransactionEngine::new(adapter, cache, default_config()).with_notifier(
            outbound_tx,
            "config".into(),
            "events-endpoint".into(),
        );
        let transaction = Transaction {
            id: "txn-5".into(),
            atomic: true,
            user_id: "tester".into(),
            source: "uplink".into(),
            params: vec![set_param("Device.A", "a1")],
        };

        let outcome = engine.run(&transaction).await.expect("run completes");
        assert_eq!(outcome.status, TransactionStatus::Success);

        let frame = outbound_rx.try_recv().expect("notification emitted");
        let payload: serde_json::Value = serde_json::from_slice(&frame.payload).expect("valid JSON");
        assert_eq!(payload["type"], 5);
        assert_eq!(payload["data"]["transactionId"], "txn-5");
        assert_eq!(payload["data"]["status"], "Success");
    }
}
