//! Uplink session: the framed-message receive loop.
//!
//! The uplink framing library itself is treated as an external collaborator
//! that delivers and accepts framed messages, so [`Transport`] is the seam:
//! a trait object standing in for whatever real framing library a
//! deployment wires in, driven by a `tokio::select!` loop over the read
//! half and a shutdown signal — the framing itself isn't ours to implement,
//! only the session driving it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, instrument, warn};

use crate::auth::AuthContext;
use crate::translator::Translator;

/// The uplink message kinds this gateway recognizes. Anything outside this
/// set is preserved verbatim so it can be logged and dropped rather than
/// rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    /// A synchronous request awaiting a reply of the same kind.
    Request,
    /// A retrieve-style request, handled identically to `Request`.
    Retrieve,
    /// An asynchronous event, either inbound or an outbound notification.
    Event,
    /// Any other uplink-native kind; carried through unexamined.
    Other(String),
}

impl FrameKind {
    fn as_wire_str(&self) -> &str {
        match self {
            Self::Request => "request",
            Self::Retrieve => "retrieve",
            Self::Event => "event",
            Self::Other(raw) => raw,
        }
    }

    fn from_wire_str(raw: &str) -> Self {
        match raw {
            "request" => Self::Request,
            "retrieve" => Self::Retrieve,
            "event" => Self::Event,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Whether this frame's payload should be treated as a JSON request for
    /// the translator.
    #[must_use]
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, Self::Request | Self::Retrieve | Self::Event)
    }
}

/// A single framed uplink message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The message kind.
    pub kind: FrameKind,
    /// Originating peer identifier.
    pub source: String,
    /// Destination peer identifier.
    pub dest: String,
    /// Correlates a reply with its originating request.
    pub transaction_uuid: Option<String>,
    /// MIME-ish content type of `payload`; always JSON in this gateway.
    pub content_type: String,
    /// Raw payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Parse `payload` as a JSON value.
    ///
    /// # Errors
    /// Returns [`TransportError::Codec`] if `payload` is not valid JSON.
    pub fn payload_json(&self) -> Result<serde_json::Value, TransportError> {
        serde_json::from_slice(&self.payload).map_err(|err| TransportError::Codec(err.to_string()))
    }

    /// Build a reply frame of the same kind, with source/destination
    /// swapped and the transaction id preserved.
    ///
    /// For the `event` kind, `dest` falls back to `events_endpoint` when the
    /// original `source` was empty.
    #[must_use]
    pub fn reply(&self, service_name: &str, events_endpoint: &str, payload: Bytes) -> Self {
        let dest = if matches!(self.kind, FrameKind::Event) && self.source.is_empty() {
            events_endpoint.to_owned()
        } else {
            self.source.clone()
        };
        Self {
            kind: self.kind.clone(),
            source: service_name.to_owned(),
            dest,
            transaction_uuid: self.transaction_uuid.clone(),
            content_type: "application/json".to_owned(),
            payload,
        }
    }
}

/// Errors raised by a [`Transport`] implementor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport's underlying channel is closed.
    #[error("uplink transport closed")]
    Closed,
    /// An I/O failure occurred while reading or writing a frame.
    #[error("uplink I/O error: {0}")]
    Io(String),
    /// A frame could not be decoded or encoded.
    #[error("uplink codec error: {0}")]
    Codec(String),
}

/// The uplink transport contract. Real framing is an external collaborator
///; this crate ships only [`MockTransport`] as a reference/test
/// implementation.
#[async_trait]
pub trait Transport: Send {
    /// Wait up to `timeout` for the next inbound frame.
    ///
    /// Returns `Ok(None)` on a timeout elapsing with nothing received, so
    /// the session loop can re-check its shutdown flag without blocking
    /// indefinitely.
    ///
    /// # Errors
    /// Returns [`TransportError::Closed`] once the transport can never
    /// yield another frame, or [`TransportError::Io`]/[`TransportError::Codec`]
    /// on a malformed frame.
    async fn receive(&mut self, timeout: Duration) -> Result<Option<Frame>, TransportError>;

    /// Send an outbound frame.
    ///
    /// # Errors
    /// Returns [`TransportError::Io`] if the underlying write fails.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;
}

/// The line-delimited-JSON-over-stdio mock transport.
///
/// Each line is a JSON object `{kind, source, dest, transactionUuid?,
/// contentType?, payload}`, where `payload` is itself a nested JSON value
/// re-serialized to bytes on read.
pub struct MockTransport {
    reader: tokio::io::Lines<BufReader<tokio::io::Stdin>>,
    writer: tokio::io::Stdout,
}

#[derive(serde::Deserialize)]
struct WireFrame {
    kind: String,
    source: String,
    dest: String,
    #[serde(rename = "transactionUuid")]
    transaction_uuid: Option<String>,
    #[serde(rename = "contentType", default = "default_content_type")]
    content_type: String,
    payload: serde_json::Value,
}

fn default_content_type() -> String {
    "application/json".to_owned()
}

#[derive(serde::Serialize)]
struct WireFrameOut<'a> {
    kind: &'a str,
    source: &'a str,
    dest: &'a str,
    #[serde(rename = "transactionUuid", skip_serializing_if = "Option::is_none")]
    transaction_uuid: Option<&'a str>,
    #[serde(rename = "contentType")]
    content_type: &'a str,
    payload: serde_json::Value,
}

impl MockTransport {
    /// Build a transport over the process's standard streams.
    #[must_use]
    pub fn new() -> Self {
        use tokio::io::AsyncBufReadExt;
        Self {
            reader: BufReader::new(tokio::io::stdin()).lines(),
            writer: tokio::io::stdout(),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn receive(&mut self, timeout: Duration) -> Result<Option<Frame>, TransportError> {
        use tokio::io::AsyncBufReadExt as _;
        match tokio::time::timeout(timeout, self.reader.next_line()).await {
            Err(_elapsed) => Ok(None),
            Ok(Err(err)) => Err(TransportError::Io(err.to_string())),
            Ok(Ok(None)) => Err(TransportError::Closed),
            Ok(Ok(Some(line))) => {
                if line.trim().is_empty() {
                    return Ok(None);
                }
                let wire: WireFrame =
                    serde_json::from_str(&line).map_err(|err| TransportError::Codec(err.to_string()))?;
                let payload = serde_json::to_vec(&wire.payload)
                    .map_err(|err| TransportError::Codec(err.to_string()))?;
                Ok(Some(Frame {
                    kind: FrameKind::from_wire_str(&wire.kind),
                    source: wire.source,
                    dest: wire.dest,
                    transaction_uuid: wire.transaction_uuid,
                    content_type: wire.content_type,
                    payload: Bytes::from(payload),
                }))
            }
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let payload: serde_json::Value =
            serde_json::from_slice(&frame.payload).map_err(|err| TransportError::Codec(err.to_string()))?;
        let wire = WireFrameOut {
            kind: frame.kind.as_wire_str(),
            source: &frame.source,
            dest: &frame.dest,
            transaction_uuid: frame.transaction_uuid.as_deref(),
            content_type: &frame.content_type,
            payload,
        };
        let mut line = serde_json::to_vec(&wire).map_err(|err| TransportError::Codec(err.to_string()))?;
        line.push(b'\n');
        self.writer.write_all(&line).await.map_err(|err| TransportError::Io(err.to_string()))?;
        self.writer.flush().await.map_err(|err| TransportError::Io(err.to_string()))?;
        Ok(())
    }
}

/// Drives the receive loop against a [`Transport`], dispatching inbound
/// frames through a [`Translator`] and forwarding event-pipeline
/// notifications handed to it over `outbound`.
pub struct UplinkSession<T: Transport> {
    transport: T,
    translator: Arc<Translator>,
    service_name: String,
    events_endpoint: String,
    receive_timeout: Duration,
}

impl<T: Transport> UplinkSession<T> {
    /// Build a session over `transport`, dispatching through `translator`.
    #[must_use]
    pub const fn new(
        transport: T,
        translator: Arc<Translator>,
        service_name: String,
        events_endpoint: String,
        receive_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            translator,
            service_name,
            events_endpoint,
            receive_timeout,
        }
    }

    /// Run the receive loop until `shutdown` is set or the transport closes.
    ///
    /// Every inbound [`Frame`] whose kind [`FrameKind::is_dispatchable`] and
    /// whose payload is non-empty is normalized, translated, and replied to
    /// in-kind; any [`Frame`] arriving on `outbound` (built by
    /// the event pipeline, or any other internal emitter) is sent as-is.
    ///
    /// # Errors
    /// Returns a [`TransportError`] only once the transport itself can never
    /// produce or accept another frame; individual malformed requests never
    /// propagate out of this loop.
    #[instrument(skip(self, shutdown, outbound))]
    pub async fn run(
        mut self,
        shutdown: Arc<AtomicBool>,
        mut outbound: UnboundedReceiver<Frame>,
    ) -> Result<(), TransportError> {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                debug!("uplink session observed shutdown flag, exiting");
                return Ok(());
            }
            tokio::select! {
                received = self.transport.receive(self.receive_timeout) => {
                    match received {
                        Ok(Some(frame)) => self.handle_inbound(frame).await,
                        Ok(None) => {}
                        Err(TransportError::Closed) => return Ok(()),
                        Err(err) => {
                            warn!(error = %err, "uplink receive failed, dropping iteration");
                        }
                    }
                }
                Some(frame) = outbound.recv() => {
                    if let Err(err) = self.transport.send(frame).await {
                        warn!(error = %err, "failed to send outbound uplink frame");
                    }
                }
            }
        }
    }

    async fn handle_inbound(&mut self, frame: Frame) {
        if !frame.kind.is_dispatchable() || frame.payload.is_empty() {
            debug!(kind = ?frame.kind, "dropping non-dispatchable or empty uplink frame");
            return;
        }
        let payload = match frame.payload_json() {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "dropping uplink frame with unparseable payload");
                return;
            }
        };
        // Authentication is an upstream middleware hook;
        // this reference session presents an authenticated, unprivileged
        // context for every frame it dispatches.
        let context = AuthContext {
            authenticated: true,
            role: 0,
        };
        let shaped = match self
            .translator
            .translate(&payload, frame.transaction_uuid.as_deref(), &context)
            .await
        {
            Ok(shaped) => shaped,
            Err(err) => {
                warn!(error = %err, "translator rejected uplink frame");
                return;
            }
        };
        let Ok(reply_payload) = serde_json::to_vec(&shaped) else {
            warn!("failed to encode translator response");
            return;
        };
        let reply = frame.reply(&self.service_name, &self.events_endpoint, Bytes::from(reply_payload));
        if let Err(err) = self.transport.send(reply).await {
            warn!(error = %err, "failed to send uplink reply");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use tokio::sync::mpsc;

    use super::*;
    use crate::auth::AuthorizationHook;
    use crate::cache::ParameterCache;
    use crate::parambus::mock::MockParambusAdapter;
    use crate::parambus::registry::SubscriptionRegistry;

    struct ScriptedTransport {
        inbound: Mutex<VecDeque<Frame>>,
        sent: Arc<Mutex<Vec<Frame>>>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn receive(&mut self, _timeout: Duration) -> Result<Option<Frame>, TransportError> {
            let mut inbound = self.inbound.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            Ok(inbound.pop_front())
        }

        async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
            self.sent.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(frame);
            Ok(())
        }
    }

    fn frame(kind: FrameKind, payload: serde_json::Value) -> Frame {
        Frame {
            kind,
            source: "peer-1".into(),
            dest: "config".into(),
            transaction_uuid: Some("txn-1".into()),
            content_type: "application/json".into(),
            payload: Bytes::from(serde_json::to_vec(&payload).expect("payload encodes")),
        }
    }

    #[tokio::test]
    async fn request_frame_gets_a_same_kind_reply_with_swapped_endpoints() {
        let adapter = Arc::new(MockParambusAdapter::new());
        adapter.seed("Device.Name", "gateway-1", crate::codec::WireType::String).await;
        let cache = Arc::new(ParameterCache::new(64, Duration::from_secs(60), true));
        let registry = Arc::new(SubscriptionRegistry::new(adapter.clone()));
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let translator = Arc::new(Translator::new(adapter, cache, registry, event_tx, AuthorizationHook::new(vec![])));

        let request = frame(
            FrameKind::Request,
            serde_json::json!({"op": "GET", "params": ["Device.Name"]}),
        );
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = ScriptedTransport {
            inbound: Mutex::new(VecDeque::from([request])),
            sent: sent.clone(),
        };
        let session = UplinkSession::new(
            transport,
            translator,
            "config".into(),
            "events".into(),
            Duration::from_millis(10),
        );
        let shutdown = Arc::new(AtomicBool::new(false));
        let (_outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let shutdown_clone = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            shutdown_clone.store(true, Ordering::Relaxed);
        });
        session.run(shutdown, outbound_rx).await.expect("session exits cleanly");

        let sent = sent.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, FrameKind::Request);
        assert_eq!(sent[0].source, "config");
        assert_eq!(sent[0].dest, "peer-1");
        assert_eq!(sent[0].transaction_uuid, Some("txn-1".into()));
    }

    #[test]
    fn event_reply_falls_back_to_events_endpoint_when_source_is_empty() {
        let inbound = Frame {
            kind: FrameKind::Event,
            source: String::new(),
            dest: "config".into(),
            transaction_uuid: None,
            content_type: "application/json".into(),
            payload: Bytes::new(),
        };
        let reply = inbound.reply("config", "events-endpoint", Bytes::from_static(b"{}"));
        assert_eq!(reply.dest, "events-endpoint");
    }
}
