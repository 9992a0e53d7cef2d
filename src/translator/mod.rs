//! Protocol translator: dialect normalization, per-op dispatch, and
//! response shaping.
//!
//! Dual-dialect dispatch is centralized into a single normalization step
//! ([`normalize::normalize`]) producing one internal-dialect
//! [`RequestEnvelope`], rather than sniffing field presence scattered across
//! the per-op handlers. Response shaping for the webpa dialect is likewise
//! kept as a small set of pure functions in [`shape`], consuming the
//! internal-dialect response and the original request.

pub mod dispatch;
pub mod normalize;
pub mod shape;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::auth::{AuthContext, AuthorizationHook};
use crate::cache::ParameterCache;
use crate::parambus::{registry::SubscriptionRegistry, BusEvent, ParambusAdapter};

/// Errors raised while normalizing an inbound request, before any
/// parambus operation is attempted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TranslatorError {
    /// Malformed JSON payload, missing required field, or a field of the
    /// wrong type.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// The operation set, carrying each op's required fields in normalized
/// (internal-dialect) form.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// `GET`: one entry per requested name, in request order. Entries are
    /// raw JSON values so a non-string entry can be reported as a boundary
    /// failure rather than rejected at parse time.
    Get { params: Vec<serde_json::Value> },
    /// `SET`: write a single parameter from its string rendering.
    Set { param: String, value: String },
    /// `GET_ATTRIBUTES`: read a single parameter's notify/access pair.
    GetAttributes { param: String },
    /// `SET_ATTRIBUTES`: write a single parameter's notify/access pair.
    SetAttributes {
        param: String,
        notify: u8,
        access: Option<String>,
    },
    /// `ADD_ROW`: allocate a new row under a table.
    AddRow {
        table_name: String,
        row_data: Vec<RowFieldInput>,
    },
    /// `DELETE_ROW`: delete a single row by its fully-qualified path.
    DeleteRow { row_name: String },
    /// `REPLACE_ROWS`: replace a table's entire contents.
    ReplaceRows {
        table_name: String,
        table_data: Vec<Vec<RowFieldInput>>,
    },
    /// `SUBSCRIBE`: register interest in a parambus event name.
    Subscribe { event: String },
    /// `UNSUBSCRIBE`: release interest in a parambus event name.
    Unsubscribe { event: String },
    /// `TEST_AND_SET`: compare-and-set a single parameter.
    TestAndSet {
        param: String,
        old_value: String,
        new_value: String,
        data_type: u8,
    },
}

/// One field of a table row as carried on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct RowFieldInput {
    /// Field name, unqualified.
    pub name: String,
    /// String rendering of the field's value.
    pub value: String,
    /// Wire-type code the rendering is valid under.
    pub data_type: u8,
}

/// Which wire dialect an inbound request arrived in; governs whether the
/// outgoing response is shaped (webpa) or passed through unchanged
/// (internal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// The request used the internal `op`-discriminated schema.
    Internal,
    /// The request used the WebPA `command`-discriminated schema.
    Webpa,
}

/// A fully-normalized inbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    /// Request correlation id, falling back to the uplink transaction id
    /// when the decoded payload carried none.
    pub id: Option<String>,
    /// The normalized operation.
    pub op: Op,
    /// The dialect the request arrived in, governing response shaping.
    pub dialect: Dialect,
}

/// One `{v, t}` entry in a `GET` response's `results` map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultEntry {
    /// String rendering of the value.
    pub v: String,
    /// Wire-type code the rendering is valid under.
    pub t: u8,
}

/// A parameter's notify/access pair as carried in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttributesOutput {
    /// `0` (off) or `1` (on).
    pub notify: u8,
    /// `"readOnly"` / `"readWrite"` / `"writeOnly"`, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
}

/// The internal-dialect response envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseEnvelope {
    /// Echoes [`RequestEnvelope::id`]; absent when the request carried none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// HTTP-shaped status code.
    pub status: u16,
    /// Present only for `GET` responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<BTreeMap<String, Option<ResultEntry>>>,
    /// Present for error responses and some successful non-`GET` responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Present only for a successful `ADD_ROW`.
    #[serde(rename = "newRowName", skip_serializing_if = "Option::is_none")]
    pub new_row_name: Option<String>,
    /// Present only for `GET_ATTRIBUTES`/`SET_ATTRIBUTES` responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<AttributesOutput>,
}

/// Everything the translator needs to dispatch and (if required) shape a
/// single inbound request.
pub struct Translator {
    adapter: Arc<dyn ParambusAdapter>,
    cache: Arc<ParameterCache>,
    registry: Arc<SubscriptionRegistry>,
    event_sender: UnboundedSender<BusEvent>,
    authz: AuthorizationHook,
}

impl Translator {
    /// Build a translator wired to the given collaborators.
    #[must_use]
    pub const fn new(
        adapter: Arc<dyn ParambusAdapter>,
        cache: Arc<ParameterCache>,
        registry: Arc<SubscriptionRegistry>,
        event_sender: UnboundedSender<BusEvent>,
        authz: AuthorizationHook,
    ) -> Self {
        Self {
            adapter,
            cache,
            registry,
            event_sender,
            authz,
        }
    }

    /// Normalize, authorize, dispatch, and (for the webpa dialect) shape a
    /// single inbound JSON payload into its reply payload.
    ///
    /// `uplink_transaction_id` backstops `id` when the decoded payload
    /// carries none.
    ///
    /// # Errors
    /// Returns [`TranslatorError::InvalidRequest`] if `raw` cannot be
    /// normalized into a [`RequestEnvelope`] at all; once normalized, every
    /// other failure (authorization, adapter errors) is captured into the
    /// returned [`serde_json::Value`] as a shaped error response instead of
    /// propagating.
    pub async fn translate(
        &self,
        raw: &serde_json::Value,
        uplink_transaction_id: Option<&str>,
        context: &AuthContext,
    ) -> Result<serde_json::Value, TranslatorError> {
        let request = normalize::normalize(raw, uplink_transaction_id)?;
        let response = dispatch::dispatch(
            &request,
            self.adapter.as_ref(),
            &self.cache,
            &self.registry,
            &self.event_sender,
            &self.authz,
            context,
        )
        .await;
        let shaped = match request.dialect {
            Dialect::Internal => serde_json::to_value(&response)
                .unwrap_or_else(|_| serde_json::json!({"status": 500, "message": "encoding failure"})),
            Dialect::Webpa => shape::shape(&request.op, &response),
        };
        Ok(shaped)
    }
}
