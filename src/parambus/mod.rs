//! The parambus adapter boundary.
//!
//! [`ParambusAdapter`] is the single seam between the gateway and the local
//! hierarchical parameter bus. It is defined as an `async_trait` object
//! (`Arc<dyn ParambusAdapter>`) so the translator, transaction engine, and
//! event pipeline can all share one bus handle without knowing whether it is
//! backed by a real bus client or, as in this crate, [`mock::MockParambus`].
//!
//! Event delivery never calls back into the adapter synchronously — the
//! background callback thread the bus library owns only ever pushes a
//! [`BusEvent`] onto a channel (see [`crate::events`]), avoiding re-entrancy
//! through the bus library.

pub mod mock;
pub mod registry;

use async_trait::async_trait;
use thiserror::Error;

use crate::codec::{TypedValue, WireType};

/// A single field within a table row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowField {
    /// Field name (unqualified, relative to the row).
    pub name: String,
    /// String rendering of the field's value.
    pub value: String,
    /// Wire type the rendering is valid under.
    pub wire_type: WireType,
}

/// An ordered sequence of fields making up one table row.
pub type Row = Vec<RowField>;

/// Notification setting on a parameter attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notify {
    /// Value-change notifications are disabled for this parameter.
    Off,
    /// Value-change notifications are enabled for this parameter.
    On,
}

/// Access mode on a parameter attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// The parameter may only be read.
    ReadOnly,
    /// The parameter may be read and written.
    ReadWrite,
    /// The parameter may only be written.
    WriteOnly,
}

/// A parameter's notify/access attribute pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute {
    /// Whether value-change notification is enabled.
    pub notify: Notify,
    /// The parameter's access mode, when known.
    pub access: Option<Access>,
}

/// An event delivered by the parambus's background callback thread.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    /// A subscribed parameter's value changed.
    ValueChanged {
        /// Fully-qualified parameter name.
        name: String,
        /// New value as reported by the bus.
        new_value: String,
        /// Bus-supplied write identifier, if the event carried one.
        write_id: Option<String>,
    },
    /// A row was created under a subscribed table.
    RowCreated {
        /// Table path the row was created under.
        table_path: String,
        /// Fully-qualified path of the new row.
        row_path: String,
    },
    /// A row was deleted under a subscribed table.
    RowDeleted {
        /// Table path the row was deleted under.
        table_path: String,
        /// Fully-qualified path of the deleted row.
        row_path: String,
    },
}

/// Errors the parambus adapter maps from bus-native failure codes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// The named parameter or row does not exist.
    #[error("element not found: {0}")]
    NotFound(String),
    /// The bus denied access to the named resource.
    #[error("access denied: {0}")]
    AccessDenied(String),
    /// The bus call did not complete within its timeout.
    #[error("bus timeout")]
    Timeout,
    /// The bus rejected the value during coercion.
    #[error("invalid value: {0}")]
    InvalidValue(String),
    /// An `ADD_ROW`-style operation targeted an existing parameter.
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// `open` was never called, or `close` already tore down the handle.
    #[error("bus not connected")]
    NotConnected,
    /// The bus reported it is busy/out of resources.
    #[error("bus busy")]
    Busy,
    /// Any other bus-native failure.
    #[error("internal bus error: {0}")]
    Internal(String),
}

/// The parambus adapter contract.
///
/// Implementors own exactly one bus handle: `open`/`close` enforce the
/// at-most-one-handle-per-process lifecycle rule.
#[async_trait]
pub trait ParambusAdapter: Send + Sync {
    /// Open the bus handle under the given component name.
    ///
    /// # Errors
    /// Returns [`AdapterError::Internal`] if a handle is already open, or any
    /// bus-native connection failure.
    async fn open(&self, component_name: &str) -> Result<(), AdapterError>;

    /// Close the bus handle.
    ///
    /// # Errors
    /// Returns [`AdapterError::NotConnected`] if no handle is open.
    async fn close(&self) -> Result<(), AdapterError>;

    /// Read a parameter's value as a plain string.
    ///
    /// # Errors
    /// Returns [`AdapterError::NotFound`] if `name` does not exist, or any
    /// other bus-native failure.
    async fn get(&self, name: &str) -> Result<String, AdapterError>;

    /// Read a parameter's value together with its wire type.
    ///
    /// # Errors
    /// See [`ParambusAdapter::get`].
    async fn get_typed(&self, name: &str) -> Result<TypedValue, AdapterError>;

    /// Write a parameter from its string rendering; the bus performs
    /// coercion or rejects the value.
    ///
    /// # Errors
    /// Returns [`AdapterError::InvalidValue`] if the bus rejects the
    /// coercion, or any other bus-native failure.
    async fn set(&self, name: &str, value: &str) -> Result<(), AdapterError>;

    /// Write a parameter from a pre-typed value, selecting the bus setter
    /// appropriate to its wire type.
    ///
    /// # Errors
    /// See [`ParambusAdapter::set`].
    async fn set_typed(&self, name: &str, value: &TypedValue) -> Result<(), AdapterError>;

    /// Enumerate the fully-qualified names of a group wildcard's children.
    ///
    /// `prefix` must end in `.`. An empty result is success, not failure.
    ///
    /// # Errors
    /// Returns [`AdapterError::Internal`] only if the expansion call itself
    /// failed at the bus level; a prefix with no children is `Ok(vec![])`.
    async fn expand_wildcard(&self, prefix: &str) -> Result<Vec<String>, AdapterError>;

    /// Allocate a new row under `table_path` and set its fields.
    ///
    /// Returns the fully-qualified path of the new row
    /// (`<table_path><instance>.`). Partial field-set failures are reported
    /// but the allocation itself is not undone; rollback on atomic contexts
    /// is the transaction engine's responsibility.
    ///
    /// # Errors
    /// Returns any bus-native failure encountered while allocating the row.
    async fn add_table_row(&self, table_path: &str, row: &Row) -> Result<String, AdapterError>;

    /// Delete a single row by its fully-qualified path.
    ///
    /// # Errors
    /// Returns [`AdapterError::NotFound`] if the row does not exist.
    async fn delete_table_row(&self, row_path: &str) -> Result<(), AdapterError>;

    /// Replace the entire contents of a table.
    ///
    /// Semantically enumerate-existing, delete-each, add-each; not atomic at
    /// the bus level.
    ///
    /// # Errors
    /// Returns any bus-native failure encountered during enumeration,
    /// deletion, or re-population.
    async fn replace_table(&self, table_path: &str, rows: &[Row]) -> Result<(), AdapterError>;

    /// Read a parameter's notify/access attribute pair.
    ///
    /// # Errors
    /// Returns [`AdapterError::NotFound`] if `name` does not exist.
    async fn get_attributes(&self, name: &str) -> Result<Attribute, AdapterError>;

    /// Write a parameter's notify/access attribute pair.
    ///
    /// # Errors
    /// Returns [`AdapterError::NotFound`] if `name` does not exist.
    async fn set_attributes(&self, name: &str, attribute: Attribute) -> Result<(), AdapterError>;

    /// Register the bus's single subscription for `event_name`.
    ///
    /// Callers are expected to refcount above this layer (see
    /// [`registry::SubscriptionRegistry`]); this call always performs the
    /// underlying bus registration.
    ///
    /// # Errors
    /// Returns any bus-native failure encountered while subscribing.
    async fn subscribe_raw(
        &self,
        event_name: &str,
        sender: tokio::sync::mpsc::UnboundedSender<BusEvent>,
    ) -> Result<(), AdapterError>;

    /// Release the bus's subscription for `event_name`.
    ///
    /// # Errors
    /// Returns any bus-native failure encountered while unsubscribing.
    async fn unsubscribe_raw(&self, event_name: &str) -> Result<(), AdapterError>;

    /// Atomically compare-and-set a parameter at the adapter layer.
    ///
    /// Reads the current value, compares it to `expected` under the
    /// canonical string encoding of `wire_type`, and sets `new_value` iff
    /// equal. Not atomic at the bus itself, only at this adapter.
    ///
    /// # Errors
    /// Returns [`AdapterError::InvalidValue`] with a precondition-failure
    /// marker when the comparison does not hold (translated to HTTP 412 by
    /// [`crate::error::GatewayError`] at the translator boundary via
    /// [`TestAndSetOutcome`]), or any other bus-native failure.
    async fn test_and_set(
        &self,
        name: &str,
        expected: &str,
        new_value: &TypedValue,
    ) -> Result<TestAndSetOutcome, AdapterError>;
}

/// Result of a [`ParambusAdapter::test_and_set`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestAndSetOutcome {
    /// The precondition held and the new value was written.
    Applied,
    /// The precondition did not hold; no write occurred.
    PreconditionFailed,
}
