//! Protocol-translation gateway bridging an uplink message bus to a local
//! hierarchical parameter bus.
//!
//! A request arriving as either dialect's envelope is normalized into one
//! canonical [`translator::RequestEnvelope`], dispatched against a
//! [`parambus::ParambusAdapter`] through a read-through
//! [`cache::ParameterCache`], and (for the uplink dialect) reshaped back
//! into that dialect's response grouping. Multi-parameter writes run through
//! [`engine::TransactionEngine`]'s validate/snapshot/apply/rollback pipeline
//! instead of the single-parameter path. Parambus-side events flow out
//! through [`events::EventPipeline`] as [`notification::Notification`]
//! frames on the same [`uplink::Transport`] the inbound requests arrived on.
//!
//! [`service::Service`] is the process-wide assembly of every collaborator
//! above; [`config::AppConfig`] is the single configuration surface for all
//! of it.

#![cfg_attr(test, expect(clippy::unwrap_used, reason = "test code can panic"))]
#![cfg_attr(test, expect(clippy::expect_used, reason = "test code can panic"))]
#![cfg_attr(test, expect(clippy::indexing_slicing, reason = "test code with known bounds"))]

pub mod auth;
pub mod cache;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod notification;
pub mod parambus;
pub mod service;
pub mod translator;
pub mod uplink;

pub use error::GatewayError;
pub use service::{Service, ServiceError};
