//! Disaster-response coordination ledger.
//!
//! Two independent subsystems share one invocation model (one atomic
//! operation per call):
//! - the sensor registry, which evaluates readings against per-type alert
//!   thresholds, and
//! - the resource deployment manager, which keeps resource availability in
//!   step with active deployments.
//!
//! Module boundaries follow the Explicit Module Boundary Pattern (EMBP):
//! `main.rs` only talks to `config`, `schema`, `store` and the `routes`
//! gateway; sibling modules reach shared types through this root.

pub mod alerts;
pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod schema;
pub mod store;

pub use alerts::ThresholdTable;
pub use config::Config;
pub use error::{Entity, LedgerError, LedgerResult};
pub use store::Ledger;
