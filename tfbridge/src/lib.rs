//! Schema and state-value bridge between a declarative provider runtime and a
//! host orchestration system.
//!
//! The crate converts between the structural value model in [`cty`], the
//! protocol-v6 value family in [`tftypes`] and the legacy flat attribute
//! encoding in [`flatmap`]. On top of those conversions it computes proposed
//! new states ([`objchange`]), upgrades persisted state ([`upgrade`]) and
//! classifies diffs ([`diff`]). [`provider::Provider`] ties these together
//! around a wrapped provider runtime.

pub mod bridge;
pub mod config;
pub mod cty;
pub mod diff;
pub mod error;
pub mod flatmap;
pub mod instance;
pub mod legacy;
pub mod objchange;
pub mod path;
pub mod projection;
pub mod protocol;
pub mod provider;
pub mod schema;
pub mod sdk;
pub mod tftypes;
pub mod timeouts;
pub mod upgrade;
pub mod walk;

pub use error::{Error, MultiError, Result};

/// Sentinel substituted for unknown values whenever a value crosses into an
/// untyped representation. Callers match on it byte for byte.
pub const UNKNOWN_VARIABLE_VALUE: &str = "74D93920-ED26-11E3-AC10-0800200C9A66";
