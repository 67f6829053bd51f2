//! # Domain Models
//!
//! Canonical weather types shared by every provider adapter.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Location`] | Resolved location (id, name, WGS84 coordinates) |
//! | [`Variable`] | Measured quantity with its canonical unit |
//! | [`VariableSet`] | Order-independent set of requested variables |
//! | [`NormalizedReading`] | One value for one variable at one instant |
//! | [`Quality`] | Validator verdict (`ok`, `suspect`, `invalid`) |
//! | [`UtcDateTime`] | UTC timestamp |
//!
//! Values are always expressed in the canonical unit of their variable;
//! the [`units`] helpers exist so adapters can convert before building a
//! reading.

mod location;
mod reading;
mod timestamp;
pub mod units;

pub use location::Location;
pub use reading::{NormalizedReading, Quality, Variable, VariableSet};
pub use timestamp::UtcDateTime;
