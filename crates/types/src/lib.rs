//! Shared primitive types for the unitvault workspace.
//!
//! Account addresses, token amounts, identifiers and the clock abstraction
//! used by the ledger engine and its tooling.

pub mod address;
pub mod time_service;
pub mod units;

pub use address::*;
pub use time_service::*;
pub use units::*;
