//! Database models for herald.
//!
//! These models map directly to the database schema. Enum-valued columns are
//! stored as their string tags and JSON-valued columns as TEXT.

pub mod ledger;
pub mod postponed;
pub mod user;

pub use ledger::*;
pub use postponed::*;
pub use user::*;
