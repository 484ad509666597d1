//! Repository layer for database access.
//!
//! Ledger and postponement access goes through static `*Ops` helpers over the
//! pool. The user directory sits behind the [`UserRepository`] trait.

pub mod ledger;
pub mod postponed;
pub mod user;

pub use ledger::*;
pub use postponed::*;
pub use user::*;
