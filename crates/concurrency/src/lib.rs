//! SAGA-style compensating transaction coordination (spec §4.7): sequences
//! of forward steps and their compensations, unwound in reverse order on
//! failure or on drop.

#![warn(missing_docs)]

pub mod saga;

pub use saga::Saga;
