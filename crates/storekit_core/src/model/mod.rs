//! Declarative collection model shared by every backend family.
//!
//! # Responsibility
//! - Describe collections/tables independently of the store that hosts them.
//! - Convert loosely typed definitions into checked values.
//!
//! # Invariants
//! - Malformed definition input yields `DefinitionError`, never a panic.
//! - Absent optional fields resolve to zero values.

pub mod definition;
pub mod index;
