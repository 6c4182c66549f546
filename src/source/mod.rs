//! Source primitives: the leaves every pipeline starts from.

pub mod blocking;
pub mod defer;
pub mod from_sequence;
pub mod trivial;
