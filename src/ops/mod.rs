//! Operator stages. Each submodule holds one publisher struct plus the
//! subscriber(s) it installs between upstream and downstream; the public
//! entry points are the methods on [`Flux`](crate::flux::Flux).

pub mod combine_latest;
pub mod concat;
pub mod delay_elements;
pub mod filter;
pub mod flat_map;
pub mod flat_map_sequential;
pub mod log;
pub mod map;
pub mod publish_on;
pub mod subscribe_on;
pub mod switch_if_empty;
pub mod zip;
