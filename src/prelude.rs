//! Glob import for pipeline building.
//!
//! ```rust
//! use rill::prelude::*;
//! ```

pub use crate::{
  error::Error,
  flux::Flux,
  publisher::Publisher,
  scheduler::{Scheduler, Schedulers, Worker},
  subscriber::{FnSubscriber, Subscriber},
  subscription::{ArbiterSubscription, NoopSubscription, Subscription, UNBOUNDED},
};
