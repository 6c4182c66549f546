//! Reactive stream pipelines with demand-driven backpressure.
//!
//! A [`Flux`] is a cold description of a value stream. Subscribing starts
//! an independent execution that pushes values to a [`Subscriber`] only as
//! fast as the subscriber requests them through its [`Subscription`].
//! Sources, transforming operators, multi-source combinators and the
//! scheduling operators (`subscribe_on`, `publish_on`) all compose on the
//! same four-signal protocol: `on_subscribe`, then any number of `on_next`
//! within demand, then at most one of `on_complete` or `on_error`.
//!
//! ```rust
//! use rill::prelude::*;
//!
//! Flux::from_sequence(vec!["spring", "reactor", "rust"])
//!   .map(|s| s.to_uppercase())
//!   .filter(|s| s.len() > 4)
//!   .subscribe_fn(|s| println!("{s}"));
//! ```
//!
//! Work moves between threads through named [`Scheduler`] contexts; the
//! shared `single` and `bounded-elastic` defaults live in [`Schedulers`].
//!
//! [`Flux`]: crate::flux::Flux
//! [`Subscriber`]: crate::subscriber::Subscriber
//! [`Subscription`]: crate::subscription::Subscription
//! [`Scheduler`]: crate::scheduler::Scheduler
//! [`Schedulers`]: crate::scheduler::Schedulers

pub mod error;
pub mod flux;
pub mod ops;
pub mod prelude;
pub mod publisher;
pub mod scheduler;
pub mod source;
pub mod subscriber;
pub mod subscription;
pub mod testing;

pub use error::Error;
pub use flux::Flux;
