//! Subscriber trait: the consumer half of the signal protocol.

use std::sync::Arc;

use crate::{
  error::Error,
  subscription::{Subscription, UNBOUNDED},
};

/// The sink of a publisher execution.
///
/// Protocol contract: `on_subscribe` fires exactly once, before any other
/// signal; exactly one of `on_complete`/`on_error` fires, at most once, and
/// no `on_next` may follow it. Stages enforce this, a well-behaved
/// subscriber may rely on it.
pub trait Subscriber<T>: Send + 'static {
  /// Receives the live subscription. Demand must be requested through it
  /// before any value is delivered.
  fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>);

  /// Receives the next value. Never delivered beyond granted demand.
  fn on_next(&mut self, value: T);

  /// Normal termination.
  fn on_complete(&mut self);

  /// Error termination.
  fn on_error(&mut self, error: Error);
}

impl<T> Subscriber<T> for Box<dyn Subscriber<T>>
where
  T: 'static,
{
  fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
    (**self).on_subscribe(subscription)
  }

  fn on_next(&mut self, value: T) { (**self).on_next(value) }

  fn on_complete(&mut self) { (**self).on_complete() }

  fn on_error(&mut self, error: Error) { (**self).on_error(error) }
}

/// Closure adapter: requests unbounded demand on subscribe and feeds every
/// value to the closure. Completion is ignored, errors are traced.
///
/// Enables `flux.subscribe_fn(|v| println!("{v}"))`.
pub struct FnSubscriber<F> {
  next: F,
}

impl<F> FnSubscriber<F> {
  pub fn new(next: F) -> Self { FnSubscriber { next } }
}

impl<T, F> Subscriber<T> for FnSubscriber<F>
where
  F: FnMut(T) + Send + 'static,
  T: 'static,
{
  fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
    subscription.request(UNBOUNDED);
  }

  fn on_next(&mut self, value: T) { (self.next)(value) }

  fn on_complete(&mut self) {}

  fn on_error(&mut self, error: Error) {
    tracing::debug!(target: "rill", %error, "unhandled error in FnSubscriber");
  }
}
