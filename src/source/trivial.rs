//! Degenerate zero-element sources.

use std::{marker::PhantomData, sync::Arc};

use crate::{
  error::Error,
  publisher::Publisher,
  subscriber::Subscriber,
  subscription::NoopSubscription,
};

/// Completes immediately after `on_subscribe`, without demand.
pub struct EmptyPublisher<T> {
  _marker: PhantomData<fn() -> T>,
}

impl<T> EmptyPublisher<T> {
  pub fn new() -> Self {
    EmptyPublisher {
      _marker: PhantomData,
    }
  }
}

impl<T: Send + 'static> Publisher<T> for EmptyPublisher<T> {
  fn subscribe(&self, mut subscriber: Box<dyn Subscriber<T>>) {
    subscriber.on_subscribe(Arc::new(NoopSubscription));
    subscriber.on_complete();
  }
}

/// Errors immediately after `on_subscribe`, without demand.
pub struct ErrorPublisher<T> {
  error: Error,
  _marker: PhantomData<fn() -> T>,
}

impl<T> ErrorPublisher<T> {
  pub fn new(error: Error) -> Self {
    ErrorPublisher {
      error,
      _marker: PhantomData,
    }
  }
}

impl<T: Send + 'static> Publisher<T> for ErrorPublisher<T> {
  fn subscribe(&self, mut subscriber: Box<dyn Subscriber<T>>) {
    subscriber.on_subscribe(Arc::new(NoopSubscription));
    subscriber.on_error(self.error.clone());
  }
}

#[cfg(test)]
mod test {
  use crate::{prelude::*, testing::TestSubscriber};

  #[test]
  fn empty_completes_without_values() {
    let probe = TestSubscriber::<i32>::unbounded();
    Flux::empty().subscribe(probe.clone());
    probe.assert_values(&[]);
    probe.assert_complete();
  }

  #[test]
  fn error_source_terminates_with_its_error() {
    let probe = TestSubscriber::<i32>::unbounded();
    Flux::error(Error::source("broken")).subscribe(probe.clone());
    probe.assert_values(&[]);
    probe.assert_error(|e| e == &Error::source("broken"));
  }
}
