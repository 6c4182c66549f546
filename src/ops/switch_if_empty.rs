//! Falls back to an alternate stream when upstream completes empty.
//!
//! The downstream holds an arbiter subscription for the whole lifetime of
//! the stage, so demand requested against the primary is replayed onto the
//! alternate when the switch happens.

use std::sync::Arc;

use crate::{
  error::Error,
  flux::Flux,
  publisher::Publisher,
  subscriber::Subscriber,
  subscription::{ArbiterSubscription, Subscription},
};

pub struct SwitchIfEmptyOp<T: Send + 'static> {
  source: Flux<T>,
  alternate: Flux<T>,
}

impl<T: Send + 'static> SwitchIfEmptyOp<T> {
  pub fn new(source: Flux<T>, alternate: Flux<T>) -> Self {
    SwitchIfEmptyOp { source, alternate }
  }
}

impl<T: Send + 'static> Publisher<T> for SwitchIfEmptyOp<T> {
  fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
    self.source.subscribe_dyn(Box::new(SwitchPrimary {
      downstream: Some(subscriber),
      alternate: Some(self.alternate.clone()),
      arbiter: ArbiterSubscription::new(),
      has_value: false,
    }));
  }
}

struct SwitchPrimary<T: Send + 'static> {
  downstream: Option<Box<dyn Subscriber<T>>>,
  alternate: Option<Flux<T>>,
  arbiter: Arc<ArbiterSubscription>,
  has_value: bool,
}

impl<T: Send + 'static> Subscriber<T> for SwitchPrimary<T> {
  fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
    self.arbiter.set_current(subscription);
    if let Some(downstream) = self.downstream.as_mut() {
      let handle: Arc<dyn Subscription> = self.arbiter.clone();
      downstream.on_subscribe(handle);
    }
  }

  fn on_next(&mut self, value: T) {
    self.has_value = true;
    self.arbiter.produced(1);
    if let Some(downstream) = self.downstream.as_mut() {
      downstream.on_next(value);
    }
  }

  fn on_complete(&mut self) {
    if self.has_value {
      if let Some(mut downstream) = self.downstream.take() {
        downstream.on_complete();
      }
      return;
    }
    // Empty primary: hand the downstream over to the alternate instead of
    // forwarding completion.
    if let (Some(downstream), Some(alternate)) = (self.downstream.take(), self.alternate.take()) {
      alternate.subscribe_dyn(Box::new(SwitchAlternate {
        downstream,
        arbiter: self.arbiter.clone(),
        done: false,
      }));
    }
  }

  fn on_error(&mut self, error: Error) {
    if let Some(mut downstream) = self.downstream.take() {
      downstream.on_error(error);
    }
  }
}

struct SwitchAlternate<T: Send + 'static> {
  downstream: Box<dyn Subscriber<T>>,
  arbiter: Arc<ArbiterSubscription>,
  done: bool,
}

impl<T: Send + 'static> Subscriber<T> for SwitchAlternate<T> {
  fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
    // The downstream already holds the arbiter; just repoint it.
    self.arbiter.set_current(subscription);
  }

  fn on_next(&mut self, value: T) {
    if self.done {
      return;
    }
    self.arbiter.produced(1);
    self.downstream.on_next(value);
  }

  fn on_complete(&mut self) {
    if self.done {
      return;
    }
    self.done = true;
    self.downstream.on_complete();
  }

  fn on_error(&mut self, error: Error) {
    if self.done {
      return;
    }
    self.done = true;
    self.downstream.on_error(error);
  }
}

#[cfg(test)]
mod test {
  use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  };

  use crate::{prelude::*, testing::TestSubscriber};

  #[test]
  fn empty_source_switches_to_alternate() {
    let probe = TestSubscriber::unbounded();
    Flux::empty()
      .switch_if_empty(Flux::just("not empty anymore"))
      .subscribe(probe.clone());
    probe.assert_values(&["not empty anymore"]);
    probe.assert_complete();
  }

  #[test]
  fn non_empty_source_never_touches_the_alternate() {
    let subscriptions = Arc::new(AtomicUsize::new(0));
    let counter = subscriptions.clone();
    let alternate = Flux::defer(move || {
      counter.fetch_add(1, Ordering::SeqCst);
      Flux::just(99)
    });

    let probe = TestSubscriber::unbounded();
    Flux::from_sequence(vec![1, 2])
      .switch_if_empty(alternate)
      .subscribe(probe.clone());

    probe.assert_values(&[1, 2]);
    probe.assert_complete();
    assert_eq!(subscriptions.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn demand_requested_before_the_switch_is_replayed() {
    let probe = TestSubscriber::with_demand(1);
    Flux::empty()
      .switch_if_empty(Flux::from_sequence(vec![7, 8]))
      .subscribe(probe.clone());
    probe.assert_values(&[7]);
    probe.assert_not_terminated();

    probe.request(1);
    probe.assert_values(&[7, 8]);
    probe.assert_complete();
  }

  #[test]
  fn primary_error_is_not_masked_by_the_alternate() {
    let probe = TestSubscriber::<i32>::unbounded();
    Flux::error(Error::source("primary failed"))
      .switch_if_empty(Flux::just(1))
      .subscribe(probe.clone());
    probe.assert_values(&[]);
    probe.assert_error(|e| e == &Error::source("primary failed"));
  }
}
