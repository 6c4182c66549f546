//! Moves the subscription side of a pipeline onto a scheduler.
//!
//! Both the upstream `subscribe` call and every later `request` are run on
//! the target context, so a source that emits synchronously on request
//! produces its values on that context. When several of these stages are
//! stacked, each outer stage merely schedules the next subscribe inward,
//! so the stage closest to the source decides where emission happens.

use std::sync::Arc;

use crate::{
  error::Error,
  flux::Flux,
  publisher::Publisher,
  scheduler::Scheduler,
  subscriber::Subscriber,
  subscription::Subscription,
};

pub struct SubscribeOnOp<T: Send + 'static> {
  source: Flux<T>,
  scheduler: Scheduler,
}

impl<T: Send + 'static> SubscribeOnOp<T> {
  pub fn new(source: Flux<T>, scheduler: Scheduler) -> Self {
    SubscribeOnOp { source, scheduler }
  }
}

impl<T: Send + 'static> Publisher<T> for SubscribeOnOp<T> {
  fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
    let source = self.source.clone();
    let scheduler = self.scheduler.clone();
    self.scheduler.schedule(move || {
      source.subscribe_dyn(Box::new(SubscribeOnSubscriber {
        downstream: subscriber,
        scheduler,
      }));
    });
  }
}

struct SubscribeOnSubscriber<T> {
  downstream: Box<dyn Subscriber<T>>,
  scheduler: Scheduler,
}

impl<T: Send + 'static> Subscriber<T> for SubscribeOnSubscriber<T> {
  fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
    self.downstream.on_subscribe(Arc::new(RequestOnSubscription {
      upstream: subscription,
      scheduler: self.scheduler.clone(),
    }));
  }

  fn on_next(&mut self, value: T) {
    self.downstream.on_next(value);
  }

  fn on_complete(&mut self) {
    self.downstream.on_complete();
  }

  fn on_error(&mut self, error: Error) {
    self.downstream.on_error(error);
  }
}

/// Reschedules demand so the upstream sees `request` on the target
/// context. Cancellation stays on the caller thread; it must not wait for
/// a pool slot.
struct RequestOnSubscription {
  upstream: Arc<dyn Subscription>,
  scheduler: Scheduler,
}

impl Subscription for RequestOnSubscription {
  fn request(&self, n: u64) {
    let upstream = self.upstream.clone();
    self.scheduler.schedule(move || upstream.request(n));
  }

  fn cancel(&self) {
    self.upstream.cancel();
  }
}

#[cfg(test)]
mod test {
  use std::time::Duration;

  use crate::{prelude::*, testing::TestSubscriber};

  #[test]
  fn emission_happens_on_the_scheduler_thread() {
    let probe = TestSubscriber::unbounded();
    Flux::from_sequence(vec![1, 2, 3, 4])
      .subscribe_on(Schedulers::single())
      .subscribe(probe.clone());

    probe.await_termination(Duration::from_secs(5));
    probe.assert_values(&[1, 2, 3, 4]);
    probe.assert_complete();
    for name in probe.delivery_threads() {
      assert!(name.starts_with("single-"), "value delivered on {name}");
    }
  }

  #[test]
  fn closest_stage_to_the_source_wins() {
    let probe = TestSubscriber::unbounded();
    let inner = Scheduler::new_single("inner");
    Flux::from_sequence(vec![1, 2])
      .subscribe_on(inner)
      .subscribe_on(Schedulers::bounded_elastic())
      .subscribe(probe.clone());

    probe.await_termination(Duration::from_secs(5));
    probe.assert_complete();
    for name in probe.delivery_threads() {
      assert!(name.starts_with("inner-"), "value delivered on {name}");
    }
  }

  #[test]
  fn later_requests_are_also_relocated() {
    let probe = TestSubscriber::with_demand(1);
    Flux::from_sequence(vec![1, 2])
      .subscribe_on(Schedulers::single())
      .subscribe(probe.clone());
    probe.await_values(1, Duration::from_secs(5));

    probe.request(1);
    probe.await_termination(Duration::from_secs(5));
    probe.assert_values(&[1, 2]);
    for name in probe.delivery_threads() {
      assert!(name.starts_with("single-"), "value delivered on {name}");
    }
  }

  #[test]
  fn errors_travel_through_unchanged() {
    let probe = TestSubscriber::<i32>::unbounded();
    Flux::error(Error::source("boom"))
      .subscribe_on(Schedulers::single())
      .subscribe(probe.clone());
    probe.await_termination(Duration::from_secs(5));
    probe.assert_error(|e| e == &Error::source("boom"));
  }
}
