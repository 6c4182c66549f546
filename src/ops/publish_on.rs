//! Moves the signal side of a pipeline onto a scheduler.
//!
//! Stages below this one receive `on_next`, `on_complete` and `on_error`
//! as jobs on one serial worker of the target context, in signal order.
//! `on_subscribe` and the demand path stay on the caller's thread.

use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc, Mutex,
};

use crate::{
  error::Error,
  flux::Flux,
  publisher::Publisher,
  scheduler::{Scheduler, Worker},
  subscriber::Subscriber,
  subscription::Subscription,
};

pub struct PublishOnOp<T: Send + 'static> {
  source: Flux<T>,
  scheduler: Scheduler,
}

impl<T: Send + 'static> PublishOnOp<T> {
  pub fn new(source: Flux<T>, scheduler: Scheduler) -> Self {
    PublishOnOp { source, scheduler }
  }
}

impl<T: Send + 'static> Publisher<T> for PublishOnOp<T> {
  fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
    self.source.subscribe_dyn(Box::new(PublishOnSubscriber {
      downstream: Arc::new(Mutex::new(Some(subscriber))),
      worker: self.scheduler.create_worker(),
      cancelled: Arc::new(AtomicBool::new(false)),
      done: false,
    }));
  }
}

struct PublishOnSubscriber<T: Send + 'static> {
  downstream: Arc<Mutex<Option<Box<dyn Subscriber<T>>>>>,
  worker: Worker,
  cancelled: Arc<AtomicBool>,
  done: bool,
}

impl<T: Send + 'static> Subscriber<T> for PublishOnSubscriber<T> {
  fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
    let handle = Arc::new(PublishOnSubscription {
      upstream: subscription,
      cancelled: self.cancelled.clone(),
    });
    if let Some(downstream) = self.downstream.lock().unwrap().as_mut() {
      downstream.on_subscribe(handle);
    }
  }

  fn on_next(&mut self, value: T) {
    if self.done || self.cancelled.load(Ordering::Acquire) {
      return;
    }
    let downstream = self.downstream.clone();
    let cancelled = self.cancelled.clone();
    self.worker.schedule(move || {
      if cancelled.load(Ordering::Acquire) {
        return;
      }
      if let Some(downstream) = downstream.lock().unwrap().as_mut() {
        downstream.on_next(value);
      }
    });
  }

  fn on_complete(&mut self) {
    if self.done {
      return;
    }
    self.done = true;
    let downstream = self.downstream.clone();
    let cancelled = self.cancelled.clone();
    self.worker.schedule(move || {
      if cancelled.load(Ordering::Acquire) {
        return;
      }
      if let Some(mut downstream) = downstream.lock().unwrap().take() {
        downstream.on_complete();
      }
    });
  }

  fn on_error(&mut self, error: Error) {
    if self.done {
      return;
    }
    self.done = true;
    let downstream = self.downstream.clone();
    let cancelled = self.cancelled.clone();
    self.worker.schedule(move || {
      if cancelled.load(Ordering::Acquire) {
        return;
      }
      if let Some(mut downstream) = downstream.lock().unwrap().take() {
        downstream.on_error(error);
      }
    });
  }
}

struct PublishOnSubscription {
  upstream: Arc<dyn Subscription>,
  cancelled: Arc<AtomicBool>,
}

impl Subscription for PublishOnSubscription {
  fn request(&self, n: u64) {
    self.upstream.request(n);
  }

  fn cancel(&self) {
    // Already queued jobs are discarded by the flag when they run.
    self.cancelled.store(true, Ordering::Release);
    self.upstream.cancel();
  }
}

#[cfg(test)]
mod test {
  use std::time::Duration;

  use crate::{prelude::*, testing::TestSubscriber};

  #[test]
  fn signals_arrive_on_the_scheduler_thread() {
    let probe = TestSubscriber::unbounded();
    Flux::from_sequence(vec![1, 2, 3, 4])
      .publish_on(Schedulers::single())
      .subscribe(probe.clone());

    probe.await_termination(Duration::from_secs(5));
    probe.assert_values(&[1, 2, 3, 4]);
    probe.assert_complete();
    for name in probe.delivery_threads() {
      assert!(name.starts_with("single-"), "value delivered on {name}");
    }
  }

  #[test]
  fn later_stage_overrides_the_earlier_one() {
    // Stages downstream of the second hop see its context; the first hop
    // only affects the stretch between the two.
    let probe = TestSubscriber::unbounded();
    let first = Scheduler::new_single("first-hop");
    Flux::from_sequence(vec![1, 2])
      .publish_on(first)
      .publish_on(Schedulers::single())
      .subscribe(probe.clone());

    probe.await_termination(Duration::from_secs(5));
    probe.assert_complete();
    for name in probe.delivery_threads() {
      assert!(name.starts_with("single-"), "value delivered on {name}");
    }
  }

  #[test]
  fn signal_order_is_preserved_across_the_hop() {
    let probe = TestSubscriber::unbounded();
    Flux::range(1, 100)
      .publish_on(Schedulers::bounded_elastic())
      .subscribe(probe.clone());
    probe.await_termination(Duration::from_secs(5));
    probe.assert_values(&(1..=100).collect::<Vec<_>>());
    probe.assert_complete();
  }

  #[test]
  fn errors_hop_like_values() {
    let probe = TestSubscriber::<i32>::unbounded();
    Flux::error(Error::source("boom"))
      .publish_on(Schedulers::single())
      .subscribe(probe.clone());
    probe.await_termination(Duration::from_secs(5));
    probe.assert_error(|e| e == &Error::source("boom"));
  }
}
