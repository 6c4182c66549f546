//! Pairwise combination of two streams.
//!
//! Each side buffers into its own queue; a pair is emitted whenever both
//! queues hold a value and downstream has demand. The output ends as soon
//! as either side is exhausted, truncating to the shorter stream.

use std::{
  collections::VecDeque,
  sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
  },
};

use crate::{
  error::Error,
  flux::Flux,
  publisher::Publisher,
  subscriber::Subscriber,
  subscription::{Demand, Subscription, UNBOUNDED},
};

pub struct ZipOp<A: Send + 'static, B: Send + 'static> {
  first: Flux<A>,
  second: Flux<B>,
}

impl<A: Send + 'static, B: Send + 'static> ZipOp<A, B> {
  pub fn new(first: Flux<A>, second: Flux<B>) -> Self {
    ZipOp { first, second }
  }
}

impl<A: Send + 'static, B: Send + 'static> Publisher<(A, B)> for ZipOp<A, B> {
  fn subscribe(&self, subscriber: Box<dyn Subscriber<(A, B)>>) {
    let coordinator = Arc::new(ZipCoordinator {
      downstream: Mutex::new(Some(subscriber)),
      left: Mutex::new(VecDeque::new()),
      right: Mutex::new(VecDeque::new()),
      left_done: AtomicBool::new(false),
      right_done: AtomicBool::new(false),
      left_sub: Mutex::new(None),
      right_sub: Mutex::new(None),
      demand: Demand::new(),
      wip: AtomicU64::new(0),
      cancelled: AtomicBool::new(false),
      invalid: AtomicBool::new(false),
      fatal: Mutex::new(None),
    });

    {
      let mut guard = coordinator.downstream.lock().unwrap();
      coordinator.wip.fetch_add(1, Ordering::AcqRel);
      if let Some(downstream) = guard.as_mut() {
        let handle: Arc<dyn Subscription> = Arc::new(ZipSubscription {
          coordinator: coordinator.clone(),
        });
        downstream.on_subscribe(handle);
      }
    }

    self.first.subscribe_dyn(Box::new(ZipLeft {
      coordinator: coordinator.clone(),
      done: false,
    }));
    self.second.subscribe_dyn(Box::new(ZipRight {
      coordinator: coordinator.clone(),
      done: false,
    }));
    coordinator.drain_loop();
  }
}

struct ZipCoordinator<A: Send + 'static, B: Send + 'static> {
  downstream: Mutex<Option<Box<dyn Subscriber<(A, B)>>>>,
  left: Mutex<VecDeque<A>>,
  right: Mutex<VecDeque<B>>,
  left_done: AtomicBool,
  right_done: AtomicBool,
  left_sub: Mutex<Option<Arc<dyn Subscription>>>,
  right_sub: Mutex<Option<Arc<dyn Subscription>>>,
  demand: Demand,
  wip: AtomicU64,
  cancelled: AtomicBool,
  invalid: AtomicBool,
  fatal: Mutex<Option<Error>>,
}

enum PairStep<A, B> {
  Emit(A, B),
  Exhausted,
  Starved,
  Waiting,
}

impl<A: Send + 'static, B: Send + 'static> ZipCoordinator<A, B> {
  fn fail_fast(&self, error: Error) {
    let mut fatal = self.fatal.lock().unwrap();
    if fatal.is_none() {
      *fatal = Some(error);
    }
  }

  fn cancel_both(&self) {
    if let Some(sub) = self.left_sub.lock().unwrap().take() {
      sub.cancel();
    }
    if let Some(sub) = self.right_sub.lock().unwrap().take() {
      sub.cancel();
    }
  }

  fn drain(&self) {
    if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
      return;
    }
    self.drain_loop();
  }

  fn drain_loop(&self) {
    loop {
      self.emit_available();
      if self.wip.fetch_sub(1, Ordering::AcqRel) == 1 {
        break;
      }
    }
  }

  // Lock order is always left then right.
  fn pair_step(&self) -> PairStep<A, B> {
    let mut left = self.left.lock().unwrap();
    let mut right = self.right.lock().unwrap();
    if !left.is_empty() && !right.is_empty() {
      if !self.demand.try_claim() {
        return PairStep::Starved;
      }
      return match (left.pop_front(), right.pop_front()) {
        (Some(a), Some(b)) => PairStep::Emit(a, b),
        _ => PairStep::Waiting,
      };
    }
    let left_exhausted = left.is_empty() && self.left_done.load(Ordering::Acquire);
    let right_exhausted = right.is_empty() && self.right_done.load(Ordering::Acquire);
    if left_exhausted || right_exhausted {
      PairStep::Exhausted
    } else {
      PairStep::Waiting
    }
  }

  fn emit_available(&self) {
    let mut guard = self.downstream.lock().unwrap();
    if guard.is_none() {
      return;
    }
    loop {
      if self.cancelled.load(Ordering::Acquire) {
        *guard = None;
        return;
      }
      if self.invalid.load(Ordering::Acquire) {
        self.cancelled.store(true, Ordering::Release);
        self.cancel_both();
        if let Some(mut downstream) = guard.take() {
          downstream.on_error(Error::InvalidDemand(0));
        }
        return;
      }
      if let Some(error) = self.fatal.lock().unwrap().take() {
        self.cancelled.store(true, Ordering::Release);
        self.cancel_both();
        if let Some(mut downstream) = guard.take() {
          downstream.on_error(error);
        }
        return;
      }
      match self.pair_step() {
        PairStep::Emit(a, b) => {
          if let Some(downstream) = guard.as_mut() {
            downstream.on_next((a, b));
          }
        }
        PairStep::Exhausted => {
          self.cancel_both();
          if let Some(mut downstream) = guard.take() {
            downstream.on_complete();
          }
          return;
        }
        PairStep::Starved | PairStep::Waiting => return,
      }
    }
  }
}

struct ZipSubscription<A: Send + 'static, B: Send + 'static> {
  coordinator: Arc<ZipCoordinator<A, B>>,
}

impl<A: Send + 'static, B: Send + 'static> Subscription for ZipSubscription<A, B> {
  fn request(&self, n: u64) {
    if self.coordinator.cancelled.load(Ordering::Acquire) {
      return;
    }
    if n == 0 {
      self.coordinator.invalid.store(true, Ordering::Release);
    } else {
      self.coordinator.demand.add(n);
    }
    self.coordinator.drain();
  }

  fn cancel(&self) {
    if self.coordinator.cancelled.swap(true, Ordering::AcqRel) {
      return;
    }
    self.coordinator.cancel_both();
    self.coordinator.drain();
  }
}

struct ZipLeft<A: Send + 'static, B: Send + 'static> {
  coordinator: Arc<ZipCoordinator<A, B>>,
  done: bool,
}

impl<A: Send + 'static, B: Send + 'static> Subscriber<A> for ZipLeft<A, B> {
  fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
    if self.coordinator.cancelled.load(Ordering::Acquire) {
      subscription.cancel();
      return;
    }
    *self.coordinator.left_sub.lock().unwrap() = Some(subscription.clone());
    subscription.request(UNBOUNDED);
  }

  fn on_next(&mut self, value: A) {
    if self.done || self.coordinator.cancelled.load(Ordering::Acquire) {
      return;
    }
    self.coordinator.left.lock().unwrap().push_back(value);
    self.coordinator.drain();
  }

  fn on_complete(&mut self) {
    if self.done {
      return;
    }
    self.done = true;
    self.coordinator.left_done.store(true, Ordering::Release);
    self.coordinator.drain();
  }

  fn on_error(&mut self, error: Error) {
    if self.done {
      return;
    }
    self.done = true;
    self.coordinator.fail_fast(error);
    self.coordinator.drain();
  }
}

struct ZipRight<A: Send + 'static, B: Send + 'static> {
  coordinator: Arc<ZipCoordinator<A, B>>,
  done: bool,
}

impl<A: Send + 'static, B: Send + 'static> Subscriber<B> for ZipRight<A, B> {
  fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
    if self.coordinator.cancelled.load(Ordering::Acquire) {
      subscription.cancel();
      return;
    }
    *self.coordinator.right_sub.lock().unwrap() = Some(subscription.clone());
    subscription.request(UNBOUNDED);
  }

  fn on_next(&mut self, value: B) {
    if self.done || self.coordinator.cancelled.load(Ordering::Acquire) {
      return;
    }
    self.coordinator.right.lock().unwrap().push_back(value);
    self.coordinator.drain();
  }

  fn on_complete(&mut self) {
    if self.done {
      return;
    }
    self.done = true;
    self.coordinator.right_done.store(true, Ordering::Release);
    self.coordinator.drain();
  }

  fn on_error(&mut self, error: Error) {
    if self.done {
      return;
    }
    self.done = true;
    self.coordinator.fail_fast(error);
    self.coordinator.drain();
  }
}

#[cfg(test)]
mod test {
  use crate::{prelude::*, testing::TestSubscriber};

  #[test]
  fn pairs_values_in_order() {
    let probe = TestSubscriber::unbounded();
    Flux::zip(
      Flux::from_sequence(vec![1, 2, 3]),
      Flux::from_sequence(vec!["a", "b", "c"]),
    )
    .subscribe(probe.clone());
    probe.assert_values(&[(1, "a"), (2, "b"), (3, "c")]);
    probe.assert_complete();
  }

  #[test]
  fn truncates_to_the_shorter_side() {
    let probe = TestSubscriber::unbounded();
    Flux::zip(
      Flux::from_sequence(vec![1, 2, 3, 4]),
      Flux::from_sequence(vec!["a", "b"]),
    )
    .subscribe(probe.clone());
    probe.assert_values(&[(1, "a"), (2, "b")]);
    probe.assert_complete();
  }

  #[test]
  fn empty_side_completes_without_pairs() {
    let probe = TestSubscriber::unbounded();
    Flux::zip(Flux::<i32>::empty(), Flux::from_sequence(vec!["a"]))
      .subscribe(probe.clone());
    probe.assert_values(&[]);
    probe.assert_complete();
  }

  #[test]
  fn error_on_either_side_fails_the_pair_stream() {
    let probe = TestSubscriber::<(i32, i32)>::unbounded();
    Flux::zip(Flux::just(1), Flux::error(Error::source("right broke")))
      .subscribe(probe.clone());
    probe.assert_error(|e| e == &Error::source("right broke"));
  }

  #[test]
  fn bounded_demand_holds_back_ready_pairs() {
    let probe = TestSubscriber::with_demand(1);
    Flux::zip(
      Flux::from_sequence(vec![1, 2]),
      Flux::from_sequence(vec![10, 20]),
    )
    .subscribe(probe.clone());
    probe.assert_values(&[(1, 10)]);
    probe.assert_not_terminated();

    probe.request(5);
    probe.assert_values(&[(1, 10), (2, 20)]);
    probe.assert_complete();
  }
}
