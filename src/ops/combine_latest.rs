//! Combines the most recent value of two streams.
//!
//! Every update on either side produces a combination once both sides have
//! emitted at least once. Combinations buffer in an output queue so
//! downstream demand is honored without dropping updates.

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

pub struct CombineLatestOp<A: Send + 'static, B: Send + 'static, T: Send + 'static> {
  first: Flux<A>,
  second: Flux<B>,
  combiner: Arc<dyn Fn(&A, &B) -> T + Send + Sync>,
}

impl<A: Send + 'static, B: Send + 'static, T: Send + 'static> CombineLatestOp<A, B, T> {
  pub fn new(
    first: Flux<A>,
    second: Flux<B>,
    combiner: impl Fn(&A, &B) -> T + Send + Sync + 'static,
  ) -> Self {
    CombineLatestOp {
      first,
      second,
      combiner: Arc::new(combiner),
    }
  }
}

impl<A: Send + 'static, B: Send + 'static, T: Send + 'static> Publisher<T>
  for CombineLatestOp<A, B, T>
{
  fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
    let coordinator = Arc::new(CombineCoordinator {
      downstream: Mutex::new(Some(subscriber)),
      latest: Mutex::new((None, None)),
      queue: Mutex::new(VecDeque::new()),
      combiner: self.combiner.clone(),
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
        let handle: Arc<dyn Subscription> = Arc::new(CombineSubscription {
          coordinator: coordinator.clone(),
        });
        downstream.on_subscribe(handle);
      }
    }

    self.first.subscribe_dyn(Box::new(CombineLeft {
      coordinator: coordinator.clone(),
      done: false,
    }));
    self.second.subscribe_dyn(Box::new(CombineRight {
      coordinator: coordinator.clone(),
      done: false,
    }));
    coordinator.drain_loop();
  }
}

struct CombineCoordinator<A: Send + 'static, B: Send + 'static, T: Send + 'static> {
  downstream: Mutex<Option<Box<dyn Subscriber<T>>>>,
  latest: Mutex<(Option<A>, Option<B>)>,
  queue: Mutex<VecDeque<T>>,
  combiner: Arc<dyn Fn(&A, &B) -> T + Send + Sync>,
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

enum QueueStep<T> {
  Emit(T),
  Starved,
  Drained,
}

impl<A: Send + 'static, B: Send + 'static, T: Send + 'static> CombineCoordinator<A, B, T> {
  fn update_left(&self, value: A) {
    let mut latest = self.latest.lock().unwrap();
    latest.0 = Some(value);
    if let (Some(a), Some(b)) = (&latest.0, &latest.1) {
      let combined = (self.combiner)(a, b);
      self.queue.lock().unwrap().push_back(combined);
    }
  }

  fn update_right(&self, value: B) {
    let mut latest = self.latest.lock().unwrap();
    latest.1 = Some(value);
    if let (Some(a), Some(b)) = (&latest.0, &latest.1) {
      let combined = (self.combiner)(a, b);
      self.queue.lock().unwrap().push_back(combined);
    }
  }

  /// True when no further combination can ever be produced.
  fn exhausted(&self) -> bool {
    let left_done = self.left_done.load(Ordering::Acquire);
    let right_done = self.right_done.load(Ordering::Acquire);
    if left_done && right_done {
      return true;
    }
    let latest = self.latest.lock().unwrap();
    (left_done && latest.0.is_none()) || (right_done && latest.1.is_none())
  }

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
      let step = {
        let mut queue = self.queue.lock().unwrap();
        if queue.is_empty() {
          QueueStep::Drained
        } else if self.demand.try_claim() {
          match queue.pop_front() {
            Some(value) => QueueStep::Emit(value),
            None => QueueStep::Drained,
          }
        } else {
          QueueStep::Starved
        }
      };
      match step {
        QueueStep::Emit(value) => {
          if let Some(downstream) = guard.as_mut() {
            downstream.on_next(value);
          }
        }
        QueueStep::Starved => return,
        QueueStep::Drained => {
          if self.exhausted() {
            self.cancel_both();
            if let Some(mut downstream) = guard.take() {
              downstream.on_complete();
            }
          }
          return;
        }
      }
    }
  }
}

struct CombineSubscription<A: Send + 'static, B: Send + 'static, T: Send + 'static> {
  coordinator: Arc<CombineCoordinator<A, B, T>>,
}

impl<A: Send + 'static, B: Send + 'static, T: Send + 'static> Subscription
  for CombineSubscription<A, B, T>
{
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

struct CombineLeft<A: Send + 'static, B: Send + 'static, T: Send + 'static> {
  coordinator: Arc<CombineCoordinator<A, B, T>>,
  done: bool,
}

impl<A: Send + 'static, B: Send + 'static, T: Send + 'static> Subscriber<A>
  for CombineLeft<A, B, T>
{
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
    self.coordinator.update_left(value);
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

struct CombineRight<A: Send + 'static, B: Send + 'static, T: Send + 'static> {
  coordinator: Arc<CombineCoordinator<A, B, T>>,
  done: bool,
}

impl<A: Send + 'static, B: Send + 'static, T: Send + 'static> Subscriber<B>
  for CombineRight<A, B, T>
{
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
    self.coordinator.update_right(value);
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
