//! Unordered merge engine.
//!
//! For every upstream value the mapper yields an inner stream which is
//! subscribed immediately (bounded by the concurrency cap); inner values
//! are funneled through one queue and drained in arrival order against
//! downstream demand. `merge` and `merge_delay_error` are this engine
//! applied to an identity mapper over a sequence of sources.

use std::{
  collections::VecDeque,
  sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc, Mutex,
  },
};

use smallvec::SmallVec;

use crate::{
  error::Error,
  flux::Flux,
  publisher::Publisher,
  subscriber::Subscriber,
  subscription::{Demand, Subscription, UNBOUNDED},
};

pub struct FlatMapOp<T: Send + 'static, R: Send + 'static> {
  source: Flux<T>,
  mapper: Arc<dyn Fn(T) -> Flux<R> + Send + Sync>,
  concurrency: usize,
  delay_error: bool,
}

impl<T: Send + 'static, R: Send + 'static> FlatMapOp<T, R> {
  pub fn new(
    source: Flux<T>,
    mapper: impl Fn(T) -> Flux<R> + Send + Sync + 'static,
    concurrency: usize,
    delay_error: bool,
  ) -> Self {
    FlatMapOp {
      source,
      mapper: Arc::new(mapper),
      concurrency: concurrency.max(1),
      delay_error,
    }
  }
}

impl<T: Send + 'static, R: Send + 'static> Publisher<R> for FlatMapOp<T, R> {
  fn subscribe(&self, subscriber: Box<dyn Subscriber<R>>) {
    let coordinator = Arc::new(FlatMapCoordinator {
      downstream: Mutex::new(Some(subscriber)),
      queue: Mutex::new(VecDeque::new()),
      demand: Demand::new(),
      wip: AtomicU64::new(0),
      relaunch: AtomicUsize::new(0),
      cancelled: AtomicBool::new(false),
      invalid: AtomicBool::new(false),
      fatal: Mutex::new(None),
      errors: Mutex::new(SmallVec::new()),
      delay_error: self.delay_error,
      upstream: Mutex::new(None),
      upstream_done: AtomicBool::new(false),
      active: AtomicUsize::new(0),
      pending: Mutex::new(VecDeque::new()),
      concurrency: self.concurrency,
      inner_subs: Mutex::new(SmallVec::new()),
    });

    {
      let mut guard = coordinator.downstream.lock().unwrap();
      coordinator.wip.fetch_add(1, Ordering::AcqRel);
      if let Some(downstream) = guard.as_mut() {
        let handle: Arc<dyn Subscription> = Arc::new(FlatMapSubscription {
          coordinator: coordinator.clone(),
        });
        downstream.on_subscribe(handle);
      }
    }

    self.source.subscribe_dyn(Box::new(FlatMapMain {
      coordinator: coordinator.clone(),
      mapper: self.mapper.clone(),
      done: false,
    }));
    coordinator.drain_loop();
  }
}

struct FlatMapCoordinator<R: Send + 'static> {
  downstream: Mutex<Option<Box<dyn Subscriber<R>>>>,
  queue: Mutex<VecDeque<R>>,
  demand: Demand,
  wip: AtomicU64,
  relaunch: AtomicUsize,
  cancelled: AtomicBool,
  invalid: AtomicBool,
  fatal: Mutex<Option<Error>>,
  errors: Mutex<SmallVec<[Error; 2]>>,
  delay_error: bool,
  upstream: Mutex<Option<Arc<dyn Subscription>>>,
  upstream_done: AtomicBool,
  active: AtomicUsize,
  pending: Mutex<VecDeque<Flux<R>>>,
  concurrency: usize,
  inner_subs: Mutex<SmallVec<[Arc<dyn Subscription>; 4]>>,
}

enum QueueStep<R> {
  Emit(R),
  Starved,
  Drained,
}

impl<R: Send + 'static> FlatMapCoordinator<R> {
  fn launch(self: &Arc<Self>, inner: Flux<R>) {
    {
      let mut pending = self.pending.lock().unwrap();
      if self.active.load(Ordering::Acquire) >= self.concurrency {
        pending.push_back(inner);
        return;
      }
      self.active.fetch_add(1, Ordering::AcqRel);
    }
    inner.subscribe_dyn(Box::new(FlatMapInner {
      coordinator: self.clone(),
      done: false,
    }));
  }

  /// One inner finished: start a pending one in its slot or shrink the
  /// active count. Loops instead of recursing when replacements complete
  /// synchronously.
  fn inner_finished(self: &Arc<Self>) {
    if self.relaunch.fetch_add(1, Ordering::AcqRel) != 0 {
      return;
    }
    loop {
      let next = {
        let mut pending = self.pending.lock().unwrap();
        let next = pending.pop_front();
        if next.is_none() {
          self.active.fetch_sub(1, Ordering::AcqRel);
        }
        next
      };
      if let Some(next) = next {
        next.subscribe_dyn(Box::new(FlatMapInner {
          coordinator: self.clone(),
          done: false,
        }));
      }
      if self.relaunch.fetch_sub(1, Ordering::AcqRel) == 1 {
        break;
      }
    }
    self.drain();
  }

  fn fail_fast(&self, error: Error) {
    let mut fatal = self.fatal.lock().unwrap();
    if fatal.is_none() {
      *fatal = Some(error);
    }
  }

  fn cancel_all(&self) {
    if let Some(upstream) = self.upstream.lock().unwrap().take() {
      upstream.cancel();
    }
    self.pending.lock().unwrap().clear();
    let inners = std::mem::take(&mut *self.inner_subs.lock().unwrap());
    for inner in inners {
      inner.cancel();
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
        self.cancel_all();
        if let Some(mut downstream) = guard.take() {
          downstream.on_error(Error::InvalidDemand(0));
        }
        return;
      }
      if let Some(error) = self.fatal.lock().unwrap().take() {
        // Fail-fast: queued values are discarded.
        self.cancelled.store(true, Ordering::Release);
        self.cancel_all();
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
          let finished = self.upstream_done.load(Ordering::Acquire)
            && self.active.load(Ordering::Acquire) == 0
            && self.queue.lock().unwrap().is_empty();
          if finished {
            let errors = std::mem::take(&mut *self.errors.lock().unwrap());
            if let Some(mut downstream) = guard.take() {
              if errors.is_empty() {
                downstream.on_complete();
              } else {
                downstream.on_error(Error::compose(errors));
              }
            }
          }
          return;
        }
      }
    }
  }
}

struct FlatMapSubscription<R: Send + 'static> {
  coordinator: Arc<FlatMapCoordinator<R>>,
}

impl<R: Send + 'static> Subscription for FlatMapSubscription<R> {
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
    self.coordinator.cancel_all();
    self.coordinator.drain();
  }
}

struct FlatMapMain<T: Send + 'static, R: Send + 'static> {
  coordinator: Arc<FlatMapCoordinator<R>>,
  mapper: Arc<dyn Fn(T) -> Flux<R> + Send + Sync>,
  done: bool,
}

impl<T: Send + 'static, R: Send + 'static> Subscriber<T> for FlatMapMain<T, R> {
  fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
    // The coordinator buffers, so it absorbs the upstream at full speed;
    // downstream demand is honored at the queue.
    *self.coordinator.upstream.lock().unwrap() = Some(subscription.clone());
    subscription.request(UNBOUNDED);
  }

  fn on_next(&mut self, value: T) {
    if self.done || self.coordinator.cancelled.load(Ordering::Acquire) {
      return;
    }
    let inner = (self.mapper)(value);
    self.coordinator.launch(inner);
  }

  fn on_complete(&mut self) {
    if self.done {
      return;
    }
    self.done = true;
    self.coordinator.upstream_done.store(true, Ordering::Release);
    self.coordinator.drain();
  }

  fn on_error(&mut self, error: Error) {
    if self.done {
      return;
    }
    self.done = true;
    self.coordinator.upstream_done.store(true, Ordering::Release);
    if self.coordinator.delay_error {
      self.coordinator.errors.lock().unwrap().push(error);
    } else {
      self.coordinator.fail_fast(error);
    }
    self.coordinator.drain();
  }
}

struct FlatMapInner<R: Send + 'static> {
  coordinator: Arc<FlatMapCoordinator<R>>,
  done: bool,
}

impl<R: Send + 'static> Subscriber<R> for FlatMapInner<R> {
  fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
    if self.coordinator.cancelled.load(Ordering::Acquire) {
      subscription.cancel();
      return;
    }
    self
      .coordinator
      .inner_subs
      .lock()
      .unwrap()
      .push(subscription.clone());
    subscription.request(UNBOUNDED);
  }

  fn on_next(&mut self, value: R) {
    if self.done || self.coordinator.cancelled.load(Ordering::Acquire) {
      return;
    }
    self.coordinator.queue.lock().unwrap().push_back(value);
    self.coordinator.drain();
  }

  fn on_complete(&mut self) {
    if self.done {
      return;
    }
    self.done = true;
    self.coordinator.inner_finished();
  }

  fn on_error(&mut self, error: Error) {
    if self.done {
      return;
    }
    self.done = true;
    if self.coordinator.delay_error {
      self.coordinator.errors.lock().unwrap().push(error);
      self.coordinator.inner_finished();
    } else {
      self.coordinator.fail_fast(error);
      self.coordinator.drain();
    }
  }
}
