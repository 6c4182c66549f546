//! Ordered merge engine.
//!
//! Inner streams still run eagerly (bounded by the concurrency cap), but
//! every upstream value gets a slot in arrival order and downstream only
//! ever sees the head slot. Values from later slots buffer until every
//! earlier slot drained and completed, so the output order matches the
//! upstream order regardless of which inner finishes first.

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

pub struct FlatMapSequentialOp<T: Send + 'static, R: Send + 'static> {
  source: Flux<T>,
  mapper: Arc<dyn Fn(T) -> Flux<R> + Send + Sync>,
  concurrency: usize,
}

impl<T: Send + 'static, R: Send + 'static> FlatMapSequentialOp<T, R> {
  pub fn new(
    source: Flux<T>,
    mapper: impl Fn(T) -> Flux<R> + Send + Sync + 'static,
    concurrency: usize,
  ) -> Self {
    FlatMapSequentialOp {
      source,
      mapper: Arc::new(mapper),
      concurrency: concurrency.max(1),
    }
  }
}

impl<T: Send + 'static, R: Send + 'static> Publisher<R> for FlatMapSequentialOp<T, R> {
  fn subscribe(&self, subscriber: Box<dyn Subscriber<R>>) {
    let coordinator = Arc::new(SequentialCoordinator {
      downstream: Mutex::new(Some(subscriber)),
      slots: Mutex::new(VecDeque::new()),
      demand: Demand::new(),
      wip: AtomicU64::new(0),
      relaunch: AtomicUsize::new(0),
      cancelled: AtomicBool::new(false),
      invalid: AtomicBool::new(false),
      fatal: Mutex::new(None),
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
        let handle: Arc<dyn Subscription> = Arc::new(SequentialSubscription {
          coordinator: coordinator.clone(),
        });
        downstream.on_subscribe(handle);
      }
    }

    self.source.subscribe_dyn(Box::new(SequentialMain {
      coordinator: coordinator.clone(),
      mapper: self.mapper.clone(),
      done: false,
    }));
    coordinator.drain_loop();
  }
}

/// Per-upstream-value buffer; holds its inner's output until the slot
/// reaches the head of the line.
struct SlotCell<R> {
  queue: Mutex<VecDeque<R>>,
  done: AtomicBool,
}

impl<R> SlotCell<R> {
  fn new() -> Arc<Self> {
    Arc::new(SlotCell {
      queue: Mutex::new(VecDeque::new()),
      done: AtomicBool::new(false),
    })
  }
}

struct SequentialCoordinator<R: Send + 'static> {
  downstream: Mutex<Option<Box<dyn Subscriber<R>>>>,
  slots: Mutex<VecDeque<Arc<SlotCell<R>>>>,
  demand: Demand,
  wip: AtomicU64,
  relaunch: AtomicUsize,
  cancelled: AtomicBool,
  invalid: AtomicBool,
  fatal: Mutex<Option<Error>>,
  upstream: Mutex<Option<Arc<dyn Subscription>>>,
  upstream_done: AtomicBool,
  active: AtomicUsize,
  pending: Mutex<VecDeque<(Arc<SlotCell<R>>, Flux<R>)>>,
  concurrency: usize,
  inner_subs: Mutex<SmallVec<[Arc<dyn Subscription>; 4]>>,
}

enum HeadStep<R> {
  Emit(R),
  Advance,
  Starved,
  Idle,
}

impl<R: Send + 'static> SequentialCoordinator<R> {
  fn launch(self: &Arc<Self>, inner: Flux<R>) {
    let slot = SlotCell::new();
    self.slots.lock().unwrap().push_back(slot.clone());
    {
      let mut pending = self.pending.lock().unwrap();
      if self.active.load(Ordering::Acquire) >= self.concurrency {
        pending.push_back((slot, inner));
        return;
      }
      self.active.fetch_add(1, Ordering::AcqRel);
    }
    inner.subscribe_dyn(Box::new(SequentialInner {
      coordinator: self.clone(),
      slot,
      done: false,
    }));
  }

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
      if let Some((slot, inner)) = next {
        inner.subscribe_dyn(Box::new(SequentialInner {
          coordinator: self.clone(),
          slot,
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

  fn head_step(&self) -> HeadStep<R> {
    let slots = self.slots.lock().unwrap();
    let head = match slots.front() {
      Some(head) => head.clone(),
      None => return HeadStep::Idle,
    };
    drop(slots);

    let mut queue = head.queue.lock().unwrap();
    if !queue.is_empty() {
      if self.demand.try_claim() {
        match queue.pop_front() {
          Some(value) => HeadStep::Emit(value),
          None => HeadStep::Starved,
        }
      } else {
        HeadStep::Starved
      }
    } else if head.done.load(Ordering::Acquire) {
      drop(queue);
      self.slots.lock().unwrap().pop_front();
      HeadStep::Advance
    } else {
      // Head inner still running; later slots must keep buffering.
      HeadStep::Idle
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
        self.cancelled.store(true, Ordering::Release);
        self.cancel_all();
        if let Some(mut downstream) = guard.take() {
          downstream.on_error(error);
        }
        return;
      }
      match self.head_step() {
        HeadStep::Emit(value) => {
          if let Some(downstream) = guard.as_mut() {
            downstream.on_next(value);
          }
        }
        HeadStep::Advance => {}
        HeadStep::Starved => return,
        HeadStep::Idle => {
          let finished = self.upstream_done.load(Ordering::Acquire)
            && self.active.load(Ordering::Acquire) == 0
            && self.slots.lock().unwrap().is_empty();
          if finished {
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

struct SequentialSubscription<R: Send + 'static> {
  coordinator: Arc<SequentialCoordinator<R>>,
}

impl<R: Send + 'static> Subscription for SequentialSubscription<R> {
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

struct SequentialMain<T: Send + 'static, R: Send + 'static> {
  coordinator: Arc<SequentialCoordinator<R>>,
  mapper: Arc<dyn Fn(T) -> Flux<R> + Send + Sync>,
  done: bool,
}

impl<T: Send + 'static, R: Send + 'static> Subscriber<T> for SequentialMain<T, R> {
  fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
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
    self.coordinator.fail_fast(error);
    self.coordinator.drain();
  }
}

struct SequentialInner<R: Send + 'static> {
  coordinator: Arc<SequentialCoordinator<R>>,
  slot: Arc<SlotCell<R>>,
  done: bool,
}

impl<R: Send + 'static> Subscriber<R> for SequentialInner<R> {
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
    self.slot.queue.lock().unwrap().push_back(value);
    self.coordinator.drain();
  }

  fn on_complete(&mut self) {
    if self.done {
      return;
    }
    self.done = true;
    self.slot.done.store(true, Ordering::Release);
    self.coordinator.inner_finished();
  }

  fn on_error(&mut self, error: Error) {
    if self.done {
      return;
    }
    self.done = true;
    self.slot.done.store(true, Ordering::Release);
    self.coordinator.fail_fast(error);
    self.coordinator.drain();
  }
}

#[cfg(test)]
mod test {
  use std::time::Duration;

  use crate::{prelude::*, testing::TestSubscriber};

  #[test]
  fn output_order_matches_upstream_order() {
    let probe = TestSubscriber::unbounded();
    Flux::from_sequence(vec![1, 2, 3])
      .flat_map_sequential(|v| Flux::from_sequence(vec![v * 10, v * 10 + 1]))
      .subscribe(probe.clone());
    probe.assert_values(&[10, 11, 20, 21, 30, 31]);
    probe.assert_complete();
  }

  #[test]
  fn slow_first_inner_still_emits_first() {
    // The second source finishes long before the first, but its values
    // stay buffered behind the head slot.
    let probe = TestSubscriber::unbounded();
    Flux::merge_sequential(vec![
      Flux::from_sequence(vec!["a", "b"]).delay_elements(Duration::from_millis(100)),
      Flux::from_sequence(vec!["c", "d"]),
    ])
    .subscribe(probe.clone());

    probe.await_termination(Duration::from_secs(5));
    probe.assert_values(&["a", "b", "c", "d"]);
    probe.assert_complete();
  }

  #[test]
  fn fails_fast_on_inner_error() {
    let probe = TestSubscriber::unbounded();
    let failing = Flux::from_sequence(vec!["a", "b"])
      .try_map(|s| if s == "b" { Err("no b") } else { Ok(s) });
    Flux::merge_sequential(vec![failing, Flux::from_sequence(vec!["c", "d"])])
      .subscribe(probe.clone());
    probe.await_termination(Duration::from_secs(5));
    probe.assert_error(|e| matches!(e, Error::Transform(_)));
  }

  #[test]
  fn bounded_demand_pauses_at_the_head_slot() {
    let probe = TestSubscriber::with_demand(3);
    Flux::from_sequence(vec![1, 2])
      .flat_map_sequential(|v| Flux::from_sequence(vec![v, v]))
      .subscribe(probe.clone());
    probe.assert_values(&[1, 1, 2]);
    probe.assert_not_terminated();

    probe.request(1);
    probe.assert_values(&[1, 1, 2, 2]);
    probe.assert_complete();
  }
}
