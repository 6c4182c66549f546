//! Demand-driven source over a fixed sequence.
//!
//! This is the reference implementation of the drain trampoline every
//! other demand-honoring stage follows: demand lands in an atomic counter,
//! a wip guard serializes emission, and synchronous re-entrant `request`
//! calls from inside `on_next` never grow the stack.

use std::sync::{
  atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
  Arc, Mutex,
};

use crate::{
  error::Error,
  publisher::Publisher,
  subscriber::Subscriber,
  subscription::{Demand, Subscription},
};

pub struct FromSequence<T> {
  values: Arc<Vec<T>>,
}

impl<T> FromSequence<T> {
  pub fn new(values: Vec<T>) -> Self {
    FromSequence {
      values: Arc::new(values),
    }
  }
}

impl<T> Publisher<T> for FromSequence<T>
where
  T: Clone + Send + Sync + 'static,
{
  fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
    SequenceSubscription::start(self.values.clone(), subscriber);
  }
}

struct SequenceSubscription<T> {
  values: Arc<Vec<T>>,
  index: AtomicUsize,
  demand: Demand,
  wip: AtomicU64,
  cancelled: AtomicBool,
  invalid: AtomicBool,
  subscriber: Mutex<Option<Box<dyn Subscriber<T>>>>,
}

impl<T> SequenceSubscription<T>
where
  T: Clone + Send + Sync + 'static,
{
  fn start(values: Arc<Vec<T>>, subscriber: Box<dyn Subscriber<T>>) {
    let subscription = Arc::new(SequenceSubscription {
      values,
      index: AtomicUsize::new(0),
      demand: Demand::new(),
      wip: AtomicU64::new(0),
      cancelled: AtomicBool::new(false),
      invalid: AtomicBool::new(false),
      subscriber: Mutex::new(Some(subscriber)),
    });

    {
      // Hold the drain ticket through on_subscribe: a re-entrant request
      // only bumps demand, emission happens below on this frame.
      let mut guard = subscription.subscriber.lock().unwrap();
      subscription.wip.fetch_add(1, Ordering::AcqRel);
      if let Some(subscriber) = guard.as_mut() {
        let handle: Arc<dyn Subscription> = subscription.clone();
        subscriber.on_subscribe(handle);
      }
    }
    subscription.drain_loop();
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
    let mut guard = self.subscriber.lock().unwrap();
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
        if let Some(mut subscriber) = guard.take() {
          subscriber.on_error(Error::InvalidDemand(0));
        }
        return;
      }
      let index = self.index.load(Ordering::Acquire);
      if index >= self.values.len() {
        // Completion does not consume demand; an empty or exhausted
        // sequence completes without any request.
        if let Some(mut subscriber) = guard.take() {
          subscriber.on_complete();
        }
        return;
      }
      if !self.demand.try_claim() {
        return;
      }
      self.index.store(index + 1, Ordering::Release);
      if let Some(subscriber) = guard.as_mut() {
        subscriber.on_next(self.values[index].clone());
      }
    }
  }
}

impl<T> Subscription for SequenceSubscription<T>
where
  T: Clone + Send + Sync + 'static,
{
  fn request(&self, n: u64) {
    if self.cancelled.load(Ordering::Acquire) {
      return;
    }
    if n == 0 {
      self.invalid.store(true, Ordering::Release);
    } else {
      self.demand.add(n);
    }
    self.drain();
  }

  fn cancel(&self) { self.cancelled.store(true, Ordering::Release); }
}
