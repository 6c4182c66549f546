//! Spaces out values by a fixed delay.
//!
//! Each value is handed to a serial worker whose job sleeps for the delay
//! before delivering, so consecutive values are at least `delay` apart and
//! order is preserved. The sleep occupies a pool thread, which is why the
//! default context is the blocking-capable one.

use std::{
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
  },
  thread,
  time::Duration,
};

use crate::{
  error::Error,
  flux::Flux,
  publisher::Publisher,
  scheduler::{Scheduler, Worker},
  subscriber::Subscriber,
  subscription::Subscription,
};

pub struct DelayElementsOp<T: Send + 'static> {
  source: Flux<T>,
  delay: Duration,
  scheduler: Scheduler,
}

impl<T: Send + 'static> DelayElementsOp<T> {
  pub fn new(source: Flux<T>, delay: Duration, scheduler: Scheduler) -> Self {
    DelayElementsOp {
      source,
      delay,
      scheduler,
    }
  }
}

impl<T: Send + 'static> Publisher<T> for DelayElementsOp<T> {
  fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
    self.source.subscribe_dyn(Box::new(DelaySubscriber {
      downstream: Arc::new(Mutex::new(Some(subscriber))),
      worker: self.scheduler.create_worker(),
      delay: self.delay,
      cancelled: Arc::new(AtomicBool::new(false)),
      done: false,
    }));
  }
}

struct DelaySubscriber<T: Send + 'static> {
  downstream: Arc<Mutex<Option<Box<dyn Subscriber<T>>>>>,
  worker: Worker,
  delay: Duration,
  cancelled: Arc<AtomicBool>,
  done: bool,
}

impl<T: Send + 'static> Subscriber<T> for DelaySubscriber<T> {
  fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
    let handle = Arc::new(DelaySubscription {
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
    let delay = self.delay;
    self.worker.schedule(move || {
      thread::sleep(delay);
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
    // Errors are not delayed; only the values still queued ahead of this
    // job hold it back.
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

struct DelaySubscription {
  upstream: Arc<dyn Subscription>,
  cancelled: Arc<AtomicBool>,
}

impl Subscription for DelaySubscription {
  fn request(&self, n: u64) {
    self.upstream.request(n);
  }

  fn cancel(&self) {
    self.cancelled.store(true, Ordering::Release);
    self.upstream.cancel();
  }
}
