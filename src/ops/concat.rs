//! Sequential concatenation: source k+1 is subscribed only after source k
//! completed. A wip-guarded loop walks the source list so chains of
//! synchronously completing sources do not recurse.

use std::sync::{
  atomic::{AtomicBool, AtomicUsize, Ordering},
  Arc, Mutex,
};

use smallvec::SmallVec;

use crate::{
  error::Error,
  flux::Flux,
  publisher::Publisher,
  subscriber::Subscriber,
  subscription::{ArbiterSubscription, Subscription},
};

pub struct ConcatOp<T: Send + 'static> {
  sources: Vec<Flux<T>>,
  delay_error: bool,
}

impl<T: Send + 'static> ConcatOp<T> {
  pub fn new(sources: Vec<Flux<T>>, delay_error: bool) -> Self {
    ConcatOp {
      sources,
      delay_error,
    }
  }
}

impl<T: Send + 'static> Publisher<T> for ConcatOp<T> {
  fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
    let coordinator = Arc::new(ConcatCoordinator {
      sources: self.sources.clone(),
      next_index: AtomicUsize::new(0),
      arbiter: ArbiterSubscription::new(),
      downstream: Mutex::new(Some(subscriber)),
      errors: Mutex::new(SmallVec::new()),
      delay_error: self.delay_error,
      wip: AtomicUsize::new(0),
      done: AtomicBool::new(false),
    });

    {
      let mut guard = coordinator.downstream.lock().unwrap();
      if let Some(downstream) = guard.as_mut() {
        let handle: Arc<dyn Subscription> = coordinator.arbiter.clone();
        downstream.on_subscribe(handle);
      }
    }
    coordinator.subscribe_next();
  }
}

struct ConcatCoordinator<T: Send + 'static> {
  sources: Vec<Flux<T>>,
  next_index: AtomicUsize,
  arbiter: Arc<ArbiterSubscription>,
  downstream: Mutex<Option<Box<dyn Subscriber<T>>>>,
  errors: Mutex<SmallVec<[Error; 2]>>,
  delay_error: bool,
  wip: AtomicUsize,
  done: AtomicBool,
}

impl<T: Send + 'static> ConcatCoordinator<T> {
  /// Subscribes the next source, looping instead of recursing when sources
  /// complete synchronously.
  fn subscribe_next(self: &Arc<Self>) {
    if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
      return;
    }
    loop {
      if self.done.load(Ordering::Acquire) || self.arbiter.is_cancelled() {
        break;
      }
      let index = self.next_index.fetch_add(1, Ordering::AcqRel);
      if index >= self.sources.len() {
        self.finish();
        break;
      }
      self.sources[index].subscribe_dyn(Box::new(ConcatInner {
        parent: self.clone(),
        done: false,
      }));
      if self.wip.fetch_sub(1, Ordering::AcqRel) == 1 {
        break;
      }
    }
  }

  fn finish(&self) {
    if self.done.swap(true, Ordering::AcqRel) {
      return;
    }
    let errors = std::mem::take(&mut *self.errors.lock().unwrap());
    if let Some(mut downstream) = self.downstream.lock().unwrap().take() {
      if errors.is_empty() {
        downstream.on_complete();
      } else {
        downstream.on_error(Error::compose(errors));
      }
    }
  }

  fn fail(&self, error: Error) {
    if self.done.swap(true, Ordering::AcqRel) {
      return;
    }
    if let Some(mut downstream) = self.downstream.lock().unwrap().take() {
      downstream.on_error(error);
    }
  }
}

struct ConcatInner<T: Send + 'static> {
  parent: Arc<ConcatCoordinator<T>>,
  done: bool,
}

impl<T: Send + 'static> Subscriber<T> for ConcatInner<T> {
  fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
    self.parent.arbiter.set_current(subscription);
  }

  fn on_next(&mut self, value: T) {
    if self.done {
      return;
    }
    self.parent.arbiter.produced(1);
    if let Some(downstream) = self.parent.downstream.lock().unwrap().as_mut() {
      downstream.on_next(value);
    }
  }

  fn on_complete(&mut self) {
    if self.done {
      return;
    }
    self.done = true;
    self.parent.subscribe_next();
  }

  fn on_error(&mut self, error: Error) {
    if self.done {
      return;
    }
    self.done = true;
    if self.parent.delay_error {
      self.parent.errors.lock().unwrap().push(error);
      // The failed source counts as finished; the rest still run.
      self.parent.subscribe_next();
    } else {
      self.parent.fail(error);
    }
  }
}
