//! Predicate stage. Dropped values are compensated with `request(1)`
//! upstream so downstream demand is never starved.

use std::sync::Arc;

use crate::{
  error::Error,
  flux::Flux,
  publisher::Publisher,
  subscriber::Subscriber,
  subscription::Subscription,
};

pub struct FilterOp<T: Send + 'static> {
  source: Flux<T>,
  predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T: Send + 'static> FilterOp<T> {
  pub fn new(source: Flux<T>, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
    FilterOp {
      source,
      predicate: Arc::new(predicate),
    }
  }
}

impl<T: Send + 'static> Publisher<T> for FilterOp<T> {
  fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
    self.source.subscribe_dyn(Box::new(FilterSubscriber {
      downstream: subscriber,
      predicate: self.predicate.clone(),
      upstream: None,
      done: false,
    }));
  }
}

struct FilterSubscriber<T> {
  downstream: Box<dyn Subscriber<T>>,
  predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
  upstream: Option<Arc<dyn Subscription>>,
  done: bool,
}

impl<T: Send + 'static> Subscriber<T> for FilterSubscriber<T> {
  fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
    self.upstream = Some(subscription.clone());
    self.downstream.on_subscribe(subscription);
  }

  fn on_next(&mut self, value: T) {
    if self.done {
      return;
    }
    if (self.predicate)(&value) {
      self.downstream.on_next(value);
    } else if let Some(upstream) = &self.upstream {
      upstream.request(1);
    }
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
