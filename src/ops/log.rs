//! Observability tap: traces every protocol signal of one stage through
//! the `tracing` facade, including the demand flowing back upstream.

use std::{fmt::Debug, sync::Arc};

use crate::{
  error::Error,
  flux::Flux,
  publisher::Publisher,
  subscriber::Subscriber,
  subscription::Subscription,
};

pub struct LogOp<T: Send + 'static> {
  source: Flux<T>,
  category: String,
}

impl<T: Send + 'static> LogOp<T> {
  pub fn new(source: Flux<T>, category: &str) -> Self {
    LogOp {
      source,
      category: category.to_owned(),
    }
  }
}

impl<T: Send + Debug + 'static> Publisher<T> for LogOp<T> {
  fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
    self.source.subscribe_dyn(Box::new(LogSubscriber {
      downstream: subscriber,
      category: Arc::new(self.category.clone()),
    }));
  }
}

struct LogSubscriber<T> {
  downstream: Box<dyn Subscriber<T>>,
  category: Arc<String>,
}

impl<T: Send + Debug + 'static> Subscriber<T> for LogSubscriber<T> {
  fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
    tracing::debug!(target: "rill", category = %self.category, "onSubscribe");
    self.downstream.on_subscribe(Arc::new(LogSubscription {
      inner: subscription,
      category: self.category.clone(),
    }));
  }

  fn on_next(&mut self, value: T) {
    tracing::debug!(target: "rill", category = %self.category, "onNext({value:?})");
    self.downstream.on_next(value);
  }

  fn on_complete(&mut self) {
    tracing::debug!(target: "rill", category = %self.category, "onComplete");
    self.downstream.on_complete();
  }

  fn on_error(&mut self, error: Error) {
    tracing::debug!(target: "rill", category = %self.category, %error, "onError");
    self.downstream.on_error(error);
  }
}

struct LogSubscription {
  inner: Arc<dyn Subscription>,
  category: Arc<String>,
}

impl Subscription for LogSubscription {
  fn request(&self, n: u64) {
    tracing::debug!(target: "rill", category = %self.category, "request({n})");
    self.inner.request(n);
  }

  fn cancel(&self) {
    tracing::debug!(target: "rill", category = %self.category, "cancel");
    self.inner.cancel();
  }
}
