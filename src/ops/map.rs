//! Value transformation stage. Demand passes through 1:1, so the upstream
//! subscription is handed to the downstream unchanged.

use std::sync::Arc;

use crate::{
  error::Error,
  flux::Flux,
  publisher::Publisher,
  subscriber::Subscriber,
  subscription::Subscription,
};

type TransformFn<T, R> = Arc<dyn Fn(T) -> Result<R, Error> + Send + Sync>;

pub struct MapOp<T: Send + 'static, R: Send + 'static> {
  source: Flux<T>,
  f: TransformFn<T, R>,
}

impl<T: Send + 'static, R: Send + 'static> MapOp<T, R> {
  pub fn new(source: Flux<T>, f: impl Fn(T) -> Result<R, Error> + Send + Sync + 'static) -> Self {
    MapOp {
      source,
      f: Arc::new(f),
    }
  }
}

impl<T: Send + 'static, R: Send + 'static> Publisher<R> for MapOp<T, R> {
  fn subscribe(&self, subscriber: Box<dyn Subscriber<R>>) {
    self.source.subscribe_dyn(Box::new(MapSubscriber {
      downstream: subscriber,
      f: self.f.clone(),
      upstream: None,
      done: false,
    }));
  }
}

struct MapSubscriber<T, R> {
  downstream: Box<dyn Subscriber<R>>,
  f: TransformFn<T, R>,
  upstream: Option<Arc<dyn Subscription>>,
  done: bool,
}

impl<T: Send + 'static, R: Send + 'static> Subscriber<T> for MapSubscriber<T, R> {
  fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
    self.upstream = Some(subscription.clone());
    self.downstream.on_subscribe(subscription);
  }

  fn on_next(&mut self, value: T) {
    if self.done {
      return;
    }
    match (self.f)(value) {
      Ok(mapped) => self.downstream.on_next(mapped),
      Err(error) => {
        // A failed transform cancels upstream so nothing races past the
        // terminal error.
        self.done = true;
        if let Some(upstream) = &self.upstream {
          upstream.cancel();
        }
        self.downstream.on_error(error);
      }
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

#[cfg(test)]
mod test {
  use crate::{prelude::*, testing::TestSubscriber};

  #[test]
  fn maps_every_value() {
    let probe = TestSubscriber::unbounded();
    Flux::range(1, 4).map(|v| v * 2).subscribe(probe.clone());
    probe.assert_values(&[2, 4, 6, 8]);
    probe.assert_complete();
  }

  #[test]
  fn failed_transform_terminates_with_transform_error() {
    let probe = TestSubscriber::unbounded();
    Flux::from_sequence(vec!["a", "b", "c"])
      .try_map(|s| if s == "b" { Err("rejected b") } else { Ok(s) })
      .subscribe(probe.clone());
    probe.assert_values(&["a"]);
    probe.assert_error(|e| e == &Error::transform("rejected b"));
  }

  #[test]
  fn nothing_is_delivered_after_the_error() {
    let probe = TestSubscriber::unbounded();
    Flux::from_sequence(vec![1, 2, 3, 4])
      .try_map(|v| if v == 2 { Err("boom") } else { Ok(v) })
      .subscribe(probe.clone());
    probe.assert_values(&[1]);
    probe.assert_error(|e| matches!(e, Error::Transform(_)));
  }

  #[test]
  fn map_respects_bounded_demand() {
    let probe = TestSubscriber::with_demand(2);
    Flux::range(1, 4).map(|v| v + 10).subscribe(probe.clone());
    probe.assert_values(&[11, 12]);
    probe.assert_not_terminated();
  }
}
