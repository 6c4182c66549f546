//! Lazily assembled source: the factory runs fresh on every subscribe.

use crate::{flux::Flux, publisher::Publisher, subscriber::Subscriber};

pub struct DeferPublisher<T: Send + 'static> {
  factory: Box<dyn Fn() -> Flux<T> + Send + Sync>,
}

impl<T: Send + 'static> DeferPublisher<T> {
  pub fn new(factory: impl Fn() -> Flux<T> + Send + Sync + 'static) -> Self {
    DeferPublisher {
      factory: Box::new(factory),
    }
  }
}

impl<T: Send + 'static> Publisher<T> for DeferPublisher<T> {
  fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
    (self.factory)().subscribe_dyn(subscriber);
  }
}

#[cfg(test)]
mod test {
  use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  };

  use crate::{prelude::*, testing::TestSubscriber};

  #[test]
  fn factory_runs_once_per_subscription() {
    let calls = Arc::new(AtomicUsize::new(0));
    let factory_calls = calls.clone();
    let deferred = Flux::defer(move || {
      let n = factory_calls.fetch_add(1, Ordering::SeqCst) + 1;
      Flux::just(n)
    });

    assert_eq!(calls.load(Ordering::SeqCst), 0, "cold before subscribe");

    let mut seen = Vec::new();
    for _ in 0..3 {
      let probe = TestSubscriber::unbounded();
      deferred.clone().subscribe(probe.clone());
      probe.assert_complete();
      seen.extend(probe.values());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(seen, vec![1, 2, 3], "each subscriber observes fresh state");
  }

  #[test]
  fn eager_just_captures_its_value_once() {
    let counter = Arc::new(AtomicUsize::new(0));
    let eager = Flux::just(counter.fetch_add(1, Ordering::SeqCst) + 1);

    let mut seen = Vec::new();
    for _ in 0..3 {
      let probe = TestSubscriber::unbounded();
      eager.clone().subscribe(probe.clone());
      seen.extend(probe.values());
    }

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(seen, vec![1, 1, 1], "same captured value for everyone");
  }
}
