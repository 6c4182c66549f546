//! Adapters for computations that block the calling thread.
//!
//! The computation runs inside the `defer` expansion, i.e. at subscribe
//! time, so `subscribe_on(Schedulers::bounded_elastic())` relocates it onto
//! a context sized for blocking work. A runtime guard rejects execution on
//! any other context instead of silently stalling it.

use crate::{error::Error, flux::Flux, scheduler::Schedulers};

pub(crate) fn from_blocking_call<T>(
  call: impl Fn() -> Result<T, Error> + Send + Sync + 'static,
) -> Flux<T>
where
  T: Clone + Send + Sync + 'static,
{
  Flux::defer(move || {
    match Schedulers::ensure_blocking_permitted().and_then(|_| call()) {
      Ok(value) => Flux::just(value),
      Err(error) => Flux::error(error),
    }
  })
}

pub(crate) fn from_blocking_sequence<T>(
  call: impl Fn() -> Result<Vec<T>, Error> + Send + Sync + 'static,
) -> Flux<T>
where
  T: Clone + Send + Sync + 'static,
{
  Flux::defer(move || {
    match Schedulers::ensure_blocking_permitted().and_then(|_| call()) {
      Ok(values) => Flux::from_sequence(values),
      Err(error) => Flux::error(error),
    }
  })
}

#[cfg(test)]
mod test {
  use std::time::Duration;

  use crate::{prelude::*, testing::TestSubscriber};

  #[test]
  fn blocking_call_is_denied_off_the_elastic_context() {
    let probe = TestSubscriber::unbounded();
    Flux::from_blocking_call(|| Ok(42)).subscribe(probe.clone());
    probe.assert_error(|e| matches!(e, Error::BlockingDenied(_)));
  }

  #[test]
  fn blocking_call_runs_when_relocated_to_bounded_elastic() {
    let probe = TestSubscriber::unbounded();
    Flux::from_blocking_call(|| Ok(42))
      .subscribe_on(Schedulers::bounded_elastic())
      .subscribe(probe.clone());
    probe.await_termination(Duration::from_secs(5));
    probe.assert_values(&[42]);
    probe.assert_complete();
  }

  #[test]
  fn blocking_sequence_emits_every_line() {
    let probe = TestSubscriber::unbounded();
    Flux::from_blocking_sequence(|| {
      // Stand-in for a file read; must still run on the elastic context.
      Ok(vec!["line 1".to_owned(), "line 2".to_owned()])
    })
    .subscribe_on(Schedulers::bounded_elastic())
    .subscribe(probe.clone());
    probe.await_termination(Duration::from_secs(5));
    probe.assert_values(&["line 1".to_owned(), "line 2".to_owned()]);
    probe.assert_complete();
  }

  #[test]
  fn blocking_failure_propagates_as_source_error() {
    let probe = TestSubscriber::<i32>::unbounded();
    Flux::from_blocking_call(|| Err(Error::source("disk on fire")))
      .subscribe_on(Schedulers::bounded_elastic())
      .subscribe(probe.clone());
    probe.await_termination(Duration::from_secs(5));
    probe.assert_error(|e| e == &Error::source("disk on fire"));
  }
}
