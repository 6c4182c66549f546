//! Test-side subscriber probe.
//!
//! [`TestSubscriber`] records every signal it receives together with the
//! delivering thread's name, exposes the demand modes the protocol tests
//! need, and offers blocking waits for pipelines that signal from pool
//! threads. Clones share one recording, so a test can keep a handle while
//! handing the probe to `subscribe`.

use std::{
  sync::{Arc, Condvar, Mutex},
  thread,
  time::{Duration, Instant},
};

use crate::{
  error::Error,
  subscriber::Subscriber,
  subscription::{Subscription, UNBOUNDED},
};

#[derive(Clone, Copy)]
enum DemandMode {
  Unbounded,
  Fixed(u64),
  Stepping(u64),
  RequestZero,
}

struct Recording<T> {
  values: Vec<T>,
  threads: Vec<String>,
  complete: bool,
  error: Option<Error>,
  subscription: Option<Arc<dyn Subscription>>,
  deferred_requests: Vec<u64>,
}

struct State<T> {
  recording: Mutex<Recording<T>>,
  signal: Condvar,
  mode: DemandMode,
}

pub struct TestSubscriber<T: Send + 'static> {
  state: Arc<State<T>>,
}

impl<T: Send + 'static> Clone for TestSubscriber<T> {
  fn clone(&self) -> Self {
    TestSubscriber {
      state: self.state.clone(),
    }
  }
}

impl<T: Send + 'static> TestSubscriber<T> {
  fn with_mode(mode: DemandMode) -> Self {
    TestSubscriber {
      state: Arc::new(State {
        recording: Mutex::new(Recording {
          values: Vec::new(),
          threads: Vec::new(),
          complete: false,
          error: None,
          subscription: None,
          deferred_requests: Vec::new(),
        }),
        signal: Condvar::new(),
        mode,
      }),
    }
  }

  /// Requests everything up front.
  pub fn unbounded() -> Self { TestSubscriber::with_mode(DemandMode::Unbounded) }

  /// Requests exactly `n` at subscribe time; `0` means no initial request
  /// at all. Top up later with [`TestSubscriber::request`].
  pub fn with_demand(n: u64) -> Self { TestSubscriber::with_mode(DemandMode::Fixed(n)) }

  /// Requests `n` at subscribe time and again after every received value,
  /// which drives re-entrant request paths.
  pub fn stepping(n: u64) -> Self { TestSubscriber::with_mode(DemandMode::Stepping(n)) }

  /// Issues the illegal `request(0)` at subscribe time.
  pub fn requesting_zero() -> Self { TestSubscriber::with_mode(DemandMode::RequestZero) }

  /// Additional demand from the test thread.
  pub fn request(&self, n: u64) {
    let subscription = {
      let mut recording = self.state.recording.lock().unwrap();
      match &recording.subscription {
        Some(subscription) => Some(subscription.clone()),
        None => {
          recording.deferred_requests.push(n);
          None
        }
      }
    };
    if let Some(subscription) = subscription {
      subscription.request(n);
    }
  }

  pub fn cancel(&self) {
    let subscription = self.state.recording.lock().unwrap().subscription.clone();
    if let Some(subscription) = subscription {
      subscription.cancel();
    }
  }

  pub fn values(&self) -> Vec<T>
  where
    T: Clone,
  {
    self.state.recording.lock().unwrap().values.clone()
  }

  /// Names of the threads that delivered each value, in delivery order.
  pub fn delivery_threads(&self) -> Vec<String> {
    self.state.recording.lock().unwrap().threads.clone()
  }

  pub fn assert_values(&self, expected: &[T])
  where
    T: PartialEq + std::fmt::Debug,
  {
    let recording = self.state.recording.lock().unwrap();
    assert_eq!(recording.values.as_slice(), expected);
  }

  pub fn assert_complete(&self) {
    let recording = self.state.recording.lock().unwrap();
    if let Some(error) = &recording.error {
      panic!("expected completion but stream errored: {error}");
    }
    assert!(recording.complete, "stream has not completed");
  }

  pub fn assert_error(&self, predicate: impl Fn(&Error) -> bool) {
    let recording = self.state.recording.lock().unwrap();
    match &recording.error {
      Some(error) => assert!(predicate(error), "unexpected error: {error}"),
      None => panic!("expected an error signal"),
    }
  }

  pub fn assert_not_terminated(&self) {
    let recording = self.state.recording.lock().unwrap();
    assert!(!recording.complete, "stream completed unexpectedly");
    if let Some(error) = &recording.error {
      panic!("stream errored unexpectedly: {error}");
    }
  }

  /// Blocks until a terminal signal arrives; panics after `timeout`.
  pub fn await_termination(&self, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    let mut recording = self.state.recording.lock().unwrap();
    while !recording.complete && recording.error.is_none() {
      let remaining = deadline.saturating_duration_since(Instant::now());
      if remaining.is_zero() {
        panic!("timed out waiting for termination");
      }
      let (guard, _) = self.state.signal.wait_timeout(recording, remaining).unwrap();
      recording = guard;
    }
  }

  /// Blocks until at least `count` values arrived; panics after `timeout`.
  pub fn await_values(&self, count: usize, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    let mut recording = self.state.recording.lock().unwrap();
    while recording.values.len() < count {
      let remaining = deadline.saturating_duration_since(Instant::now());
      if remaining.is_zero() {
        panic!(
          "timed out waiting for {count} values, saw {}",
          recording.values.len()
        );
      }
      let (guard, _) = self.state.signal.wait_timeout(recording, remaining).unwrap();
      recording = guard;
    }
  }
}

impl<T: Send + 'static> Subscriber<T> for TestSubscriber<T> {
  fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
    let deferred = {
      let mut recording = self.state.recording.lock().unwrap();
      recording.subscription = Some(subscription.clone());
      std::mem::take(&mut recording.deferred_requests)
    };
    match self.state.mode {
      DemandMode::Unbounded => subscription.request(UNBOUNDED),
      DemandMode::Fixed(0) => {}
      DemandMode::Fixed(n) => subscription.request(n),
      DemandMode::Stepping(n) => subscription.request(n),
      DemandMode::RequestZero => subscription.request(0),
    }
    for n in deferred {
      subscription.request(n);
    }
  }

  fn on_next(&mut self, value: T) {
    let step = {
      let mut recording = self.state.recording.lock().unwrap();
      recording.values.push(value);
      recording
        .threads
        .push(thread::current().name().unwrap_or("<unnamed>").to_owned());
      match self.state.mode {
        DemandMode::Stepping(n) => recording.subscription.clone().map(|s| (s, n)),
        _ => None,
      }
    };
    self.state.signal.notify_all();
    // Requested outside the lock; a synchronous upstream may re-enter
    // on_next from this call.
    if let Some((subscription, n)) = step {
      subscription.request(n);
    }
  }

  fn on_complete(&mut self) {
    self.state.recording.lock().unwrap().complete = true;
    self.state.signal.notify_all();
  }

  fn on_error(&mut self, error: Error) {
    self.state.recording.lock().unwrap().error = Some(error);
    self.state.signal.notify_all();
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::prelude::*;

  #[test]
  fn records_values_and_completion() {
    let probe = TestSubscriber::unbounded();
    Flux::from_sequence(vec![1, 2, 3]).subscribe(probe.clone());
    probe.assert_values(&[1, 2, 3]);
    probe.assert_complete();
  }

  #[test]
  fn fixed_demand_of_zero_requests_nothing() {
    let probe = TestSubscriber::with_demand(0);
    Flux::from_sequence(vec![1, 2, 3]).subscribe(probe.clone());
    probe.assert_values(&[]);
    probe.assert_not_terminated();
  }

  #[test]
  fn stepping_walks_the_whole_sequence() {
    let probe = TestSubscriber::stepping(1);
    Flux::from_sequence(vec![1, 2, 3]).subscribe(probe.clone());
    probe.assert_values(&[1, 2, 3]);
    probe.assert_complete();
  }

  #[test]
  fn records_the_error_signal() {
    let probe = TestSubscriber::<i32>::unbounded();
    Flux::error(Error::source("kaput")).subscribe(probe.clone());
    probe.assert_error(|e| e == &Error::source("kaput"));
  }
}
