//! `Flux<T>`: the cheap, clonable handle every pipeline is built from.
//!
//! A `Flux` wraps an `Arc<dyn Publisher<T>>`; cloning it clones the
//! description, not an execution. All constructors and operators live here
//! as thin wrappers around the structs in `source/` and `ops/`.

use std::{fmt::Debug, fmt::Display, sync::Arc, time::Duration};

use crate::{
  error::Error,
  ops::{
    combine_latest::CombineLatestOp,
    concat::ConcatOp,
    delay_elements::DelayElementsOp,
    filter::FilterOp,
    flat_map::FlatMapOp,
    flat_map_sequential::FlatMapSequentialOp,
    log::LogOp,
    map::MapOp,
    publish_on::PublishOnOp,
    subscribe_on::SubscribeOnOp,
    switch_if_empty::SwitchIfEmptyOp,
    zip::ZipOp,
  },
  publisher::Publisher,
  scheduler::{Scheduler, Schedulers},
  source::{
    blocking,
    defer::DeferPublisher,
    from_sequence::FromSequence,
    trivial::{EmptyPublisher, ErrorPublisher},
  },
  subscriber::{FnSubscriber, Subscriber},
};

/// A cold, restartable stream description.
///
/// ```rust
/// use rill::prelude::*;
///
/// Flux::from_sequence(vec![1, 2, 3])
///   .map(|v| v * 2)
///   .subscribe_fn(|v| println!("{v}"));
/// ```
pub struct Flux<T: Send + 'static> {
  inner: Arc<dyn Publisher<T>>,
}

impl<T: Send + 'static> Clone for Flux<T> {
  fn clone(&self) -> Self {
    Flux {
      inner: self.inner.clone(),
    }
  }
}

impl<T: Send + 'static> Flux<T> {
  /// Wraps a publisher implementation into a handle.
  pub fn from_publisher(publisher: impl Publisher<T>) -> Flux<T> {
    Flux {
      inner: Arc::new(publisher),
    }
  }

  // ==================== subscribing ====================

  /// Starts an independent execution feeding `subscriber`.
  pub fn subscribe(&self, subscriber: impl Subscriber<T>) {
    self.inner.subscribe(Box::new(subscriber));
  }

  /// `subscribe` for an already boxed subscriber; used by operator stages.
  pub fn subscribe_dyn(&self, subscriber: Box<dyn Subscriber<T>>) {
    self.inner.subscribe(subscriber);
  }

  /// Convenience subscribe with unbounded demand and a value callback.
  pub fn subscribe_fn(&self, next: impl FnMut(T) + Send + 'static) {
    self.subscribe(FnSubscriber::new(next));
  }

  // ==================== sources ====================

  /// Emits each value of `values` in order, honoring demand, then
  /// completes.
  pub fn from_sequence(values: Vec<T>) -> Flux<T>
  where
    T: Clone + Sync,
  {
    Flux::from_publisher(FromSequence::new(values))
  }

  /// One-element source. The value is captured eagerly, at construction
  /// time; contrast with [`Flux::defer`].
  pub fn just(value: T) -> Flux<T>
  where
    T: Clone + Sync,
  {
    Flux::from_sequence(vec![value])
  }

  /// Completes immediately without emitting.
  pub fn empty() -> Flux<T> { Flux::from_publisher(EmptyPublisher::new()) }

  /// Errors immediately after `on_subscribe`, without demand.
  pub fn error(error: Error) -> Flux<T> { Flux::from_publisher(ErrorPublisher::new(error)) }

  /// Runs `factory` fresh on every subscribe, so each subscriber observes
  /// independently computed state.
  pub fn defer(factory: impl Fn() -> Flux<T> + Send + Sync + 'static) -> Flux<T> {
    Flux::from_publisher(DeferPublisher::new(factory))
  }

  /// Wraps a blocking computation producing one value.
  ///
  /// The computation runs at subscribe time and must execute on a
  /// blocking-capable context; pair it with
  /// `subscribe_on(Schedulers::bounded_elastic())`. Anywhere else the
  /// runtime guard rejects it with [`Error::BlockingDenied`].
  pub fn from_blocking_call(
    call: impl Fn() -> Result<T, Error> + Send + Sync + 'static,
  ) -> Flux<T>
  where
    T: Clone + Sync,
  {
    blocking::from_blocking_call(call)
  }

  /// Bulk variant of [`Flux::from_blocking_call`]: the computation returns
  /// a collection whose elements are emitted one by one.
  pub fn from_blocking_sequence(
    call: impl Fn() -> Result<Vec<T>, Error> + Send + Sync + 'static,
  ) -> Flux<T>
  where
    T: Clone + Sync,
  {
    blocking::from_blocking_sequence(call)
  }

  // ==================== multi-source combinators ====================

  /// Subscribes `sources` strictly sequentially; source k+1 starts only
  /// after source k completed. Fail-fast on error.
  pub fn concat(sources: Vec<Flux<T>>) -> Flux<T> {
    Flux::from_publisher(ConcatOp::new(sources, false))
  }

  /// [`Flux::concat`], but an intermediate error is buffered: remaining
  /// sources still run, already-produced values are still emitted, and the
  /// deferred error(s) surface only after the last source.
  pub fn concat_delay_error(sources: Vec<Flux<T>>) -> Flux<T> {
    Flux::from_publisher(ConcatOp::new(sources, true))
  }

  /// Subscribes all sources immediately and interleaves their values in
  /// arrival order. Completes once every source completed; fail-fast on
  /// the first error.
  pub fn merge(sources: Vec<Flux<T>>) -> Flux<T> {
    Flux::from_sequence(sources).flat_map(|source| source)
  }

  /// Merge with a concurrency cap and delayed errors: failures are held
  /// until all sources finished, then surfaced (composited when several).
  pub fn merge_delay_error(concurrency: usize, sources: Vec<Flux<T>>) -> Flux<T> {
    Flux::from_sequence(sources).flat_map_inner(|source| source, concurrency, true)
  }

  /// Subscribes sources concurrently but emits strictly in
  /// source-registration order, buffering out-of-order results.
  pub fn merge_sequential(sources: Vec<Flux<T>>) -> Flux<T> {
    Flux::from_sequence(sources).flat_map_sequential(|source| source)
  }

  /// Emits `combiner` over the most recent value of each side whenever
  /// either side emits, once both emitted at least once.
  pub fn combine_latest<A, B>(
    first: Flux<A>,
    second: Flux<B>,
    combiner: impl Fn(&A, &B) -> T + Send + Sync + 'static,
  ) -> Flux<T>
  where
    A: Send + 'static,
    B: Send + 'static,
  {
    Flux::from_publisher(CombineLatestOp::new(first, second, combiner))
  }

  // ==================== operators ====================

  /// Transforms each value. Demand passes through 1:1.
  pub fn map<R: Send + 'static>(self, f: impl Fn(T) -> R + Send + Sync + 'static) -> Flux<R> {
    Flux::from_publisher(MapOp::new(self, move |v| Ok(f(v))))
  }

  /// Fallible transform: an `Err` cancels upstream and forwards exactly
  /// one [`Error::Transform`] downstream.
  pub fn try_map<R, E>(self, f: impl Fn(T) -> Result<R, E> + Send + Sync + 'static) -> Flux<R>
  where
    R: Send + 'static,
    E: Display,
  {
    Flux::from_publisher(MapOp::new(self, move |v| {
      f(v).map_err(|e| Error::Transform(e.to_string()))
    }))
  }

  /// Keeps values matching `predicate`, re-requesting one upstream element
  /// per dropped value so downstream demand is not starved.
  pub fn filter(self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Flux<T> {
    Flux::from_publisher(FilterOp::new(self, predicate))
  }

  /// Switches to `alternate` if this stream completes without a value;
  /// `alternate` is never subscribed otherwise.
  pub fn switch_if_empty(self, alternate: Flux<T>) -> Flux<T> {
    Flux::from_publisher(SwitchIfEmptyOp::new(self, alternate))
  }

  /// Appends `other` after this stream completes.
  pub fn concat_with(self, other: Flux<T>) -> Flux<T> { Flux::concat(vec![self, other]) }

  /// Interleaves `other` with this stream.
  pub fn merge_with(self, other: Flux<T>) -> Flux<T> { Flux::merge(vec![self, other]) }

  /// Pairs this stream with `other`; see [`Flux::zip`].
  pub fn zip_with<U: Send + 'static>(self, other: Flux<U>) -> Flux<(T, U)> {
    Flux::zip(self, other)
  }

  /// Subscribes `f(value)` for every upstream value and merges the inner
  /// sequences in arrival order (interleaved across upstream values).
  pub fn flat_map<R: Send + 'static>(
    self,
    f: impl Fn(T) -> Flux<R> + Send + Sync + 'static,
  ) -> Flux<R> {
    self.flat_map_inner(f, usize::MAX, false)
  }

  pub(crate) fn flat_map_inner<R: Send + 'static>(
    self,
    f: impl Fn(T) -> Flux<R> + Send + Sync + 'static,
    concurrency: usize,
    delay_error: bool,
  ) -> Flux<R> {
    Flux::from_publisher(FlatMapOp::new(self, f, concurrency, delay_error))
  }

  /// Like [`Flux::flat_map`] but preserves upstream order in the output,
  /// buffering faster inner sequences until earlier ones finish.
  pub fn flat_map_sequential<R: Send + 'static>(
    self,
    f: impl Fn(T) -> Flux<R> + Send + Sync + 'static,
  ) -> Flux<R> {
    Flux::from_publisher(FlatMapSequentialOp::new(self, f, usize::MAX))
  }

  // ==================== scheduling ====================

  /// Relocates the subscription path, `subscribe()` and `request()`, onto
  /// `scheduler`. When nested, the application closest to the source
  /// determines where the source emits; outer ones are redundant.
  pub fn subscribe_on(self, scheduler: Scheduler) -> Flux<T> {
    Flux::from_publisher(SubscribeOnOp::new(self, scheduler))
  }

  /// Relocates downstream delivery from this stage onward onto a serial
  /// worker of `scheduler`. May appear several times in one chain, each
  /// taking effect for its own downstream segment.
  pub fn publish_on(self, scheduler: Scheduler) -> Flux<T> {
    Flux::from_publisher(PublishOnOp::new(self, scheduler))
  }

  /// Spaces deliveries `delay` apart on the shared bounded-elastic
  /// context.
  pub fn delay_elements(self, delay: Duration) -> Flux<T> {
    self.delay_elements_on(delay, Schedulers::bounded_elastic())
  }

  /// Spaces deliveries `delay` apart on a serial worker of `scheduler`.
  pub fn delay_elements_on(self, delay: Duration, scheduler: Scheduler) -> Flux<T> {
    Flux::from_publisher(DelayElementsOp::new(self, delay, scheduler))
  }

  // ==================== observability ====================

  /// Traces every protocol signal of this stage through the `tracing`
  /// facade at DEBUG level, tagged with `category`.
  pub fn log(self, category: &str) -> Flux<T>
  where
    T: Debug,
  {
    Flux::from_publisher(LogOp::new(self, category))
  }
}

// In its own impl block so `Self` is pinned to `Flux<(A, B)>` and plain
// `Flux::zip(a, b)` calls infer the element type from the arguments.
impl<A: Send + 'static, B: Send + 'static> Flux<(A, B)> {
  /// Pairs `first` and `second` index by index; completes as soon as either
  /// side can no longer form a pair (shortest source wins).
  pub fn zip(first: Flux<A>, second: Flux<B>) -> Flux<(A, B)> {
    Flux::from_publisher(ZipOp::new(first, second))
  }
}

impl Flux<i64> {
  /// `count` consecutive integers starting at `start`.
  pub fn range(start: i64, count: usize) -> Flux<i64> {
    Flux::from_sequence((0..count as i64).map(|i| start + i).collect())
  }
}
