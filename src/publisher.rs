//! Publisher trait: the producer half of the signal protocol.

use crate::subscriber::Subscriber;

/// An immutable, restartable description of a sequence of values.
///
/// Publishers are cold: constructing one performs no work; every
/// `subscribe` starts an independent execution. The trait is object-safe so
/// heterogeneous pipelines can be stored behind `Arc<dyn Publisher<T>>`
/// (see [`Flux`](crate::flux::Flux)).
pub trait Publisher<T: Send + 'static>: Send + Sync + 'static {
  /// Starts a new execution delivering its signals to `subscriber`.
  ///
  /// Implementations must call `on_subscribe` exactly once before any
  /// other signal and must honor the demand granted through the handed-out
  /// subscription.
  fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>);
}
