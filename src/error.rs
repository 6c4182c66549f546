//! Error taxonomy of the runtime.
//!
//! Every failure that can terminate a subscription is folded into one
//! [`Error`] enum so stages can forward it through `on_error` without
//! generic error parameters on the protocol traits.

use smallvec::SmallVec;
use thiserror::Error;

/// Terminal error delivered through `Subscriber::on_error`.
///
/// A subscription observes at most one of these; delay-error combinators
/// may merge several deferred failures into a single [`Error::Composite`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
  /// A transformation function supplied to a stage (e.g. `try_map`) failed.
  #[error("transform function failed: {0}")]
  Transform(String),

  /// `request(n)` was called with a non-positive demand.
  #[error("invalid demand: request({0}), demand must be positive")]
  InvalidDemand(u64),

  /// A source's own value generation failed.
  #[error("source failed: {0}")]
  Source(String),

  /// A blocking computation was attempted on a worker context that is not
  /// sized for blocking work.
  #[error("blocking call denied on thread `{0}`")]
  BlockingDenied(String),

  /// Several deferred errors merged by a delay-error combinator.
  ///
  /// The contained order is unspecified: sources may fail concurrently.
  #[error("{} sources failed", .0.len())]
  Composite(Vec<Error>),
}

impl Error {
  pub fn transform(msg: impl Into<String>) -> Self { Error::Transform(msg.into()) }

  pub fn source(msg: impl Into<String>) -> Self { Error::Source(msg.into()) }

  /// Collapses the errors buffered by a delay-error combinator: a single
  /// failure keeps its identity, several become a composite.
  pub(crate) fn compose(mut errors: SmallVec<[Error; 2]>) -> Self {
    if errors.len() == 1 {
      errors.remove(0)
    } else {
      Error::Composite(errors.into_vec())
    }
  }

  pub fn is_composite(&self) -> bool { matches!(self, Error::Composite(_)) }
}

#[cfg(test)]
mod test {
  use super::*;
  use smallvec::smallvec;

  #[test]
  fn compose_single_keeps_identity() {
    let err = Error::compose(smallvec![Error::transform("boom")]);
    assert_eq!(err, Error::Transform("boom".to_owned()));
  }

  #[test]
  fn compose_many_builds_composite() {
    let err = Error::compose(smallvec![Error::transform("a"), Error::source("b")]);
    match err {
      Error::Composite(inner) => assert_eq!(inner.len(), 2),
      other => panic!("expected composite, got {other:?}"),
    }
  }

  #[test]
  fn display_names_the_failure() {
    assert_eq!(
      Error::InvalidDemand(0).to_string(),
      "invalid demand: request(0), demand must be positive"
    );
  }
}
