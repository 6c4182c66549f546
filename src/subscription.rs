//! The demand/cancel half of the protocol.
//!
//! A [`Subscription`] is the live link between one publisher execution and
//! one subscriber: demand flows upstream through `request`, `cancel` tears
//! the link down. Demand bookkeeping is centralized in [`Demand`] so every
//! source and coordinator shares the same saturating, trampoline-friendly
//! counter.

use std::sync::{
  atomic::{AtomicU64, Ordering},
  Arc, Mutex,
};

/// Demand sentinel meaning "effectively unbounded".
///
/// `request` saturates here; an unbounded subscription never decrements.
pub const UNBOUNDED: u64 = u64::MAX;

/// The feedback channel from a subscriber to the publisher execution it is
/// attached to.
pub trait Subscription: Send + Sync + 'static {
  /// Grants `n` more elements of demand. Demand accumulates across calls
  /// and saturates at [`UNBOUNDED`].
  ///
  /// `request(0)` is a protocol violation and is reported through
  /// `on_error` with `Error::InvalidDemand`, never panicked across the
  /// subscribe boundary. After `cancel` this is a no-op.
  fn request(&self, n: u64);

  /// Stops delivery. Idempotent; once observed, no further signals reach
  /// the subscriber.
  fn cancel(&self);
}

/// Subscription handed to subscribers of sources that terminate without
/// ever honoring demand (`error(..)` and friends).
pub struct NoopSubscription;

impl Subscription for NoopSubscription {
  fn request(&self, _n: u64) {}

  fn cancel(&self) {}
}

/// Per-subscription demand counter.
///
/// A plain saturating atomic: publishers claim one unit per emitted value
/// unless the counter is pinned at [`UNBOUNDED`].
#[derive(Default)]
pub(crate) struct Demand(AtomicU64);

impl Demand {
  pub fn new() -> Self { Demand(AtomicU64::new(0)) }

  /// Adds `n` demand, saturating at [`UNBOUNDED`]. Returns the previous
  /// value.
  pub fn add(&self, n: u64) -> u64 {
    let mut current = self.0.load(Ordering::Acquire);
    loop {
      let next = current.saturating_add(n);
      match self
        .0
        .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
      {
        Ok(prev) => return prev,
        Err(observed) => current = observed,
      }
    }
  }

  /// Claims one unit of demand. Returns `false` when none is available.
  pub fn try_claim(&self) -> bool {
    let mut current = self.0.load(Ordering::Acquire);
    loop {
      if current == 0 {
        return false;
      }
      if current == UNBOUNDED {
        return true;
      }
      match self.0.compare_exchange_weak(
        current,
        current - 1,
        Ordering::AcqRel,
        Ordering::Acquire,
      ) {
        Ok(_) => return true,
        Err(observed) => current = observed,
      }
    }
  }

  #[cfg(test)]
  pub fn current(&self) -> u64 { self.0.load(Ordering::Acquire) }
}

/// Arbiter between one downstream subscriber and a succession of upstream
/// subscriptions.
///
/// Sequential combinators (concat, switch-if-empty) hand this to the
/// downstream once, then point it at each upstream in turn. Outstanding
/// demand, i.e. requested but not yet produced, is replayed onto every
/// newly installed upstream so demand spans source boundaries.
///
/// All accounting lives under one lock and the forwarding decision is made
/// inside the critical section: a `request` either lands before a switch
/// (the switch replays it) or after (the request forwards it itself), never
/// both, so an upstream is granted each unit of downstream demand at most
/// once.
#[derive(Default)]
pub struct ArbiterSubscription {
  state: Mutex<ArbiterState>,
}

#[derive(Default)]
struct ArbiterState {
  current: Option<Arc<dyn Subscription>>,
  outstanding: u64,
  cancelled: bool,
  invalid: bool,
}

enum SwitchAction {
  Cancel,
  SurfaceInvalid,
  Replay(u64),
}

impl ArbiterSubscription {
  pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

  /// Installs the subscription of the upstream that is now active and
  /// replays outstanding demand onto it.
  pub fn set_current(&self, subscription: Arc<dyn Subscription>) {
    let action = {
      let mut state = self.state.lock().unwrap();
      if state.cancelled {
        SwitchAction::Cancel
      } else if state.invalid {
        state.current = Some(subscription.clone());
        // Let the active upstream surface the InvalidDemand error.
        SwitchAction::SurfaceInvalid
      } else {
        state.current = Some(subscription.clone());
        SwitchAction::Replay(state.outstanding)
      }
    };
    // Upstream calls happen outside the lock; a synchronous emission must
    // be able to re-enter produced().
    match action {
      SwitchAction::Cancel => subscription.cancel(),
      SwitchAction::SurfaceInvalid => subscription.request(0),
      SwitchAction::Replay(0) => {}
      SwitchAction::Replay(outstanding) => subscription.request(outstanding),
    }
  }

  /// Records that `n` values were delivered downstream, consuming
  /// outstanding demand.
  pub fn produced(&self, n: u64) {
    let mut state = self.state.lock().unwrap();
    if state.outstanding != UNBOUNDED {
      state.outstanding = state.outstanding.saturating_sub(n);
    }
  }

  pub fn is_cancelled(&self) -> bool { self.state.lock().unwrap().cancelled }
}

impl Subscription for ArbiterSubscription {
  fn request(&self, n: u64) {
    let forward = {
      let mut state = self.state.lock().unwrap();
      if state.cancelled {
        return;
      }
      if n == 0 {
        state.invalid = true;
        state.current.clone().map(|current| (current, 0))
      } else {
        state.outstanding = state.outstanding.saturating_add(n);
        state.current.clone().map(|current| (current, n))
      }
    };
    if let Some((current, n)) = forward {
      current.request(n);
    }
  }

  fn cancel(&self) {
    let current = {
      let mut state = self.state.lock().unwrap();
      if state.cancelled {
        return;
      }
      state.cancelled = true;
      state.current.take()
    };
    if let Some(current) = current {
      current.cancel();
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use std::{
    sync::atomic::{AtomicBool, AtomicU64},
    thread,
  };

  struct RecordingSubscription {
    requested: AtomicU64,
    cancelled: AtomicBool,
  }

  impl RecordingSubscription {
    fn new() -> Arc<Self> {
      Arc::new(RecordingSubscription {
        requested: AtomicU64::new(0),
        cancelled: AtomicBool::new(false),
      })
    }
  }

  impl Subscription for RecordingSubscription {
    fn request(&self, n: u64) {
      self.requested.fetch_add(n, Ordering::SeqCst);
    }

    fn cancel(&self) {
      self.cancelled.store(true, Ordering::SeqCst);
    }
  }

  #[test]
  fn demand_accumulates_and_saturates() {
    let demand = Demand::new();
    demand.add(3);
    demand.add(UNBOUNDED);
    assert_eq!(demand.current(), UNBOUNDED);
    assert!(demand.try_claim());
    assert_eq!(demand.current(), UNBOUNDED);
  }

  #[test]
  fn demand_claims_down_to_zero() {
    let demand = Demand::new();
    demand.add(2);
    assert!(demand.try_claim());
    assert!(demand.try_claim());
    assert!(!demand.try_claim());
  }

  #[test]
  fn arbiter_replays_outstanding_demand_on_switch() {
    let arbiter = ArbiterSubscription::new();
    arbiter.request(5);
    let first = RecordingSubscription::new();
    arbiter.set_current(first.clone());
    assert_eq!(first.requested.load(Ordering::SeqCst), 5);

    arbiter.produced(2);
    let second = RecordingSubscription::new();
    arbiter.set_current(second.clone());
    assert_eq!(second.requested.load(Ordering::SeqCst), 3);
  }

  #[test]
  fn racing_request_and_switch_grant_demand_at_most_once() {
    // A request landing while an upstream switch is in flight must not be
    // granted twice, once by the replay and once by the forward.
    for round in 0..1_000 {
      let arbiter = ArbiterSubscription::new();
      let upstream = RecordingSubscription::new();

      let requester = {
        let arbiter = arbiter.clone();
        thread::spawn(move || arbiter.request(5))
      };
      let switcher = {
        let arbiter = arbiter.clone();
        let upstream = upstream.clone();
        thread::spawn(move || arbiter.set_current(upstream))
      };
      requester.join().unwrap();
      switcher.join().unwrap();

      let granted = upstream.requested.load(Ordering::SeqCst);
      assert!(
        granted <= 5,
        "round {round}: upstream granted {granted}, downstream requested 5"
      );
    }
  }

  #[test]
  fn arbiter_cancel_reaches_current_and_future_upstreams() {
    let arbiter = ArbiterSubscription::new();
    let first = RecordingSubscription::new();
    arbiter.set_current(first.clone());
    arbiter.cancel();
    assert!(first.cancelled.load(Ordering::SeqCst));

    let late = RecordingSubscription::new();
    arbiter.set_current(late.clone());
    assert!(late.cancelled.load(Ordering::SeqCst));
  }
}
