//! Named worker contexts that operators schedule work onto.
//!
//! A [`Scheduler`] is a process-wide execution resource backed by a thread
//! pool whose threads carry the scheduler name as a thread-name prefix, so
//! a pipeline stage can always tell which context it is running on by
//! looking at the current thread's name. `single` contexts serialize all
//! work on one thread; `bounded-elastic` contexts are sized for blocking
//! work and are the only place [`Flux::from_blocking_call`] is allowed to
//! run.
//!
//! [`Flux::from_blocking_call`]: crate::flux::Flux::from_blocking_call

use std::{
  collections::VecDeque,
  sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
  },
  thread,
};

use futures::{executor::ThreadPool, future};
use once_cell::sync::Lazy;

use crate::error::Error;

type Job = Box<dyn FnOnce() + Send + 'static>;

static SINGLE: Lazy<Scheduler> = Lazy::new(|| Scheduler::new_single("single"));
static BOUNDED_ELASTIC: Lazy<Scheduler> =
  Lazy::new(|| Scheduler::new_bounded_elastic("bounded-elastic"));
static BLOCKING_PREFIXES: Lazy<Mutex<Vec<String>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// A named execution context. Cheap to clone, immutable after
/// construction, shared process-wide; it outlives any subscription that
/// schedules onto it.
#[derive(Clone)]
pub struct Scheduler {
  inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
  name: String,
  pool: ThreadPool,
  blocking_ok: bool,
}

impl Scheduler {
  /// One thread; all submitted work is serialized on it.
  pub fn new_single(name: &str) -> Scheduler { Scheduler::build(name, 1, false) }

  /// Many threads sized for blocking work. Contexts built here are
  /// registered as blocking-capable for the runtime blocking guard.
  pub fn new_bounded_elastic(name: &str) -> Scheduler {
    let size = thread::available_parallelism()
      .map(|n| n.get() * 10)
      .unwrap_or(10)
      .min(64);
    Scheduler::build(name, size, true)
  }

  fn build(name: &str, pool_size: usize, blocking_ok: bool) -> Scheduler {
    let prefix = format!("{name}-");
    let pool = ThreadPool::builder()
      .pool_size(pool_size)
      .name_prefix(prefix.clone())
      .create()
      .expect("failed to build scheduler thread pool");
    if blocking_ok {
      BLOCKING_PREFIXES.lock().unwrap().push(prefix);
    }
    Scheduler {
      inner: Arc::new(SchedulerInner {
        name: name.to_owned(),
        pool,
        blocking_ok,
      }),
    }
  }

  pub fn name(&self) -> &str { &self.inner.name }

  pub fn is_blocking_capable(&self) -> bool { self.inner.blocking_ok }

  /// Fire-and-forget submission onto the pool.
  pub fn schedule(&self, task: impl FnOnce() + Send + 'static) {
    tracing::trace!(target: "rill::scheduler", scheduler = %self.inner.name, "schedule");
    self.inner.pool.spawn_ok(future::lazy(move |_| task()));
  }

  /// A serial worker on this context: tasks scheduled on one worker run in
  /// FIFO order and never concurrently, whichever pool thread picks up the
  /// drain. This is the serialization substrate of `publish_on`.
  pub fn create_worker(&self) -> Worker {
    Worker {
      inner: Arc::new(WorkerInner {
        queue: Mutex::new(VecDeque::new()),
        wip: AtomicUsize::new(0),
        pool: self.inner.pool.clone(),
      }),
    }
  }
}

/// Serial FIFO executor obtained from [`Scheduler::create_worker`].
#[derive(Clone)]
pub struct Worker {
  inner: Arc<WorkerInner>,
}

struct WorkerInner {
  queue: Mutex<VecDeque<Job>>,
  wip: AtomicUsize,
  pool: ThreadPool,
}

impl Worker {
  pub fn schedule(&self, task: impl FnOnce() + Send + 'static) {
    self.inner.queue.lock().unwrap().push_back(Box::new(task));
    // First-in spawns the drain; late arrivals are picked up by the loop.
    if self.inner.wip.fetch_add(1, Ordering::AcqRel) == 0 {
      let inner = self.inner.clone();
      self
        .inner
        .pool
        .spawn_ok(future::lazy(move |_| inner.drain()));
    }
  }
}

impl WorkerInner {
  fn drain(&self) {
    loop {
      let job = self.queue.lock().unwrap().pop_front();
      if let Some(job) = job {
        job();
      }
      if self.wip.fetch_sub(1, Ordering::AcqRel) == 1 {
        break;
      }
    }
  }
}

/// Access to the shared default contexts and to context identity queries.
pub struct Schedulers;

impl Schedulers {
  /// The shared single-threaded context, created once per process.
  pub fn single() -> Scheduler { SINGLE.clone() }

  /// The shared blocking-capable context, created once per process.
  pub fn bounded_elastic() -> Scheduler { BOUNDED_ELASTIC.clone() }

  /// Name of the worker context the caller is executing on, derived from
  /// the thread name the scheduler pools install.
  pub fn current_context_name() -> Option<String> {
    thread::current().name().map(str::to_owned)
  }

  /// Runtime guard against blocking work on inappropriate contexts.
  ///
  /// Returns an error unless the current thread belongs to a context
  /// registered as blocking-capable.
  pub fn ensure_blocking_permitted() -> Result<(), Error> {
    let current = thread::current();
    let name = current.name().unwrap_or("<unnamed>");
    let permitted = BLOCKING_PREFIXES
      .lock()
      .unwrap()
      .iter()
      .any(|prefix| name.starts_with(prefix.as_str()));
    if permitted {
      Ok(())
    } else {
      Err(Error::BlockingDenied(name.to_owned()))
    }
  }
}
