//! End-to-end pipeline scenarios crossing several operators, combinators
//! and scheduler contexts.

use std::time::{Duration, Instant};

use rill::{prelude::*, testing::TestSubscriber};

#[derive(Debug, Clone, PartialEq)]
struct Show {
  title: String,
  episodes: u32,
}

fn init_tracing() {
  let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
fn transform_pipeline_with_fallback() {
  init_tracing();
  let probe = TestSubscriber::unbounded();
  Flux::from_sequence(vec!["spring", "reactor", "rust"])
    .log("names")
    .map(|s| s.to_uppercase())
    .filter(|s| s.len() > 4)
    .switch_if_empty(Flux::just("EMPTY".to_owned()))
    .subscribe(probe.clone());

  probe.assert_values(&["SPRING".to_owned(), "REACTOR".to_owned()]);
  probe.assert_complete();
}

#[test]
fn filtered_out_pipeline_takes_the_fallback() {
  let probe = TestSubscriber::unbounded();
  Flux::from_sequence(vec!["a", "b"])
    .filter(|s| s.len() > 10)
    .switch_if_empty(Flux::just("fallback"))
    .subscribe(probe.clone());
  probe.assert_values(&["fallback"]);
  probe.assert_complete();
}

#[test]
fn subscribe_on_runs_the_whole_chain_on_the_context() {
  let probe = TestSubscriber::unbounded();
  Flux::range(1, 4)
    .map(|v| v * 2)
    .subscribe_on(Schedulers::single())
    .subscribe(probe.clone());

  probe.await_termination(Duration::from_secs(5));
  probe.assert_values(&[2, 4, 6, 8]);
  for name in probe.delivery_threads() {
    assert!(name.starts_with("single-"), "delivered on {name}");
  }
}

#[test]
fn publish_on_splits_the_chain_at_the_hop() {
  let probe = TestSubscriber::unbounded();
  Flux::range(1, 4)
    .publish_on(Schedulers::bounded_elastic())
    .map(|v| v + 100)
    .subscribe(probe.clone());

  probe.await_termination(Duration::from_secs(5));
  probe.assert_values(&[101, 102, 103, 104]);
  for name in probe.delivery_threads() {
    assert!(name.starts_with("bounded-elastic-"), "delivered on {name}");
  }
}

#[test]
fn subscribe_on_and_publish_on_split_the_chain_at_the_hop() {
  use std::sync::{Arc, Mutex};

  fn current_thread_name() -> String {
    std::thread::current().name().unwrap_or("<unnamed>").to_owned()
  }

  let before_hop = Arc::new(Mutex::new(Vec::new()));
  let after_hop = Arc::new(Mutex::new(Vec::new()));
  let before = before_hop.clone();
  let after = after_hop.clone();

  let probe = TestSubscriber::unbounded();
  Flux::range(1, 3)
    .map(move |v| {
      before.lock().unwrap().push(current_thread_name());
      v
    })
    .publish_on(Schedulers::single())
    .map(move |v| {
      after.lock().unwrap().push(current_thread_name());
      v
    })
    .subscribe_on(Schedulers::bounded_elastic())
    .subscribe(probe.clone());

  probe.await_termination(Duration::from_secs(5));
  probe.assert_values(&[1, 2, 3]);
  probe.assert_complete();
  // Upstream of the hop runs where subscribe_on put the subscription;
  // downstream of it runs on the publish_on worker.
  for name in before_hop.lock().unwrap().iter() {
    assert!(
      name.starts_with("bounded-elastic-"),
      "pre-hop stage ran on {name}"
    );
  }
  for name in after_hop.lock().unwrap().iter() {
    assert!(name.starts_with("single-"), "post-hop stage ran on {name}");
  }
  for name in probe.delivery_threads() {
    assert!(name.starts_with("single-"), "delivered on {name}");
  }
}

#[test]
fn blocking_call_needs_the_blocking_capable_context() {
  let denied = TestSubscriber::<String>::unbounded();
  Flux::from_blocking_call(|| Ok("file contents".to_owned())).subscribe(denied.clone());
  denied.assert_error(|e| matches!(e, Error::BlockingDenied(_)));

  let allowed = TestSubscriber::unbounded();
  Flux::from_blocking_call(|| Ok("file contents".to_owned()))
    .subscribe_on(Schedulers::bounded_elastic())
    .subscribe(allowed.clone());
  allowed.await_termination(Duration::from_secs(5));
  allowed.assert_values(&["file contents".to_owned()]);
  allowed.assert_complete();
}

#[test]
fn concat_delay_error_keeps_later_values_and_defers_the_error() {
  let probe = TestSubscriber::unbounded();
  let failing = Flux::from_sequence(vec!["a", "b"])
    .try_map(|s| if s == "b" { Err("b is broken") } else { Ok(s) });
  Flux::concat_delay_error(vec![failing, Flux::from_sequence(vec!["c", "d"])])
    .subscribe(probe.clone());

  probe.assert_values(&["a", "c", "d"]);
  probe.assert_error(|e| matches!(e, Error::Transform(_)));
}

#[test]
fn merge_interleaves_but_merge_sequential_preserves_order() {
  let delayed = Flux::from_sequence(vec!["a", "b"]).delay_elements(Duration::from_millis(100));
  let prompt = Flux::from_sequence(vec!["c", "d"]);

  let merged = TestSubscriber::unbounded();
  Flux::merge(vec![delayed.clone(), prompt.clone()]).subscribe(merged.clone());
  merged.await_termination(Duration::from_secs(5));
  assert_eq!(merged.values()[..2], ["c", "d"]);

  let sequential = TestSubscriber::unbounded();
  Flux::merge_sequential(vec![delayed, prompt]).subscribe(sequential.clone());
  sequential.await_termination(Duration::from_secs(5));
  sequential.assert_values(&["a", "b", "c", "d"]);
}

#[test]
fn flat_map_sequential_orders_even_with_uneven_inner_latency() {
  let probe = TestSubscriber::unbounded();
  Flux::from_sequence(vec![1u64, 2, 3])
    .flat_map_sequential(|v| {
      // Earlier values take longer, so arrival order inverts.
      Flux::just(v).delay_elements(Duration::from_millis(40 * (4 - v)))
    })
    .subscribe(probe.clone());

  probe.await_termination(Duration::from_secs(5));
  probe.assert_values(&[1, 2, 3]);
  probe.assert_complete();
}

#[test]
fn zip_builds_a_struct_from_parallel_attribute_streams() {
  let titles = Flux::from_sequence(vec!["Dark", "The Office"]).map(str::to_owned);
  let episodes = Flux::from_sequence(vec![26u32, 201]);

  let probe = TestSubscriber::unbounded();
  Flux::zip(titles, episodes)
    .map(|(title, episodes)| Show { title, episodes })
    .subscribe(probe.clone());

  probe.assert_values(&[
    Show {
      title: "Dark".to_owned(),
      episodes: 26,
    },
    Show {
      title: "The Office".to_owned(),
      episodes: 201,
    },
  ]);
  probe.assert_complete();
}

#[test]
fn combine_latest_over_synchronous_sources_uses_the_last_left_value() {
  let probe = TestSubscriber::unbounded();
  Flux::combine_latest(
    Flux::from_sequence(vec!["a", "b"]),
    Flux::from_sequence(vec!["c", "d"]),
    |a, b| format!("{a}{b}"),
  )
  .subscribe(probe.clone());

  probe.assert_values(&["bc".to_owned(), "bd".to_owned()]);
  probe.assert_complete();
}

#[test]
fn delay_elements_paces_a_mapped_stream() {
  let probe = TestSubscriber::unbounded();
  let start = Instant::now();
  Flux::range(1, 3)
    .delay_elements(Duration::from_millis(60))
    .map(|v| v * v)
    .subscribe(probe.clone());

  probe.await_termination(Duration::from_secs(5));
  probe.assert_values(&[1, 4, 9]);
  assert!(start.elapsed() >= Duration::from_millis(180));
}

#[test]
fn bounded_demand_flows_through_a_full_pipeline() {
  let probe = TestSubscriber::with_demand(2);
  Flux::range(1, 100)
    .filter(|v| v % 2 == 0)
    .map(|v| v / 2)
    .subscribe(probe.clone());

  probe.assert_values(&[1, 2]);
  probe.assert_not_terminated();

  probe.request(3);
  probe.assert_values(&[1, 2, 3, 4, 5]);
  probe.assert_not_terminated();

  probe.cancel();
}

#[test]
fn deferred_source_restarts_per_subscriber() {
  use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
  };
  let calls = Arc::new(AtomicU32::new(0));
  let counter = calls.clone();
  let source = Flux::defer(move || Flux::just(counter.fetch_add(1, Ordering::SeqCst)));

  for expected in 0..3 {
    let probe = TestSubscriber::unbounded();
    source.clone().subscribe(probe.clone());
    probe.assert_values(&[expected]);
    probe.assert_complete();
  }
  assert_eq!(calls.load(Ordering::SeqCst), 3);
}
