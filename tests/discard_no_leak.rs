//! Every element is released exactly once, whatever ends the stream.

mod common;
use common::*;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use proptest::prelude::*;
use tributary::scheduler;
use tributary::testing::{AssertProbe, AssertSubscriber, TestPublisher, Tracked, Tracker, race};
use tributary::{Context, Flux, FluxError, FusionMode, UNBOUNDED, XS_BUFFER_SIZE};

const STAGES: [&str; 10] = [
    "map",
    "filter",
    "hide",
    "flat_map",
    "flat_map_narrow",
    "concat_map",
    "flat_map_iterable",
    "on_backpressure_buffer",
    "publish_on",
    "publish_on_eager",
];

fn apply(stage: &str, flux: Flux<Tracked>) -> Flux<Tracked> {
    match stage {
        "map" => flux.map(|t| t),
        "filter" => flux.filter(|t: &Tracked| t.value() % 2 == 0),
        "hide" => flux.hide(),
        "flat_map" => flux.flat_map(Flux::just_owned),
        "flat_map_narrow" => flux.flat_map_with(Flux::just_owned, 2, 2),
        "concat_map" => flux.concat_map(Flux::just_owned),
        "flat_map_iterable" => flux.flat_map_iterable(|t| vec![t]),
        "on_backpressure_buffer" => flux.on_backpressure_buffer(),
        "publish_on" => flux.publish_on_with(scheduler::immediate(), false, 4),
        "publish_on_eager" => flux.publish_on_with(scheduler::immediate(), true, 4),
        other => unreachable!("unknown stage {other}"),
    }
}

#[derive(Debug, Clone, Copy)]
enum Consumer {
    Plain,
    Conditional,
    Fused,
    /// Declines on the conditional path, pulls when the upstream fuses.
    ConditionalFused,
}

const CONSUMERS: [Consumer; 4] = [
    Consumer::Plain,
    Consumer::Conditional,
    Consumer::Fused,
    Consumer::ConditionalFused,
];

fn consumer(kind: Consumer, initial: u64) -> (AssertSubscriber<Tracked>, AssertProbe<Tracked>) {
    let builder = AssertSubscriber::builder()
        .request(initial)
        .context(Context::empty().on_discard(Tracked::release));
    match kind {
        Consumer::Plain => builder.build(),
        Consumer::Conditional => builder.accept_if(|t: &Tracked| t.value() % 3 != 0).build(),
        Consumer::Fused => builder.fusion(FusionMode::Any).build(),
        Consumer::ConditionalFused => builder
            .accept_if(|t: &Tracked| t.value() % 3 != 0)
            .fusion(FusionMode::Any)
            .build(),
    }
}

fn settle(tracker: &Tracker, probe: &AssertProbe<Tracked>) {
    probe.take_values().into_iter().for_each(Tracked::release);
    assert_with_log!(tracker.leaked() == 0, "no leaks", 0, tracker.leaked());
    assert_with_log!(tracker.outstanding() == 0, "all released", 0, tracker.outstanding());
}

#[test]
fn cancel_mid_stream_releases_everything() {
    init_test("cancel_mid_stream_releases_everything");
    for name in STAGES {
        for kind in CONSUMERS {
            for initial in [0, 1, 3, 8] {
                tracing::debug!("{} / {:?} / request {}", name, kind, initial);
                let tracker = Tracker::new();
                let (subscriber, probe) = consumer(kind, initial);
                apply(name, Flux::from_iter_once(tracker.batch(8))).subscribe(subscriber);
                probe.cancel();
                settle(&tracker, &probe);
            }
        }
    }
    test_complete!("cancel_mid_stream_releases_everything");
}

#[test]
fn every_consumer_sees_completion() {
    init_test("every_consumer_sees_completion");
    for name in STAGES {
        for kind in CONSUMERS {
            tracing::debug!("{} / {:?}", name, kind);
            let tracker = Tracker::new();
            let (subscriber, probe) = consumer(kind, UNBOUNDED);
            apply(name, Flux::from_iter_once(tracker.batch(6))).subscribe(subscriber);
            let completed = probe.is_completed();
            assert_with_log!(completed, "completed", true, completed);
            settle(&tracker, &probe);
        }
    }
    test_complete!("every_consumer_sees_completion");
}

#[test]
fn upstream_error_releases_everything() {
    init_test("upstream_error_releases_everything");
    for name in STAGES {
        for kind in CONSUMERS {
            tracing::debug!("{} / {:?}", name, kind);
            let tracker = Tracker::new();
            let source = TestPublisher::new();
            let (subscriber, probe) = consumer(kind, 2);
            apply(name, source.flux()).subscribe(subscriber);
            for value in 0..6 {
                source.next(tracker.track(value));
            }
            source.error(FluxError::upstream("source failed"));
            // A delayed error waits for demand; cancelling releases what it holds back.
            if name != "publish_on" {
                let errored = probe.error().is_some();
                assert_with_log!(errored, "errored", true, errored);
            }
            probe.cancel();
            settle(&tracker, &probe);
        }
    }
    test_complete!("upstream_error_releases_everything");
}

#[test]
fn request_zero_releases_everything() {
    init_test("request_zero_releases_everything");
    for name in STAGES {
        tracing::debug!("{}", name);
        let tracker = Tracker::new();
        let (subscriber, probe) = consumer(Consumer::Plain, 0);
        apply(name, Flux::from_iter_once(tracker.batch(5))).subscribe(subscriber);
        probe.request(0);
        probe.cancel();
        settle(&tracker, &probe);
    }
    test_complete!("request_zero_releases_everything");
}

#[test]
fn merge_cancelled_after_k_leaks_nothing() {
    init_test("merge_cancelled_after_k_leaks_nothing");
    let per_inner = 3;
    let total = XS_BUFFER_SIZE * per_inner;
    for k in (0..=total).step_by(7).chain([total]) {
        let tracker = Tracker::new();
        let sources = (0..XS_BUFFER_SIZE)
            .map(|_| Flux::from_iter_once(tracker.batch(per_inner)))
            .collect();
        let (subscriber, probe) = consumer(Consumer::Plain, k as u64);
        Flux::merge(sources).subscribe(subscriber);
        assert_with_log!(probe.value_count() == k, "observed k", k, probe.value_count());
        probe.cancel();
        settle(&tracker, &probe);
    }
    test_complete!("merge_cancelled_after_k_leaks_nothing");
}

#[test]
fn merge_of_live_sources_cancelled_concurrently() {
    init_test("merge_of_live_sources_cancelled_concurrently");
    for round in 0..50 {
        let tracker = Tracker::new();
        let sources: Vec<TestPublisher<Tracked>> = (0..4).map(|_| TestPublisher::new()).collect();
        let (subscriber, probe) = consumer(Consumer::Plain, 5);
        Flux::merge(sources.iter().map(TestPublisher::flux).collect()).subscribe(subscriber);
        race(
            || {
                for value in 0..8 {
                    for source in &sources {
                        source.next(tracker.track(value));
                    }
                }
            },
            || {
                if round % 2 == 0 {
                    thread::yield_now();
                }
                probe.cancel();
            },
        );
        settle(&tracker, &probe);
    }
    test_complete!("merge_of_live_sources_cancelled_concurrently");
}

#[test]
fn buffer_cancelled_without_demand_releases_exactly_what_it_holds() {
    init_test("buffer_cancelled_without_demand_releases_exactly_what_it_holds");
    for held in [0, 1, 16, 300] {
        let tracker = Tracker::new();
        let source = TestPublisher::new();
        let (subscriber, probe) = consumer(Consumer::Plain, 0);
        source.flux().on_backpressure_buffer().subscribe(subscriber);
        source.emit((0..held).map(|value| tracker.track(value)));
        probe.request(0);
        probe.cancel();
        assert_with_log!(tracker.released() == held as usize, "released", held, tracker.released());
        assert_with_log!(probe.value_count() == 0, "nothing delivered", 0, probe.value_count());
        settle(&tracker, &probe);
    }
    test_complete!("buffer_cancelled_without_demand_releases_exactly_what_it_holds");
}

#[test]
fn buffer_over_exhausted_source_releases_on_request_zero() {
    init_test("buffer_over_exhausted_source_releases_on_request_zero");
    let tracker = Tracker::new();
    let (subscriber, probe) = consumer(Consumer::Plain, 0);
    Flux::from_iter_once(tracker.batch(12))
        .on_backpressure_buffer()
        .subscribe(subscriber);
    probe.request(0);
    probe.cancel();
    assert_with_log!(tracker.released() == 12, "released", 12, tracker.released());
    settle(&tracker, &probe);
    test_complete!("buffer_over_exhausted_source_releases_on_request_zero");
}

#[test]
fn emission_racing_cancel_through_each_operator() {
    init_test("emission_racing_cancel_through_each_operator");
    for name in STAGES {
        tracing::debug!("{}", name);
        for _ in 0..20 {
            let tracker = Tracker::new();
            let source = TestPublisher::new();
            let (subscriber, probe) = consumer(Consumer::Plain, UNBOUNDED);
            apply(name, source.flux()).subscribe(subscriber);
            race(
                || source.emit((0..32).map(|value| tracker.track(value))),
                || probe.cancel(),
            );
            settle(&tracker, &probe);
        }
    }
    test_complete!("emission_racing_cancel_through_each_operator");
}

#[test]
fn deferred_cancellation_is_still_released() {
    init_test("deferred_cancellation_is_still_released");
    use tributary::testing::Violation;
    for name in STAGES {
        tracing::debug!("{}", name);
        let tracker = Tracker::new();
        let source = TestPublisher::non_compliant(&[Violation::DeferCancellation]);
        let (subscriber, probe) = consumer(Consumer::Plain, UNBOUNDED);
        apply(name, source.flux()).subscribe(subscriber);
        source.next(tracker.track(0));
        probe.cancel();
        source.emit((1..6).map(|value| tracker.track(value)));
        settle(&tracker, &probe);
    }
    test_complete!("deferred_cancellation_is_still_released");
}

#[test]
fn cancel_while_worker_drains() {
    init_test("cancel_while_worker_drains");
    let single = scheduler::single();
    for _ in 0..20 {
        let tracker = Tracker::new();
        let (subscriber, probe) = consumer(Consumer::Plain, 10);
        Flux::from_iter_once(tracker.batch(64))
            .publish_on_with(Arc::clone(&single), false, 8)
            .subscribe(subscriber);
        probe.cancel();
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            probe.take_values().into_iter().for_each(Tracked::release);
            if tracker.outstanding() == 0 || Instant::now() > deadline {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        settle(&tracker, &probe);
    }
    single.dispose();
    test_complete!("cancel_while_worker_drains");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_pipelines_never_leak(
        pipeline in prop::collection::vec(0..10usize, 1..4),
        size in 0..20usize,
        initial in prop_oneof![Just(0u64), 1..10u64, Just(UNBOUNDED)],
        consumer_kind in 0..CONSUMERS.len(),
        cancel in any::<bool>(),
    ) {
        let tracker = Tracker::new();
        let mut flux = Flux::from_iter_once(tracker.batch(size));
        for index in &pipeline {
            flux = apply(STAGES[*index], flux);
        }
        let (subscriber, probe) = consumer(CONSUMERS[consumer_kind], initial);
        flux.subscribe(subscriber);
        if cancel {
            probe.cancel();
        } else {
            probe.request(UNBOUNDED);
            prop_assert!(probe.is_terminated());
        }
        probe.take_values().into_iter().for_each(Tracked::release);
        prop_assert_eq!(tracker.leaked(), 0);
        prop_assert_eq!(tracker.outstanding(), 0);
    }
}
