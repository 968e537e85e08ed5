//! Per-stage stats recording.
//!
//! With stats recording enabled, every assembled operator is wrapped in a
//! [`StatsPublisher`]. Each subscription through it gets a fresh
//! [`StageStats`] that counts the demand the stage received, the elements
//! it delivered, the mean gap between deliveries, the last flow signal and
//! the terminal state.
//!
//! Stages find each other through the subscriber [`Context`]: the most
//! downstream traced stage opens a root [`StatsChain`] and renders the
//! report once its subscription terminates; stages upstream of it register
//! into that chain. Fan-out operators mark the context of their inner
//! subscribers with an index, and the first traced stage of an inner
//! publisher opens a nested chain under the stage that owns it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use super::AssemblySite;
use super::report::{ChainSnapshot, InnerSnapshot, StageSnapshot, StatsReport};
use crate::config;
use crate::cx::Context;
use crate::error::{FluxError, Result};
use crate::flow::{
    BoxSubscriber, Publisher, QueueSubscription, Subscriber, Subscription, TryNext, Upstream,
};
use crate::tracing_compat::debug;
use crate::types::{Demand, FusionMode, SignalType, StageState, UNBOUNDED};

/// Counters of one stage subscription.
#[derive(Debug)]
pub struct StageStats {
    site: Arc<AssemblySite>,
    epoch: Instant,
    requested: Demand,
    produced: AtomicU64,
    elapsed_total: AtomicU64,
    last_mark: AtomicU64,
    last_signal: AtomicU8,
    state: AtomicU8,
    inners: Mutex<Vec<(usize, Arc<StatsChain>)>>,
}

impl StageStats {
    pub(crate) fn new(site: Arc<AssemblySite>) -> Self {
        Self {
            site,
            epoch: Instant::now(),
            requested: Demand::new(),
            produced: AtomicU64::new(0),
            elapsed_total: AtomicU64::new(0),
            last_mark: AtomicU64::new(0),
            last_signal: AtomicU8::new(SignalType::None as u8),
            state: AtomicU8::new(StageState::Active as u8),
            inners: Mutex::new(Vec::new()),
        }
    }

    fn now(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    pub(crate) fn record_subscribe(&self) {
        self.last_mark.store(self.now(), Ordering::Release);
        self.last_signal
            .store(SignalType::OnSubscribe as u8, Ordering::Release);
    }

    pub(crate) fn record_request(&self, n: u64) {
        self.requested.add(n);
        self.last_signal
            .store(SignalType::Request as u8, Ordering::Release);
    }

    pub(crate) fn record_next(&self) {
        let now = self.now();
        let previous = self.last_mark.swap(now, Ordering::AcqRel);
        self.elapsed_total
            .fetch_add(now.saturating_sub(previous), Ordering::Relaxed);
        self.produced.fetch_add(1, Ordering::Relaxed);
        self.last_signal
            .store(SignalType::OnNext as u8, Ordering::Release);
    }

    /// Moves the stage out of `Active`; the first terminal state wins.
    pub(crate) fn record_terminal(&self, state: StageState) -> bool {
        self.state
            .compare_exchange(
                StageState::Active as u8,
                state as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn attach_inner(&self, index: usize, chain: Arc<StatsChain>) {
        self.inners.lock().push((index, chain));
    }

    /// Total demand received, saturating at ∞.
    #[must_use]
    pub fn requested(&self) -> u64 {
        self.requested.get()
    }

    /// Elements delivered downstream.
    #[must_use]
    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::Acquire)
    }

    /// Last flow signal observed.
    #[must_use]
    pub fn last_signal(&self) -> SignalType {
        SignalType::from_u8(self.last_signal.load(Ordering::Acquire))
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> StageState {
        StageState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Mean gap between deliveries in nanoseconds; zero before the first.
    #[must_use]
    pub fn mean_elapsed_nanos(&self) -> u64 {
        let produced = self.produced();
        if produced == 0 {
            return 0;
        }
        self.elapsed_total.load(Ordering::Acquire) / produced
    }

    /// Assembly site of the stage.
    #[must_use]
    pub fn site(&self) -> &AssemblySite {
        &self.site
    }

    fn snapshot(&self) -> StageSnapshot {
        let inners = self
            .inners
            .lock()
            .iter()
            .map(|(index, chain)| InnerSnapshot {
                index: *index,
                chain: chain.snapshot(),
            })
            .collect();
        StageSnapshot {
            name: self.site.name().to_owned(),
            location: self.site.call_site().to_string(),
            requested: self.requested(),
            produced: self.produced(),
            mean_elapsed_nanos: self.mean_elapsed_nanos(),
            last_signal: self.last_signal(),
            state: self.state(),
            inners,
        }
    }
}

/// The traced stages of one subscription chain, most downstream first.
#[derive(Debug, Default)]
pub struct StatsChain {
    stages: Mutex<Vec<Arc<StageStats>>>,
}

impl StatsChain {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, stage: Arc<StageStats>) {
        self.stages.lock().push(stage);
    }

    /// Snapshot in assembly order (source first).
    #[must_use]
    pub fn snapshot(&self) -> ChainSnapshot {
        let stages = self.stages.lock();
        ChainSnapshot {
            stages: stages.iter().rev().map(|stage| stage.snapshot()).collect(),
        }
    }
}

/// The chain a subscriber context belongs to and the stage owning it.
#[derive(Clone, Debug)]
pub(crate) struct StatsScope {
    pub(crate) chain: Arc<StatsChain>,
    pub(crate) owner: Arc<StageStats>,
}

/// Renders a root chain exactly once.
struct RootReport {
    chain: Arc<StatsChain>,
    rendered: AtomicBool,
}

impl RootReport {
    fn render_once(&self) {
        if self.rendered.swap(true, Ordering::AcqRel) {
            return;
        }
        let report = StatsReport::new(self.chain.snapshot());
        let hooks = config::Hooks::snapshot();
        debug!("emitting stats report for {} stages", report.chain.stages.len());
        config::stats_reporter().report(&report, &hooks.stats);
    }
}

/// Publisher wrapping an operator with the stats layer.
pub(crate) struct StatsPublisher<T> {
    source: Arc<dyn Publisher<T>>,
    site: Arc<AssemblySite>,
}

impl<T> StatsPublisher<T> {
    pub(crate) fn new(source: Arc<dyn Publisher<T>>, site: Arc<AssemblySite>) -> Self {
        Self { source, site }
    }
}

impl<T: Send + 'static> Publisher<T> for StatsPublisher<T> {
    fn subscribe(&self, subscriber: BoxSubscriber<T>) {
        let cx = subscriber.context();
        let stage = Arc::new(StageStats::new(Arc::clone(&self.site)));
        let (chain, root) = match (cx.stats_scope(), cx.inner_index()) {
            (Some(scope), Some(index)) => {
                let chain = Arc::new(StatsChain::new());
                scope.owner.attach_inner(index, Arc::clone(&chain));
                (chain, None)
            }
            (Some(scope), None) => (Arc::clone(&scope.chain), None),
            (None, _) => {
                let chain = Arc::new(StatsChain::new());
                let root = Arc::new(RootReport {
                    chain: Arc::clone(&chain),
                    rendered: AtomicBool::new(false),
                });
                (chain, Some(root))
            }
        };
        chain.register(Arc::clone(&stage));
        let cx = cx.with_stats_scope(StatsScope {
            chain,
            owner: Arc::clone(&stage),
        });
        self.source.subscribe(Box::new(StatsSubscriber {
            actual: subscriber,
            stage,
            root,
            cx,
        }));
    }
}

struct StatsSubscriber<T> {
    actual: BoxSubscriber<T>,
    stage: Arc<StageStats>,
    root: Option<Arc<RootReport>>,
    cx: Context,
}

impl<T> StatsSubscriber<T> {
    fn terminate(&self, state: StageState) {
        self.stage.record_terminal(state);
        if let Some(root) = &self.root {
            root.render_once();
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for StatsSubscriber<T> {
    fn on_subscribe(&mut self, upstream: Upstream<T>) {
        self.stage.record_subscribe();
        let wrapped = Arc::new(StatsSubscription {
            upstream: upstream.clone(),
            stage: Arc::clone(&self.stage),
            root: self.root.clone(),
            mode: AtomicU8::new(FusionMode::None.as_u8()),
        });
        let upstream = match upstream {
            Upstream::Plain(_) => Upstream::Plain(wrapped),
            Upstream::Fused(_) => Upstream::Fused(wrapped),
        };
        self.actual.on_subscribe(upstream);
    }

    fn on_next(&mut self, item: T) {
        self.stage.record_next();
        self.actual.on_next(item);
    }

    fn try_on_next(&mut self, item: T) -> TryNext<T> {
        let outcome = self.actual.try_on_next(item);
        if outcome.is_delivered() {
            self.stage.record_next();
        }
        outcome
    }

    fn is_conditional(&self) -> bool {
        self.actual.is_conditional()
    }

    fn on_ready(&mut self) {
        self.actual.on_ready();
    }

    fn on_error(&mut self, error: FluxError) {
        self.terminate(StageState::Errored);
        self.actual.on_error(error);
    }

    fn on_complete(&mut self) {
        self.terminate(StageState::Completed);
        self.actual.on_complete();
    }

    fn context(&self) -> Context {
        self.cx.clone()
    }
}

struct StatsSubscription<T> {
    upstream: Upstream<T>,
    stage: Arc<StageStats>,
    root: Option<Arc<RootReport>>,
    mode: AtomicU8,
}

impl<T> StatsSubscription<T> {
    fn terminate(&self, state: StageState) {
        self.stage.record_terminal(state);
        if let Some(root) = &self.root {
            root.render_once();
        }
    }
}

impl<T: Send + 'static> Subscription for StatsSubscription<T> {
    fn request(&self, n: u64) {
        self.stage.record_request(n);
        self.upstream.request(n);
    }

    fn cancel(&self) {
        let first = self.stage.record_terminal(StageState::Canceled);
        self.upstream.cancel();
        if first {
            if let Some(root) = &self.root {
                root.render_once();
            }
        }
    }
}

impl<T: Send + 'static> QueueSubscription<T> for StatsSubscription<T> {
    fn request_fusion(&self, requested: FusionMode) -> FusionMode {
        let granted = match self.upstream.queue() {
            Some(queue) => queue.request_fusion(requested),
            None => FusionMode::None,
        };
        self.mode.store(granted.as_u8(), Ordering::Release);
        if granted == FusionMode::Sync {
            // A sync-fused consumer pulls at will.
            self.stage.record_request(UNBOUNDED);
        }
        granted
    }

    fn poll(&self) -> Result<Option<T>> {
        let Some(queue) = self.upstream.queue() else {
            return Ok(None);
        };
        match queue.poll() {
            Ok(Some(item)) => {
                self.stage.record_next();
                Ok(Some(item))
            }
            Ok(None) => {
                if FusionMode::from_u8(self.mode.load(Ordering::Acquire)) == FusionMode::Sync {
                    self.terminate(StageState::Completed);
                }
                Ok(None)
            }
            Err(error) => {
                self.terminate(StageState::Errored);
                Err(error)
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.upstream.queue().is_none_or(|queue| queue.is_empty())
    }

    fn size(&self) -> usize {
        self.upstream.queue().map_or(0, |queue| queue.size())
    }

    fn clear(&self) {
        if let Some(queue) = self.upstream.queue() {
            queue.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::CallSite;

    fn stage(name: &'static str) -> Arc<StageStats> {
        Arc::new(StageStats::new(Arc::new(AssemblySite::new(
            name,
            CallSite::here(),
        ))))
    }

    #[test]
    fn terminal_state_is_sticky() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("terminal_state_is_sticky");
        let stage = stage("Flux.map");
        crate::assert_with_log!(
            stage.record_terminal(StageState::Errored),
            "first wins",
            true,
            false
        );
        crate::assert_with_log!(
            !stage.record_terminal(StageState::Canceled),
            "second ignored",
            false,
            true
        );
        crate::assert_with_log!(
            stage.state() == StageState::Errored,
            "state",
            StageState::Errored,
            stage.state()
        );
        crate::test_complete!("terminal_state_is_sticky");
    }

    #[test]
    fn requested_never_decreases() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("requested_never_decreases");
        let mut rng = fastrand::Rng::with_seed(3);
        let stage = stage("Flux.map");
        let mut previous = 0;
        for _ in 0..500 {
            let n = if rng.u8(..) < 4 {
                u64::MAX
            } else {
                rng.u64(1..=u64::MAX / 64)
            };
            stage.record_request(n);
            if rng.bool() {
                stage.record_next();
            }
            let requested = stage.requested();
            crate::assert_with_log!(requested >= previous, "monotone", previous, requested);
            previous = requested;
        }
        crate::test_complete!("requested_never_decreases");
    }

    #[test]
    fn counters_track_flow_signals() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("counters_track_flow_signals");
        let stage = stage("Flux.just");
        stage.record_subscribe();
        stage.record_request(u64::MAX);
        stage.record_request(5);
        stage.record_next();
        stage.record_next();
        crate::assert_with_log!(
            stage.requested() == u64::MAX,
            "requested saturates",
            u64::MAX,
            stage.requested()
        );
        crate::assert_with_log!(stage.produced() == 2, "produced", 2, stage.produced());
        crate::assert_with_log!(
            stage.last_signal() == SignalType::OnNext,
            "last signal",
            SignalType::OnNext,
            stage.last_signal()
        );
        stage.record_terminal(StageState::Completed);
        crate::assert_with_log!(
            stage.last_signal() == SignalType::OnNext,
            "terminal keeps last signal",
            SignalType::OnNext,
            stage.last_signal()
        );
        crate::test_complete!("counters_track_flow_signals");
    }

    #[test]
    fn chain_snapshot_is_in_assembly_order() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("chain_snapshot_is_in_assembly_order");
        let chain = StatsChain::new();
        // Subscription registers the most downstream stage first.
        chain.register(stage("Flux.map"));
        chain.register(stage("Flux.just"));
        let names: Vec<String> = chain
            .snapshot()
            .stages
            .into_iter()
            .map(|stage| stage.name)
            .collect();
        crate::assert_with_log!(
            names == vec!["Flux.just", "Flux.map"],
            "order",
            "[Flux.just, Flux.map]",
            names
        );
        crate::test_complete!("chain_snapshot_is_in_assembly_order");
    }
}
