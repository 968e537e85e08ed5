//! Assembly sites and error decoration.
//!
//! With operator debug enabled, every assembled operator is wrapped in an
//! [`OnAssembly`] publisher. Errors travelling downstream through it get the
//! operator's [`AssemblySite`] appended, so a failure raised on a scheduler
//! thread still points back at the user code that declared the pipeline.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use super::CallSite;
use crate::cx::Context;
use crate::error::{FluxError, Result};
use crate::flow::{
    BoxSubscriber, Publisher, QueueSubscription, Subscriber, Subscription, TryNext, Upstream,
};
use crate::types::FusionMode;

/// An operator name plus the place it was declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssemblySite {
    name: &'static str,
    call_site: CallSite,
}

impl AssemblySite {
    /// Creates a site.
    #[must_use]
    pub const fn new(name: &'static str, call_site: CallSite) -> Self {
        Self { name, call_site }
    }

    /// Operator name, e.g. `Flux.map`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Declaration site.
    #[must_use]
    pub const fn call_site(&self) -> &CallSite {
        &self.call_site
    }
}

impl fmt::Display for AssemblySite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ⇢ at {}", self.name, self.call_site)
    }
}

/// Publisher decorating errors with an assembly site.
pub(crate) struct OnAssembly<T> {
    source: Arc<dyn Publisher<T>>,
    site: Arc<AssemblySite>,
}

impl<T> OnAssembly<T> {
    pub(crate) fn new(source: Arc<dyn Publisher<T>>, site: Arc<AssemblySite>) -> Self {
        Self { source, site }
    }
}

impl<T: Send + 'static> Publisher<T> for OnAssembly<T> {
    fn subscribe(&self, subscriber: BoxSubscriber<T>) {
        self.source.subscribe(Box::new(OnAssemblySubscriber {
            actual: subscriber,
            site: Arc::clone(&self.site),
        }));
    }
}

struct OnAssemblySubscriber<T> {
    actual: BoxSubscriber<T>,
    site: Arc<AssemblySite>,
}

impl<T: Send + 'static> Subscriber<T> for OnAssemblySubscriber<T> {
    fn on_subscribe(&mut self, upstream: Upstream<T>) {
        let upstream = match upstream {
            Upstream::Plain(s) => Upstream::Plain(s),
            Upstream::Fused(queue) => Upstream::Fused(Arc::new(OnAssemblyQueue {
                queue,
                site: Arc::clone(&self.site),
            })),
        };
        self.actual.on_subscribe(upstream);
    }

    fn on_next(&mut self, item: T) {
        self.actual.on_next(item);
    }

    fn try_on_next(&mut self, item: T) -> TryNext<T> {
        self.actual.try_on_next(item)
    }

    fn is_conditional(&self) -> bool {
        self.actual.is_conditional()
    }

    fn on_ready(&mut self) {
        self.actual.on_ready();
    }

    fn on_error(&mut self, mut error: FluxError) {
        error.push_assembly(Arc::clone(&self.site));
        self.actual.on_error(error);
    }

    fn on_complete(&mut self) {
        self.actual.on_complete();
    }

    fn context(&self) -> Context {
        self.actual.context()
    }
}

struct OnAssemblyQueue<T> {
    queue: Arc<dyn QueueSubscription<T>>,
    site: Arc<AssemblySite>,
}

impl<T> Subscription for OnAssemblyQueue<T> {
    fn request(&self, n: u64) {
        self.queue.request(n);
    }

    fn cancel(&self) {
        self.queue.cancel();
    }
}

impl<T> QueueSubscription<T> for OnAssemblyQueue<T> {
    fn request_fusion(&self, requested: FusionMode) -> FusionMode {
        self.queue.request_fusion(requested)
    }

    fn poll(&self) -> Result<Option<T>> {
        self.queue.poll().map_err(|mut error| {
            error.push_assembly(Arc::clone(&self.site));
            error
        })
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn size(&self) -> usize {
        self.queue.size()
    }

    fn clear(&self) {
        self.queue.clear();
    }
}
