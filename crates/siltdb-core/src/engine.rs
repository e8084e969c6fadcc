use crate::{
    clock::{Clock, SystemClock},
    lock::TaskLockEngine,
    model::RecordModel,
    obs::SlowQueryPolicy,
    query::Query,
    store::Store,
};
use std::sync::Arc;

///
/// Engine
///
/// Entry point wiring a backing store, a clock, and the shared slow-query
/// policy. Cheap to clone; every handle shares the same policy state so the
/// threshold re-check interval is honored process-wide.
///

#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    policy: Arc<SlowQueryPolicy>,
}

impl Engine {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            policy: Arc::new(SlowQueryPolicy::new()),
        }
    }

    /// Start building a query against a record kind. `context` names the
    /// logical caller in slow-query diagnostics.
    #[must_use]
    pub fn query<'a>(&'a self, model: &'a RecordModel, context: impl Into<String>) -> Query<'a> {
        Query::new(
            self.store.as_ref(),
            self.clock.as_ref(),
            &self.policy,
            model,
            context,
        )
    }

    /// The distributed task-lock primitive over the same store.
    #[must_use]
    pub fn task_lock(&self) -> TaskLockEngine<'_> {
        TaskLockEngine::new(self.store.as_ref(), self.clock.as_ref())
    }

    #[must_use]
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }
}
