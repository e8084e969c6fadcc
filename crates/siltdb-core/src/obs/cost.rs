use crate::{
    clock::Clock,
    error::StoreError,
    model::{Record, RecordKey},
    store::{NativeQuery, Store},
    value::Value,
};
use chrono::{DateTime, SecondsFormat};
use rust_decimal::prelude::ToPrimitive;
use std::sync::Mutex;

/// Record kind holding the self-describing slow-call threshold.
pub(crate) const COST_KIND: &str = "_COST_LOGGING_";

const THRESHOLD_ATTRIBUTE: &str = "SLOW_CALL_MILLIS_THRESHOLD";
const LAST_UPDATE_ATTRIBUTE: &str = "LAST_UPDATE_AT";

/// Minimum wall-clock spacing between threshold re-reads.
const CHECK_INTERVAL_MILLIS: i64 = 10_000;

/// Threshold written when no configuration record exists.
pub const DEFAULT_THRESHOLD_MILLIS: i64 = 10_000;

const LOG_TARGET: &str = "siltdb::cost";

#[derive(Debug)]
struct PolicyState {
    threshold_millis: i64,
    last_check_millis: Option<i64>,
}

///
/// SlowQueryPolicy
///
/// Adaptive slow-call threshold backed by a single-row configuration record
/// in the same store the queries run against. The stored value is re-read at
/// most once per check interval; a missing record is replaced with the
/// default, conflicting records resolve to the lowest value and superseded
/// rows are opportunistically deleted.
///
/// This is an explicit service value shared via the engine, not process
/// globals.
///

#[derive(Debug)]
pub struct SlowQueryPolicy {
    state: Mutex<PolicyState>,
}

impl Default for SlowQueryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SlowQueryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PolicyState {
                threshold_millis: DEFAULT_THRESHOLD_MILLIS,
                last_check_millis: None,
            }),
        }
    }

    /// Current threshold, refreshed from the store when the check interval
    /// has elapsed. Store failures keep the previous value.
    pub(crate) fn threshold_millis(&self, store: &dyn Store, clock: &dyn Clock) -> i64 {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let now = clock.now_millis();
        if state
            .last_check_millis
            .is_some_and(|last| now < last + CHECK_INTERVAL_MILLIS)
        {
            return state.threshold_millis;
        }

        // Stamp before the store round trip so a failing store is not
        // hammered on every query.
        state.last_check_millis = Some(now);

        match refresh(store, now) {
            Ok(value) => {
                if value != state.threshold_millis {
                    tracing::warn!(
                        target: LOG_TARGET,
                        previous = state.threshold_millis,
                        threshold = value,
                        "changing slow-call threshold"
                    );
                    state.threshold_millis = value;
                }
            }
            Err(err) => {
                tracing::warn!(
                    target: LOG_TARGET,
                    error = %err,
                    "unable to refresh slow-call threshold"
                );
            }
        }

        state.threshold_millis
    }
}

fn refresh(store: &dyn Store, now_millis: i64) -> Result<i64, StoreError> {
    let rows = store.fetch(&NativeQuery::new(COST_KIND))?;

    if rows.is_empty() {
        tracing::warn!(target: LOG_TARGET, "writing default slow-call threshold record");
        store.put(COST_KIND, default_record(now_millis))?;
        return Ok(DEFAULT_THRESHOLD_MILLIS);
    }

    let mut winner: Option<(i64, RecordKey)> = None;
    let mut superseded: Vec<RecordKey> = Vec::new();

    for record in rows {
        match parse_threshold(&record.get(THRESHOLD_ATTRIBUTE)) {
            Some(value) => match &winner {
                Some((best, best_key)) if value < *best => {
                    superseded.push(best_key.clone());
                    winner = Some((value, record.key().clone()));
                }
                Some(_) => superseded.push(record.key().clone()),
                None => winner = Some((value, record.key().clone())),
            },
            None => superseded.push(record.key().clone()),
        }
    }

    for key in superseded {
        tracing::warn!(target: LOG_TARGET, key = %key, "deleting superseded threshold record");
        if let Err(err) = store.delete(COST_KIND, &key) {
            tracing::debug!(target: LOG_TARGET, error = %err, "superseded threshold delete failed");
        }
    }

    Ok(winner.map_or(DEFAULT_THRESHOLD_MILLIS, |(value, _)| value))
}

fn default_record(now_millis: i64) -> Record {
    let stamp = DateTime::from_timestamp_millis(now_millis)
        .map_or_else(|| now_millis.to_string(), |dt| {
            dt.to_rfc3339_opts(SecondsFormat::Millis, true)
        });

    Record::new(format!("T{stamp}"))
        .with(THRESHOLD_ATTRIBUTE, DEFAULT_THRESHOLD_MILLIS)
        .with(LAST_UPDATE_ATTRIBUTE, Value::Timestamp(now_millis))
}

/// Lenient numeric parse: the threshold row may have been written by hand.
fn parse_threshold(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Decimal(d) => d.to_i64(),
        Value::Text(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

///
/// QueryTimer
///
/// Per-execution wall-clock accounting. Each store sub-call is declared with
/// its rendered query; a sub-call or the whole execution exceeding the
/// threshold emits a structured warning. Finishing is idempotent and also
/// happens on drop so error paths still report.
///

pub(crate) struct QueryTimer<'a> {
    clock: &'a dyn Clock,
    context: &'a str,
    kind: &'a str,
    threshold_millis: i64,
    started_at: i64,
    declared_at: i64,
    declared: Option<String>,
    finished: bool,
}

impl<'a> QueryTimer<'a> {
    pub(crate) fn start(
        policy: &SlowQueryPolicy,
        store: &dyn Store,
        clock: &'a dyn Clock,
        context: &'a str,
        kind: &'a str,
    ) -> Self {
        let threshold_millis = policy.threshold_millis(store, clock);
        let now = clock.now_millis();

        Self {
            clock,
            context,
            kind,
            threshold_millis,
            started_at: now,
            declared_at: now,
            declared: None,
            finished: false,
        }
    }

    /// Declare the next store sub-call, reporting the previous one first.
    pub(crate) fn declare_query(&mut self, query: &NativeQuery) {
        if self.declared.is_some() {
            self.report_declared();
        }
        self.declared = Some(query.describe());
        self.declared_at = self.clock.now_millis();
    }

    fn report_declared(&self) {
        let Some(query) = &self.declared else {
            return;
        };
        let elapsed = self.clock.now_millis() - self.declared_at;
        if elapsed >= self.threshold_millis {
            tracing::warn!(
                target: LOG_TARGET,
                elapsed_millis = elapsed,
                context = self.context,
                kind = self.kind,
                query = %query,
                "slow store call"
            );
        }
    }

    pub(crate) fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        self.report_declared();

        let elapsed = self.clock.now_millis() - self.started_at;
        if elapsed >= self.threshold_millis {
            tracing::warn!(
                target: LOG_TARGET,
                elapsed_millis = elapsed,
                context = self.context,
                kind = self.kind,
                "slow query execution"
            );
        }
    }
}

impl Drop for QueryTimer<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}
