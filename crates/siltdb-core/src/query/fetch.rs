use crate::{
    error::{EngineError, StoreError},
    model::{Attribute, Record},
    obs::QueryTimer,
    query::tracker::{FilterOp, FilterTracker, SimpleFilter, SortTracker},
    store::{NativeQuery, Store},
    value::{Value, nulls_last_cmp},
};
use std::cmp::Ordering;

/// Chunks are fetched bigger than a page in the expectation that most
/// candidates fail the client-side filters.
pub(crate) const DEFAULT_CHUNK_SIZE: usize = 2048;

/// Below this chunk size a transient failure stops being retried.
pub(crate) const CHUNK_SIZE_FLOOR: usize = 64;

/// Per-call read-set cap, as a multiple of the chunk size.
const READ_SET_MULTIPLIER: usize = 32;

/// Probe window used to read the current extreme value of the dominant
/// sort attribute.
const PROBE_LIMIT: usize = 3;

const LOG_TARGET: &str = "siltdb::fetch";

///
/// ResultContainer
///
/// Accumulator the fetch engine fills. Pages collect whole records;
/// distinct queries collect deduplicated values.
///

pub(crate) trait ResultContainer {
    fn add(&mut self, record: Record);

    fn len(&self) -> usize;
}

///
/// RecordAccumulator
///

#[derive(Default)]
pub(crate) struct RecordAccumulator {
    records: Vec<Record>,
}

impl RecordAccumulator {
    pub(crate) fn into_records(self) -> Vec<Record> {
        self.records
    }
}

impl ResultContainer for RecordAccumulator {
    fn add(&mut self, record: Record) {
        self.records.push(record);
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

///
/// WorkingValues
///
/// Retry-safe checkpoint of the fetch loop. Each store round trip runs
/// against a copy; only a successful step folds back into the engine's
/// state, so a failed call can be reissued at the same logical position
/// with a smaller chunk.
///

#[derive(Clone)]
struct WorkingValues {
    idx: u64,
    fetch_offset: usize,
    start_cursor_filter: Option<SimpleFilter>,
    possibly_before_start_cursor: bool,
    size_questionable_first_matches: usize,
    current_dominant_value: Option<Value>,
    dominant_value_changed: bool,
    additional: Vec<Record>,
}

///
/// FetchEngine
///
/// Pulls candidate records in bounded batches: the dominant sort
/// attribute's predicate and ordering run server-side, everything else is
/// evaluated locally. Records sharing the dominant value at a resume
/// boundary are gathered in full before the fetch limit is honored, since
/// subordinate sorts can reorder within that group.
///

pub(crate) struct FetchEngine<'a> {
    pub(crate) store: &'a dyn Store,
    pub(crate) kind: &'a str,
    pub(crate) filters: &'a [FilterTracker],
    pub(crate) sorts: &'a [SortTracker],
}

impl FetchEngine<'_> {
    pub(crate) fn chunk_fetch(
        &self,
        container: &mut dyn ResultContainer,
        start_cursor_filter: Option<SimpleFilter>,
        fetch_limit: usize,
        timer: &mut QueryTimer<'_>,
    ) -> Result<(), EngineError> {
        let dominant = &self.sorts[0];
        let dominant_attr = dominant.attribute().clone();

        let mut chunk_size = DEFAULT_CHUNK_SIZE;
        let mut must_read_everything = fetch_limit == 0;

        // The first fetch always starts at offset zero, even on a resumed
        // query: subordinate sorts mean the true order is unknown during
        // the store phase, so boundary trimming happens after assembly.
        let mut state = WorkingValues {
            idx: 0,
            fetch_offset: 0,
            possibly_before_start_cursor: start_cursor_filter.is_some(),
            start_cursor_filter,
            size_questionable_first_matches: 0,
            current_dominant_value: None,
            dominant_value_changed: false,
            additional: Vec::new(),
        };

        loop {
            let mut query = NativeQuery::new(self.kind);

            let has_equality_tests = self.filters.iter().any(|t| {
                t.as_simple()
                    .is_some_and(|f| f.is_equality() && f.attribute().name() != dominant_attr.name())
            });

            let ordered = if has_equality_tests && fetch_limit == 0 {
                // The store rejects a sort combined with equality filters on
                // other attributes. Assume the equality tests cut the result
                // set harder than the dominant anchor would, push only them,
                // and read the whole set for the local sort pass.
                for tracker in self.filters {
                    if let Some(filter) = tracker.as_simple() {
                        if filter.is_equality() {
                            filter.push_down(&mut query);
                        }
                    }
                }
                must_read_everything = true;
                false
            } else {
                let mut has_dominant_filter = false;

                // The resume-boundary filter on the dominant attribute.
                if let Some(filter) = &state.start_cursor_filter {
                    filter.push_down(&mut query);
                    has_dominant_filter = true;
                }

                // Any caller filters on the dominant attribute, e.g. the two
                // halves of a between query.
                for tracker in self.filters {
                    if tracker.attribute().name() == dominant_attr.name() {
                        tracker.push_down(&mut query);
                        has_dominant_filter = true;
                    }
                }

                if !has_dominant_filter {
                    // The store rejects a sort on an unconstrained attribute,
                    // and pagination needs an anchor: synthesize an implied
                    // filter at the current extreme value.
                    let Some(anchor) = self.probe_extreme_value(dominant)? else {
                        return Ok(());
                    };
                    let op = if dominant.direction().is_ascending() {
                        FilterOp::Gte
                    } else {
                        FilterOp::Lte
                    };
                    SimpleFilter::boundary(dominant_attr.clone(), op, anchor).push_down(&mut query);
                }

                // Subordinate sorts cannot be pushed down.
                dominant.push_down(&mut query);
                true
            };

            let read_set_limit = READ_SET_MULTIPLIER * chunk_size;
            query.offset = state.fetch_offset;
            query.chunk = chunk_size;
            query.limit = Some(read_set_limit);

            timer.declare_query(&query);

            let mut working = state.clone();
            match self.fetch_step(
                &query,
                dominant,
                &dominant_attr,
                ordered,
                must_read_everything,
                fetch_limit,
                read_set_limit,
                container.len(),
                &mut working,
            ) {
                Ok(has_more) => {
                    let additional = std::mem::take(&mut working.additional);
                    state = working;
                    for record in additional {
                        container.add(record);
                    }
                    if !has_more {
                        return Ok(());
                    }
                }
                Err(err) => {
                    let err: EngineError = err.into();
                    // Quota exhaustion and malformed queries propagate
                    // untouched; only transient failures are worth a retry
                    // at the same checkpoint.
                    if err.is_transient() && chunk_size > CHUNK_SIZE_FLOOR {
                        chunk_size /= 4;
                        tracing::warn!(
                            target: LOG_TARGET,
                            kind = self.kind,
                            chunk_size,
                            "retrying fetch with a smaller chunk size"
                        );
                    } else {
                        return Err(err);
                    }
                }
            }
        }
    }

    /// One store round trip. Mutates only the working checkpoint; the
    /// caller folds it into real state on success.
    ///
    /// Returns `false` once fetching can stop: either enough matches exist
    /// beyond the boundary-ambiguous group, or the store is exhausted.
    #[expect(clippy::too_many_arguments)]
    fn fetch_step(
        &self,
        query: &NativeQuery,
        dominant: &SortTracker,
        dominant_attr: &Attribute,
        ordered: bool,
        must_read_everything: bool,
        fetch_limit: usize,
        read_set_limit: usize,
        gathered: usize,
        w: &mut WorkingValues,
    ) -> Result<bool, StoreError> {
        let rows = self.store.fetch(query)?;

        let mut read_set_count = 0usize;
        let mut has_results = false;

        for record in rows {
            has_results = true;
            read_set_count += 1;
            w.idx += 1;

            let matching = if ordered {
                note_dominant_value(dominant, dominant_attr, &record, w)
            } else {
                // Unordered equality scan: no dominant ordering exists, so
                // the offset advances monotonically instead of resetting.
                true
            };
            w.fetch_offset += 1;

            // Once the limit is satisfied, keep reading only until the
            // dominant value advances: that closes the group a subordinate
            // sort could still reorder.
            if !must_read_everything
                && !matching
                && !w.possibly_before_start_cursor
                && gathered + w.additional.len()
                    > fetch_limit + w.size_questionable_first_matches + 1
            {
                return Ok(false);
            }

            if self.filters.iter().all(|t| t.passes(&record)) {
                if w.possibly_before_start_cursor && w.dominant_value_changed {
                    // Until the dominant value moves past the resume
                    // boundary, every match might precede the last-returned
                    // key once subordinate sorts run. Those records are
                    // gathered but never counted toward the fetch limit.
                    w.possibly_before_start_cursor = false;
                    w.size_questionable_first_matches = gathered + w.additional.len();
                }
                w.additional.push(record);
            }
        }

        if read_set_count < read_set_limit {
            // The server returned fewer rows than the read-set cap: the
            // result stream is exhausted.
            return Ok(false);
        }

        Ok(has_results)
    }

    /// Read the current min/max of the dominant sort attribute.
    ///
    /// Returns `None` when the kind holds no sortable records, which makes
    /// the whole result set empty.
    fn probe_extreme_value(&self, dominant: &SortTracker) -> Result<Option<Value>, EngineError> {
        let mut probe = NativeQuery::new(self.kind);
        dominant.push_down(&mut probe);
        probe.limit = Some(PROBE_LIMIT);

        tracing::debug!(
            target: LOG_TARGET,
            kind = self.kind,
            attribute = dominant.attribute().name(),
            "probing extreme value of the dominant sort attribute"
        );

        let rows = self.store.fetch(&probe)?;
        Ok(rows.first().map(|r| r.get(dominant.attribute().name())))
    }
}

/// Track the dominant attribute's value stream; a change resets the
/// server offset and advances the boundary filter so the next round
/// trip restarts inside the new value group.
fn note_dominant_value(
    dominant: &SortTracker,
    dominant_attr: &Attribute,
    record: &Record,
    w: &mut WorkingValues,
) -> bool {
    let value = record.get(dominant_attr.name());

    match &w.current_dominant_value {
        None => {
            w.fetch_offset = 0;
            w.current_dominant_value = Some(value);
            true
        }
        Some(current) => {
            let matching = nulls_last_cmp(current, &value) == Ordering::Equal;
            if !matching {
                w.fetch_offset = 0;
                w.current_dominant_value = Some(value.clone());
                w.dominant_value_changed = true;

                let op = if dominant.direction().is_ascending() {
                    FilterOp::Gte
                } else {
                    FilterOp::Lte
                };
                w.start_cursor_filter =
                    Some(SimpleFilter::boundary(dominant_attr.clone(), op, value));
            }
            matching
        }
    }
}
