mod cursor;
mod distinct;
mod fetch;
mod tracker;

pub use cursor::ResumeCursor;
pub use tracker::FilterOp;

use crate::{
    clock::Clock,
    direction::Direction,
    error::{EngineError, ErrorOrigin},
    model::{Attribute, Record, RecordModel},
    obs::{QueryTimer, SlowQueryPolicy},
    query::{
        distinct::DistinctContainer,
        fetch::{FetchEngine, RecordAccumulator},
        tracker::{FilterTracker, SetFilter, SimpleFilter, SortTracker},
    },
    store::Store,
    value::{Value, decode_boundary, encode_boundary},
};

///
/// QueryPage
///
/// One page of results plus the cursors needed to continue in either
/// direction. `has_more` reports whether records remain past this page.
///

#[derive(Debug)]
pub struct QueryPage {
    pub records: Vec<Record>,
    pub backward_cursor: Option<ResumeCursor>,
    pub resume_cursor: Option<ResumeCursor>,
    pub has_more: bool,
}

struct CoreResult {
    records: Vec<Record>,
    has_more: bool,
}

///
/// Query
///
/// Builder and executor for one logical query against a record kind.
/// Filters and sorts accumulate fluently; execution emulates the full
/// specification on top of the store's single-attribute native contract.
///

pub struct Query<'a> {
    store: &'a dyn Store,
    clock: &'a dyn Clock,
    policy: &'a SlowQueryPolicy,
    model: &'a RecordModel,
    context: String,
    filters: Vec<FilterTracker>,
    sorts: Vec<SortTracker>,
}

impl std::fmt::Debug for Query<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("context", &self.context)
            .field("filters", &self.filters)
            .field("sorts", &self.sorts)
            .finish_non_exhaustive()
    }
}

impl<'a> Query<'a> {
    pub(crate) fn new(
        store: &'a dyn Store,
        clock: &'a dyn Clock,
        policy: &'a SlowQueryPolicy,
        model: &'a RecordModel,
        context: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            policy,
            model,
            context: context.into(),
            filters: Vec::new(),
            sorts: Vec::new(),
        }
    }

    /// Add a simple comparison filter.
    ///
    /// Decimal literals are rounded to the attribute's declared scale here,
    /// before any comparison ever sees them.
    pub fn filter(
        mut self,
        attribute: &str,
        op: FilterOp,
        value: impl Into<Value>,
    ) -> Result<Self, EngineError> {
        let attr = self.resolve_attribute(attribute)?;
        self.filters
            .push(FilterTracker::Simple(SimpleFilter::new(attr, op, value.into())?));
        Ok(self)
    }

    /// Add a set-membership filter (an OR of equality tests).
    pub fn filter_in(mut self, attribute: &str, values: Vec<Value>) -> Result<Self, EngineError> {
        let attr = self.resolve_attribute(attribute)?;
        self.filters
            .push(FilterTracker::Set(SetFilter::new(attr, values)?));
        Ok(self)
    }

    /// Add a sort criterion. The first one declared is the dominant sort
    /// attribute and the only one the store evaluates.
    pub fn sort(mut self, attribute: &str, direction: Direction) -> Result<Self, EngineError> {
        let attr = self.resolve_attribute(attribute)?;
        self.sorts.push(SortTracker::new(attr, direction)?);
        Ok(self)
    }

    /// Execute one page. `fetch_limit` zero means everything.
    ///
    /// A supplied cursor must have been produced by this same filter/sort
    /// specification; a dominant-attribute mismatch fails fast.
    pub fn execute(
        mut self,
        start_cursor: Option<&ResumeCursor>,
        fetch_limit: usize,
    ) -> Result<QueryPage, EngineError> {
        if self.sorts.is_empty() {
            return Err(EngineError::precondition(
                ErrorOrigin::Query,
                "expected at least one sort criterion",
            ));
        }
        self.ensure_primary_key_sort()?;

        let core = self.core_execute(start_cursor, fetch_limit)?;

        if core.records.is_empty() {
            return Ok(QueryPage {
                records: Vec::new(),
                backward_cursor: None,
                resume_cursor: start_cursor.cloned(),
                has_more: false,
            });
        }

        let forward = start_cursor.is_none_or(ResumeCursor::is_forward);

        let resume_cursor = Some(self.page_cursor(&core.records[core.records.len() - 1], forward)?);
        let backward_cursor = Some(self.page_cursor(&core.records[0], !forward)?);

        Ok(QueryPage {
            records: core.records,
            backward_cursor,
            resume_cursor,
            has_more: core.has_more,
        })
    }

    /// Fetch every matching record.
    ///
    /// When the caller declared no sort, one is synthesized so the core
    /// execution logic still has a dominant attribute to anchor on.
    pub fn execute_all(mut self) -> Result<Vec<Record>, EngineError> {
        self.synthesize_sort_if_absent()?;
        self.ensure_primary_key_sort()?;

        Ok(self.core_execute(None, 0)?.records)
    }

    /// Deduplicated values of one attribute across every matching record,
    /// sorted per any sort criteria declared for that attribute.
    pub fn distinct_values(mut self, attribute: &str) -> Result<Vec<Value>, EngineError> {
        let attr = self.resolve_attribute(attribute)?;
        if attr.kind().is_large_object() {
            return Err(EngineError::precondition(
                ErrorOrigin::Query,
                format!("unsupported distinct fetch of large-object attribute '{attribute}'"),
            ));
        }

        self.synthesize_sort_if_absent()?;
        self.ensure_primary_key_sort()?;

        let mut timer = QueryTimer::start(
            self.policy,
            self.store,
            self.clock,
            &self.context,
            self.model.kind(),
        );

        let engine = FetchEngine {
            store: self.store,
            kind: self.model.kind(),
            filters: &self.filters,
            sorts: &self.sorts,
        };
        let mut container = DistinctContainer::new(attr.clone());
        engine.chunk_fetch(&mut container, None, 0, &mut timer)?;

        let mut values = container.into_values();
        for tracker in self.sorts.iter().rev() {
            if tracker.attribute().name() == attr.name() {
                values.sort_by(|a, b| tracker.compare_values(a, b));
            }
        }

        timer.finish();
        Ok(values)
    }

    fn core_execute(
        &self,
        start_cursor: Option<&ResumeCursor>,
        fetch_limit: usize,
    ) -> Result<CoreResult, EngineError> {
        let dominant = &self.sorts[0];

        // The resume boundary rides as a separate filter so the same query
        // value can be executed repeatedly with different cursors.
        let start_cursor_filter = match start_cursor {
            None => None,
            Some(cursor) => Some(self.start_cursor_filter(cursor, dominant)?),
        };

        let mut timer = QueryTimer::start(
            self.policy,
            self.store,
            self.clock,
            &self.context,
            self.model.kind(),
        );

        let engine = FetchEngine {
            store: self.store,
            kind: self.model.kind(),
            filters: &self.filters,
            sorts: &self.sorts,
        };
        let mut accumulator = RecordAccumulator::default();
        engine.chunk_fetch(&mut accumulator, start_cursor_filter, fetch_limit, &mut timer)?;
        let mut records = accumulator.into_records();

        // Stable sorts nest backwards: applying the criteria in reverse
        // declaration order leaves the earliest-declared key dominant.
        for tracker in self.sorts.iter().rev() {
            records.sort_by(|a, b| tracker.compare_records(a, b));
        }

        // Drop everything up to and including the cursor's last-returned
        // key; those records were fetched only to resolve cross-boundary
        // subordinate-sort ambiguity.
        let mut finals = Vec::new();
        let mut has_more = false;
        let mut before_boundary = start_cursor.is_some();
        for record in records {
            if before_boundary {
                if start_cursor.is_some_and(|c| c.last_key() == record.key()) {
                    before_boundary = false;
                }
            } else if fetch_limit == 0 || finals.len() < fetch_limit {
                finals.push(record);
            } else {
                has_more = true;
                break;
            }
        }

        timer.finish();
        Ok(CoreResult {
            records: finals,
            has_more,
        })
    }

    fn resolve_attribute(&self, name: &str) -> Result<Attribute, EngineError> {
        self.model.attribute(name).cloned().ok_or_else(|| {
            EngineError::precondition(
                ErrorOrigin::Query,
                format!(
                    "unknown attribute '{name}' on record kind '{}'",
                    self.model.kind()
                ),
            )
        })
    }

    /// Force a total order: a primary-key sort in the dominant direction is
    /// appended unless the caller declared one.
    ///
    /// When a primary-key sort is already present it is the caller's job to
    /// flip its sense for backward resumption.
    fn ensure_primary_key_sort(&mut self) -> Result<(), EngineError> {
        if self.sorts.iter().any(|s| s.attribute().is_primary_key()) {
            return Ok(());
        }

        let direction = self.sorts[0].direction();
        self.sorts.push(SortTracker::new(
            self.model.primary_key().clone(),
            direction,
        )?);
        Ok(())
    }

    /// Synthesize a dominant sort for the fetch-everything entry points:
    /// the primary key when there are no filters, otherwise the first
    /// non-equality filter's attribute so its predicate rides down to the
    /// store, falling back to the primary key.
    fn synthesize_sort_if_absent(&mut self) -> Result<(), EngineError> {
        if !self.sorts.is_empty() {
            return Ok(());
        }

        if !self.filters.is_empty() {
            let anchor = self
                .filters
                .iter()
                .filter_map(FilterTracker::as_simple)
                .find(|f| !f.is_equality())
                .map(|f| f.attribute().clone());
            if let Some(attr) = anchor {
                self.sorts.push(SortTracker::new(attr, Direction::Asc)?);
                return Ok(());
            }
        }

        self.sorts.push(SortTracker::new(
            self.model.primary_key().clone(),
            Direction::Asc,
        )?);
        Ok(())
    }

    fn start_cursor_filter(
        &self,
        cursor: &ResumeCursor,
        dominant: &SortTracker,
    ) -> Result<SimpleFilter, EngineError> {
        let Some(attr) = self.model.attribute(cursor.attribute()) else {
            return Err(EngineError::cursor_precondition(format!(
                "unable to find the matching attribute for the cursor's dominant sort attribute: '{}'",
                cursor.attribute()
            )));
        };

        if attr.name() != dominant.attribute().name() {
            return Err(EngineError::cursor_precondition(format!(
                "resume cursor is inappropriate for this query: cursor anchors '{}', dominant sort is '{}'",
                attr.name(),
                dominant.attribute().name()
            )));
        }

        let value = decode_boundary(cursor.boundary(), attr.kind())?;
        let op = if dominant.direction().is_ascending() {
            FilterOp::Gte
        } else {
            FilterOp::Lte
        };

        Ok(SimpleFilter::boundary(attr.clone(), op, value))
    }

    fn page_cursor(&self, record: &Record, forward: bool) -> Result<ResumeCursor, EngineError> {
        let dominant_attr = self.sorts[0].attribute();
        let boundary = encode_boundary(&record.get(dominant_attr.name()), dominant_attr.kind())?;

        Ok(ResumeCursor::new(
            dominant_attr.name(),
            boundary,
            record.key().clone(),
            forward,
        ))
    }
}
