use crate::{
    error::{EngineError, StoreError},
    model::{Record, RecordKey},
    store::{NativeQuery, Store, StoreTransaction, TxnBody, TxnVerdict},
    value::nulls_last_cmp,
};
use std::{
    collections::{BTreeMap, VecDeque},
    sync::Mutex,
};

///
/// StoreFault
///
/// Injectable failure for the next fetch call, used to exercise the fetch
/// engine's back-off and quota-propagation paths.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StoreFault {
    Transient,
    Quota,
}

impl StoreFault {
    fn into_error(self) -> StoreError {
        match self {
            Self::Transient => StoreError::Transient {
                message: "injected transient failure".to_string(),
            },
            Self::Quota => StoreError::Quota {
                message: "injected quota exhaustion".to_string(),
            },
        }
    }
}

type Table = BTreeMap<RecordKey, Record>;

#[derive(Default)]
struct Inner {
    tables: BTreeMap<String, Table>,
    fetch_faults: VecDeque<StoreFault>,
    fetch_calls: u64,
}

///
/// MemoryStore
///
/// Reference in-memory backing store that enforces exactly the weak native
/// contract: when an order is present every filter must target the ordered
/// attribute, inequality filters are confined to a single attribute, and
/// records lacking the ordered attribute are excluded. Equal sort values
/// tie-break on the record key in the sort direction, which is what makes
/// offset-based resumption stable across calls.
///

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a failure for an upcoming fetch (consumed in FIFO order).
    pub fn push_fault(&self, fault: StoreFault) {
        self.lock().fetch_faults.push_back(fault);
    }

    /// Number of fetch calls issued so far, fault-consumed ones included.
    #[must_use]
    pub fn fetch_calls(&self) -> u64 {
        self.lock().fetch_calls
    }

    /// Snapshot every record of a kind in key order.
    #[must_use]
    pub fn records(&self, kind: &str) -> Vec<Record> {
        self.lock()
            .tables
            .get(kind)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn fetch_locked(inner: &mut Inner, query: &NativeQuery) -> Result<Vec<Record>, StoreError> {
    inner.fetch_calls += 1;
    if let Some(fault) = inner.fetch_faults.pop_front() {
        return Err(fault.into_error());
    }

    validate_query(query)?;

    let Some(table) = inner.tables.get(&query.kind) else {
        return Ok(Vec::new());
    };

    let mut rows: Vec<&Record> = table
        .values()
        .filter(|record| query.filters.iter().all(|f| f.matches(record)))
        .collect();

    if let Some(order) = &query.order {
        // Sorting on an attribute excludes records that do not carry it.
        rows.retain(|record| !record.get(&order.attribute).is_null());
        rows.sort_by(|a, b| {
            let ord = nulls_last_cmp(&a.get(&order.attribute), &b.get(&order.attribute))
                .then_with(|| a.key().cmp(b.key()));
            if order.direction.is_ascending() {
                ord
            } else {
                ord.reverse()
            }
        });
    }

    let limit = query.limit.unwrap_or(usize::MAX);
    Ok(rows
        .into_iter()
        .skip(query.offset)
        .take(limit)
        .cloned()
        .collect())
}

/// Reject shapes the real store cannot execute.
fn validate_query(query: &NativeQuery) -> Result<(), StoreError> {
    if let Some(order) = &query.order {
        if let Some(stray) = query
            .filters
            .iter()
            .find(|f| f.attribute() != order.attribute)
        {
            return Err(StoreError::Rejected {
                message: format!(
                    "cannot combine a sort on '{}' with a filter on '{}'",
                    order.attribute,
                    stray.attribute()
                ),
            });
        }
    } else {
        let mut inequality_attr: Option<&str> = None;
        for filter in query.filters.iter().filter(|f| f.is_inequality()) {
            match inequality_attr {
                None => inequality_attr = Some(filter.attribute()),
                Some(attr) if attr == filter.attribute() => {}
                Some(attr) => {
                    return Err(StoreError::Rejected {
                        message: format!(
                            "inequality filters span attributes '{attr}' and '{}'",
                            filter.attribute()
                        ),
                    });
                }
            }
        }
    }

    Ok(())
}

struct MemoryTransaction<'a> {
    inner: &'a mut Inner,
}

impl StoreTransaction for MemoryTransaction<'_> {
    fn fetch(&mut self, query: &NativeQuery) -> Result<Vec<Record>, StoreError> {
        fetch_locked(self.inner, query)
    }

    fn get(&mut self, kind: &str, key: &RecordKey) -> Result<Option<Record>, StoreError> {
        Ok(self
            .inner
            .tables
            .get(kind)
            .and_then(|table| table.get(key))
            .cloned())
    }

    fn put(&mut self, kind: &str, record: Record) -> Result<(), StoreError> {
        self.inner
            .tables
            .entry(kind.to_string())
            .or_default()
            .insert(record.key().clone(), record);
        Ok(())
    }

    fn delete(&mut self, kind: &str, key: &RecordKey) -> Result<(), StoreError> {
        if let Some(table) = self.inner.tables.get_mut(kind) {
            table.remove(key);
        }
        Ok(())
    }
}

impl Store for MemoryStore {
    fn fetch(&self, query: &NativeQuery) -> Result<Vec<Record>, StoreError> {
        fetch_locked(&mut self.lock(), query)
    }

    fn put(&self, kind: &str, record: Record) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner
            .tables
            .entry(kind.to_string())
            .or_default()
            .insert(record.key().clone(), record);
        Ok(())
    }

    fn delete(&self, kind: &str, key: &RecordKey) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(table) = inner.tables.get_mut(kind) {
            table.remove(key);
        }
        Ok(())
    }

    // The body must not call back into this store; the table mutex is held
    // for the whole transaction.
    fn transact(&self, body: &mut TxnBody<'_>) -> Result<TxnVerdict, EngineError> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let snapshot = inner.tables.clone();

        let mut txn = MemoryTransaction { inner };
        match body(&mut txn) {
            Ok(TxnVerdict::Commit) => Ok(TxnVerdict::Commit),
            Ok(TxnVerdict::Rollback) => {
                guard.tables = snapshot;
                Ok(TxnVerdict::Rollback)
            }
            Err(err) => {
                guard.tables = snapshot;
                Err(err)
            }
        }
    }
}
