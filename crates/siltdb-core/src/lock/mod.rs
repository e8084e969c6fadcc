use crate::{
    clock::Clock,
    error::{EngineError, ErrorClass, LockError},
    model::{Record, RecordKey},
    store::{NativeFilter, NativeQuery, Store, StoreOp, TxnVerdict},
    value::Value,
};
use derive_more::Display;
use ulid::Ulid;
use xxhash_rust::xxh3::xxh3_64;

/// Record kind holding one row per lock acquisition.
pub(crate) const LOCK_KIND: &str = "_TASK_LOCK_";

const SUBJECT_ATTRIBUTE: &str = "SUBJECT_ID";
const TASK_TYPE_ATTRIBUTE: &str = "TASK_TYPE";
const LOCK_ID_ATTRIBUTE: &str = "LOCK_ID";
const EXPIRES_AT_ATTRIBUTE: &str = "EXPIRES_AT";

/// A lock expired longer ago than this is garbage wherever the sweep
/// finds it.
const STALE_GRACE_MILLIS: i64 = 24 * 3600 * 1000;

/// Per-record delete attempts before giving up on a contended group.
const DELETE_ATTEMPTS: usize = 3;

/// Base back-off before reissuing a contended lock mutation; jittered so
/// competing processes do not reconverge in step.
const CONTENTION_SLEEP_BASE_MILLIS: u64 = 1_100;

const LOG_TARGET: &str = "siltdb::lock";

///
/// LockType
///
/// A category of background work to serialize: its wire name, how long an
/// acquisition stays valid without renewal, and the settle interval the
/// store needs before a read after a write can be trusted.
///

#[derive(Clone, Copy, Debug)]
pub struct LockType {
    pub name: &'static str,
    pub expiration_timeout_millis: i64,
    pub min_settle_millis: i64,
}

///
/// LockId
///
/// Random per-acquisition holder id. Two attempts never share one, which is
/// what makes ownership checks meaningful.
///

#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub struct LockId(String);

impl LockId {
    /// Draw a fresh id from the clock plus OS randomness.
    #[must_use]
    pub fn generate(clock: &dyn Clock) -> Self {
        let timestamp = u64::try_from(clock.now_millis()).unwrap_or(0);
        Self(Ulid::from_parts(timestamp, rand::random::<u128>()).to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

///
/// TaskLockEngine
///
/// Transactional named-lock primitive guaranteeing at-most-one active
/// worker per (subject, lock type) across processes. Acquisition commits a
/// record, waits out the settle interval, then re-reads to confirm no
/// concurrent writer won; anything ambiguous fails conservatively rather
/// than risking two holders.
///

pub struct TaskLockEngine<'a> {
    store: &'a dyn Store,
    clock: &'a dyn Clock,
}

impl<'a> TaskLockEngine<'a> {
    pub(crate) const fn new(store: &'a dyn Store, clock: &'a dyn Clock) -> Self {
        Self { store, clock }
    }

    /// Try to acquire the lock.
    ///
    /// `Ok(false)` means another holder legitimately owns it. Consistency
    /// anomalies (unresolved races, verification mismatches) sweep the
    /// caller's record and surface as errors so the caller can retry
    /// explicitly.
    pub fn obtain(
        &self,
        lock_id: &LockId,
        subject: &str,
        lock_type: &LockType,
    ) -> Result<bool, EngineError> {
        tracing::debug!(
            target: LOG_TARGET,
            lock_id = %lock_id,
            subject,
            task = lock_type.name,
            "trying to obtain lock"
        );

        let verdict = self.checked_transact(lock_id, subject, lock_type, &mut |txn| {
            let now = self.clock.now_millis();
            match query_for_lock(txn, now, subject, lock_type)? {
                None => {
                    let record = lock_record(
                        lock_id,
                        subject,
                        lock_type,
                        now + lock_type.expiration_timeout_millis,
                    );
                    txn.put(LOCK_KIND, record)?;
                    Ok(TxnVerdict::Commit)
                }
                Some(existing) => {
                    // Re-entry with the same id only happens when the same
                    // id was deliberately reused; it holds the lock already.
                    if lock_id_of(&existing)? == lock_id.as_str() {
                        Ok(TxnVerdict::Commit)
                    } else {
                        Ok(TxnVerdict::Rollback)
                    }
                }
            }
        })?;

        if verdict == TxnVerdict::Rollback {
            tracing::debug!(
                target: LOG_TARGET,
                lock_id = %lock_id,
                subject,
                task = lock_type.name,
                "pre-existing lock held elsewhere"
            );
            self.sleep_briefly();
            return Ok(false);
        }

        self.settle_and_verify(lock_id, subject, lock_type)?;

        tracing::debug!(
            target: LOG_TARGET,
            lock_id = %lock_id,
            subject,
            task = lock_type.name,
            "lock obtained"
        );
        Ok(true)
    }

    /// Refresh `expires_at` on a lock this id already holds. The holder has
    /// no elevated claim: any contention fails the renewal.
    pub fn renew(
        &self,
        lock_id: &LockId,
        subject: &str,
        lock_type: &LockType,
    ) -> Result<bool, EngineError> {
        let verdict = self.checked_transact(lock_id, subject, lock_type, &mut |txn| {
            let now = self.clock.now_millis();
            match query_for_lock(txn, now, subject, lock_type)? {
                Some(existing) if lock_id_of(&existing)? == lock_id.as_str() => {
                    let mut refreshed = existing;
                    refreshed.set(
                        EXPIRES_AT_ATTRIBUTE,
                        Value::Timestamp(now + lock_type.expiration_timeout_millis),
                    );
                    txn.put(LOCK_KIND, refreshed)?;
                    Ok(TxnVerdict::Commit)
                }
                _ => Ok(TxnVerdict::Rollback),
            }
        })?;

        if verdict == TxnVerdict::Rollback {
            return Ok(false);
        }

        self.settle_and_verify(lock_id, subject, lock_type)?;

        tracing::debug!(
            target: LOG_TARGET,
            lock_id = %lock_id,
            subject,
            task = lock_type.name,
            "lock renewed"
        );
        Ok(true)
    }

    /// Delete the lock record, but only when this id owns it. A
    /// non-matching id reports failure and leaves the record untouched.
    pub fn release(
        &self,
        lock_id: &LockId,
        subject: &str,
        lock_type: &LockType,
    ) -> Result<bool, EngineError> {
        let records = self.fetch_lock_records(subject, lock_type)?;
        let owned: Vec<RecordKey> = records
            .iter()
            .filter(|r| r.get(LOCK_ID_ATTRIBUTE) == Value::Text(lock_id.as_str().to_string()))
            .map(|r| r.key().clone())
            .collect();

        if owned.is_empty() {
            tracing::warn!(
                target: LOG_TARGET,
                lock_id = %lock_id,
                subject,
                task = lock_type.name,
                "release refused: lock not held by this id"
            );
            return Ok(false);
        }

        for key in owned {
            self.delete_with_retries(&key)?;
        }

        tracing::debug!(
            target: LOG_TARGET,
            lock_id = %lock_id,
            subject,
            task = lock_type.name,
            "lock released"
        );
        Ok(true)
    }

    /// Garbage-collect lock records for a (subject, type) pair: anything
    /// expired past the stale grace, plus anything this id wrote (cleanup
    /// after a failed or ambiguous acquisition).
    ///
    /// Failures deleting stale records belonging to others are logged and
    /// swallowed; failure deleting the caller's own record propagates.
    pub fn sweep(
        &self,
        lock_id: &LockId,
        subject: &str,
        lock_type: &LockType,
    ) -> Result<(), EngineError> {
        let now = self.clock.now_millis();
        let records = self.fetch_lock_records(subject, lock_type)?;

        let mut own_failure: Option<EngineError> = None;
        for record in records {
            let is_own =
                record.get(LOCK_ID_ATTRIBUTE) == Value::Text(lock_id.as_str().to_string());
            let long_expired = match record.get(EXPIRES_AT_ATTRIBUTE) {
                Value::Timestamp(expires_at) => expires_at + STALE_GRACE_MILLIS < now,
                // A lock record without a readable deadline is garbage.
                _ => true,
            };

            if !is_own && !long_expired {
                continue;
            }

            match self.delete_with_retries(record.key()) {
                Ok(()) => {
                    tracing::debug!(
                        target: LOG_TARGET,
                        key = %record.key(),
                        is_own,
                        "removed lock record"
                    );
                }
                Err(err) if is_own => own_failure = Some(err),
                Err(err) => {
                    tracing::warn!(
                        target: LOG_TARGET,
                        key = %record.key(),
                        error = %err,
                        "swallowed stale-lock delete failure"
                    );
                }
            }
        }

        own_failure.map_or(Ok(()), Err)
    }

    /// Run a lock transaction, converting consistency anomalies into a
    /// cleanup sweep followed by the original error.
    fn checked_transact(
        &self,
        lock_id: &LockId,
        subject: &str,
        lock_type: &LockType,
        body: &mut dyn FnMut(
            &mut dyn crate::store::StoreTransaction,
        ) -> Result<TxnVerdict, EngineError>,
    ) -> Result<TxnVerdict, EngineError> {
        match self.store.transact(body) {
            Ok(verdict) => Ok(verdict),
            Err(err) if err.class == ErrorClass::Consistency => {
                tracing::warn!(
                    target: LOG_TARGET,
                    lock_id = %lock_id,
                    subject,
                    task = lock_type.name,
                    error = %err,
                    "lock transaction hit a consistency anomaly; sweeping"
                );
                if let Err(sweep_err) = self.sweep(lock_id, subject, lock_type) {
                    tracing::warn!(
                        target: LOG_TARGET,
                        error = %sweep_err,
                        "unable to sweep after consistency anomaly"
                    );
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Wait out the settle interval, then confirm the committed record is
    /// still ours. Anything else revokes the acquisition: the record is
    /// swept and the anomaly propagates.
    fn settle_and_verify(
        &self,
        lock_id: &LockId,
        subject: &str,
        lock_type: &LockType,
    ) -> Result<(), EngineError> {
        self.clock
            .sleep_millis(u64::try_from(lock_type.min_settle_millis).unwrap_or(0));

        let outcome = self.store.transact(&mut |txn| {
            let now = self.clock.now_millis();
            match query_for_lock(txn, now, subject, lock_type)? {
                None => Err(LockError::Missing {
                    lock_id: lock_id.as_str().to_string(),
                    subject: subject.to_string(),
                    task: lock_type.name.to_string(),
                }
                .into()),
                Some(record) => {
                    let held_by = lock_id_of(&record)?;
                    if held_by == lock_id.as_str() {
                        Ok(TxnVerdict::Commit)
                    } else {
                        Err(LockError::Overwritten {
                            expected: lock_id.as_str().to_string(),
                            actual: held_by,
                        }
                        .into())
                    }
                }
            }
        });

        match outcome {
            Ok(_) => Ok(()),
            Err(err) => {
                tracing::warn!(
                    target: LOG_TARGET,
                    lock_id = %lock_id,
                    subject,
                    task = lock_type.name,
                    error = %err,
                    "lock verification failed; deleting the lock just created"
                );
                if let Err(sweep_err) = self.sweep(lock_id, subject, lock_type) {
                    tracing::warn!(
                        target: LOG_TARGET,
                        error = %sweep_err,
                        "unable to delete lock after failed verification"
                    );
                }
                Err(err)
            }
        }
    }

    fn fetch_lock_records(
        &self,
        subject: &str,
        lock_type: &LockType,
    ) -> Result<Vec<Record>, EngineError> {
        Ok(self.store.fetch(&lock_query(subject, lock_type))?)
    }

    fn delete_with_retries(&self, key: &RecordKey) -> Result<(), EngineError> {
        let mut last_failure: Option<EngineError> = None;

        for attempt in 0..DELETE_ATTEMPTS {
            match self.store.transact(&mut |txn| {
                txn.delete(LOCK_KIND, key)?;
                Ok(TxnVerdict::Commit)
            }) {
                Ok(_) => return Ok(()),
                Err(err) => {
                    tracing::warn!(
                        target: LOG_TARGET,
                        key = %key,
                        attempt,
                        error = %err,
                        "intermediate lock delete failure"
                    );
                    last_failure = Some(err);
                    self.sleep_briefly();
                }
            }
        }

        Err(last_failure
            .unwrap_or_else(|| EngineError::query_internal("lock delete retries exhausted")))
    }

    /// Contended groups need a moment to settle before the next attempt.
    fn sleep_briefly(&self) {
        self.clock
            .sleep_millis(CONTENTION_SLEEP_BASE_MILLIS + u64::from(rand::random::<u8>()));
    }
}

/// Locate the winning live lock record for a (subject, type) pair.
///
/// Expired records are skipped. Among live records the earliest-expiring
/// one wins, unless two fall within the settle window of each other; that
/// race is unresolvable and fails both sides.
fn query_for_lock(
    txn: &mut dyn crate::store::StoreTransaction,
    now: i64,
    subject: &str,
    lock_type: &LockType,
) -> Result<Option<Record>, EngineError> {
    let rows = txn.fetch(&lock_query(subject, lock_type))?;

    let mut active: Option<(Record, i64)> = None;
    for record in rows {
        let expires_at = expires_at_of(&record)?;
        if expires_at <= now {
            tracing::debug!(target: LOG_TARGET, key = %record.key(), "skipping expired lock record");
            continue;
        }

        match &active {
            None => active = Some((record, expires_at)),
            Some((_, active_expires)) => {
                if (active_expires - expires_at).abs() < lock_type.min_settle_millis {
                    return Err(LockError::UnresolvedRace {
                        subject: subject.to_string(),
                        task: lock_type.name.to_string(),
                    }
                    .into());
                }
                if expires_at < *active_expires {
                    active = Some((record, expires_at));
                }
            }
        }
    }

    Ok(active.map(|(record, _)| record))
}

fn lock_query(subject: &str, lock_type: &LockType) -> NativeQuery {
    let mut query = NativeQuery::new(LOCK_KIND);
    query.filters.push(NativeFilter::Compare {
        attribute: SUBJECT_ATTRIBUTE.to_string(),
        op: StoreOp::Eq,
        value: Value::from(subject),
    });
    query.filters.push(NativeFilter::Compare {
        attribute: TASK_TYPE_ATTRIBUTE.to_string(),
        op: StoreOp::Eq,
        value: Value::from(lock_type.name),
    });
    query
}

fn lock_record(lock_id: &LockId, subject: &str, lock_type: &LockType, expires_at: i64) -> Record {
    Record::new(record_key(lock_id, subject, lock_type))
        .with(SUBJECT_ATTRIBUTE, subject)
        .with(TASK_TYPE_ATTRIBUTE, lock_type.name)
        .with(LOCK_ID_ATTRIBUTE, lock_id.as_str())
        .with(EXPIRES_AT_ATTRIBUTE, Value::Timestamp(expires_at))
}

/// Spread lock records across 256 logical groups so unrelated subjects do
/// not contend on one transactional neighborhood.
fn record_key(lock_id: &LockId, subject: &str, lock_type: &LockType) -> RecordKey {
    let group = xxh3_64(format!("{subject}{}", lock_type.name).as_bytes()) & 0xff;
    RecordKey::new(format!(
        "{group:02x}${subject}${}${}",
        lock_type.name,
        lock_id.as_str()
    ))
}

fn lock_id_of(record: &Record) -> Result<String, EngineError> {
    match record.get(LOCK_ID_ATTRIBUTE) {
        Value::Text(id) => Ok(id),
        _ => Err(LockError::MalformedRecord {
            key: record.key().as_str().to_string(),
            field: LOCK_ID_ATTRIBUTE,
        }
        .into()),
    }
}

fn expires_at_of(record: &Record) -> Result<i64, EngineError> {
    match record.get(EXPIRES_AT_ATTRIBUTE) {
        Value::Timestamp(expires_at) => Ok(expires_at),
        _ => Err(LockError::MalformedRecord {
            key: record.key().as_str().to_string(),
            field: EXPIRES_AT_ATTRIBUTE,
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, store::MemoryStore};

    const EXPORT: LockType = LockType {
        name: "export",
        expiration_timeout_millis: 60_000,
        min_settle_millis: 2_000,
    };

    #[test]
    fn lock_ids_are_unique() {
        let clock = ManualClock::starting_at(5_000);
        let a = LockId::generate(&clock);
        let b = LockId::generate(&clock);
        assert_ne!(a, b);
    }

    #[test]
    fn records_for_a_pair_share_a_group_prefix() {
        let clock = ManualClock::starting_at(0);
        let a = record_key(&LockId::generate(&clock), "form1", &EXPORT);
        let b = record_key(&LockId::generate(&clock), "form1", &EXPORT);
        assert_eq!(&a.as_str()[..2], &b.as_str()[..2]);
        assert_ne!(a, b);
    }

    #[test]
    fn query_for_lock_skips_expired_and_prefers_earliest() {
        let store = MemoryStore::new();
        let now = 100_000;

        let expired = LockId::new("expired");
        let early = LockId::new("early");
        let late = LockId::new("late");
        store
            .put(LOCK_KIND, lock_record(&expired, "form1", &EXPORT, now - 1))
            .unwrap();
        store
            .put(LOCK_KIND, lock_record(&early, "form1", &EXPORT, now + 10_000))
            .unwrap();
        store
            .put(LOCK_KIND, lock_record(&late, "form1", &EXPORT, now + 20_000))
            .unwrap();

        let winner = store
            .transact(&mut |txn| {
                let winner = query_for_lock(txn, now, "form1", &EXPORT)?.map(|r| r.get(LOCK_ID_ATTRIBUTE));
                assert_eq!(winner, Some(Value::from("early")));
                Ok(TxnVerdict::Rollback)
            })
            .unwrap();
        assert_eq!(winner, TxnVerdict::Rollback);
    }

    #[test]
    fn near_simultaneous_live_locks_are_an_unresolved_race() {
        let store = MemoryStore::new();
        let now = 100_000;

        store
            .put(
                LOCK_KIND,
                lock_record(&LockId::new("a"), "form1", &EXPORT, now + 10_000),
            )
            .unwrap();
        store
            .put(
                LOCK_KIND,
                lock_record(
                    &LockId::new("b"),
                    "form1",
                    &EXPORT,
                    now + 10_000 + EXPORT.min_settle_millis - 1,
                ),
            )
            .unwrap();

        let err = store
            .transact(&mut |txn| {
                query_for_lock(txn, now, "form1", &EXPORT)?;
                Ok(TxnVerdict::Commit)
            })
            .unwrap_err();
        assert_eq!(err.class, ErrorClass::Consistency);
    }

    #[test]
    fn malformed_lock_record_is_reported() {
        let store = MemoryStore::new();
        store
            .put(
                LOCK_KIND,
                Record::new("junk")
                    .with(SUBJECT_ATTRIBUTE, "form1")
                    .with(TASK_TYPE_ATTRIBUTE, "export")
                    .with(LOCK_ID_ATTRIBUTE, "x"),
            )
            .unwrap();

        let err = store
            .transact(&mut |txn| {
                query_for_lock(txn, 0, "form1", &EXPORT)?;
                Ok(TxnVerdict::Commit)
            })
            .unwrap_err();
        assert_eq!(err.class, ErrorClass::Internal);
    }
}
