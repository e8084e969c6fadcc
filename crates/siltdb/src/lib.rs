//! siltdb — query execution and task locking over weak key-value stores.
//!
//! This is the public meta-crate. Downstream users depend on **siltdb**
//! only; it re-exports the stable surface of `siltdb-core`.

pub use siltdb_core as core;

pub use siltdb_core::{
    clock::{Clock, ManualClock, SystemClock},
    direction::Direction,
    engine::Engine,
    error::{EngineError, ErrorClass, ErrorOrigin, LockError, StoreError},
    lock::{LockId, LockType, TaskLockEngine},
    model::{Attribute, AttributeKind, PRIMARY_KEY, Record, RecordKey, RecordModel},
    query::{FilterOp, Query, QueryPage, ResumeCursor},
    store::{
        MemoryStore, NativeFilter, NativeOrder, NativeQuery, Store, StoreFault, StoreOp,
        StoreTransaction, TxnBody, TxnVerdict,
    },
    value::Value,
};

pub mod prelude {
    pub use siltdb_core::prelude::*;
}
