mod memory;

pub use memory::{MemoryStore, StoreFault};

use crate::{
    error::{EngineError, StoreError},
    model::{Record, RecordKey},
    value::{Value, nulls_last_cmp},
};
use std::cmp::Ordering;
use std::fmt::Write as _;

use crate::direction::Direction;

///
/// StoreOp
///
/// Native comparison operators the backing store can render. Set membership
/// is a separate filter shape (`NativeFilter::In`).
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StoreOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl StoreOp {
    const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
        }
    }
}

///
/// NativeFilter
///
/// A predicate in the store's native representation. The store honors at
/// most one filterable-and-sortable attribute per call; everything else the
/// engine evaluates client-side.
///

#[derive(Clone, Debug)]
pub enum NativeFilter {
    Compare {
        attribute: String,
        op: StoreOp,
        value: Value,
    },
    In {
        attribute: String,
        values: Vec<Value>,
    },
}

impl NativeFilter {
    #[must_use]
    pub fn attribute(&self) -> &str {
        match self {
            Self::Compare { attribute, .. } | Self::In { attribute, .. } => attribute,
        }
    }

    /// Inequality filters constrain which attribute the store may sort on.
    #[must_use]
    pub const fn is_inequality(&self) -> bool {
        match self {
            Self::Compare { op, .. } => !matches!(op, StoreOp::Eq),
            Self::In { .. } => false,
        }
    }

    /// Server-side evaluation, shared by conforming store implementations.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::Compare {
                attribute,
                op,
                value,
            } => {
                let field = record.get(attribute);
                let ord = nulls_last_cmp(&field, value);
                match op {
                    StoreOp::Eq => ord == Ordering::Equal,
                    StoreOp::Ne => ord != Ordering::Equal,
                    StoreOp::Lt => ord == Ordering::Less,
                    StoreOp::Lte => ord != Ordering::Greater,
                    StoreOp::Gt => ord == Ordering::Greater,
                    StoreOp::Gte => ord != Ordering::Less,
                }
            }
            Self::In { attribute, values } => {
                let field = record.get(attribute);
                values
                    .iter()
                    .any(|v| nulls_last_cmp(&field, v) == Ordering::Equal)
            }
        }
    }
}

///
/// NativeOrder
///

#[derive(Clone, Debug)]
pub struct NativeOrder {
    pub attribute: String,
    pub direction: Direction,
}

///
/// NativeQuery
///
/// One bounded call against the backing store: kind, renderable filters, at
/// most one sort attribute, and the fetch window (offset, chunk hint,
/// read-set limit).
///

#[derive(Clone, Debug)]
pub struct NativeQuery {
    pub kind: String,
    pub filters: Vec<NativeFilter>,
    pub order: Option<NativeOrder>,
    pub offset: usize,
    pub chunk: usize,
    pub limit: Option<usize>,
}

impl NativeQuery {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            filters: Vec::new(),
            order: None,
            offset: 0,
            chunk: 0,
            limit: None,
        }
    }

    /// Render the query for slow-call diagnostics.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = write!(out, "{}[", self.kind);
        for (i, filter) in self.filters.iter().enumerate() {
            if i > 0 {
                out.push_str(" & ");
            }
            match filter {
                NativeFilter::Compare {
                    attribute,
                    op,
                    value,
                } => {
                    let _ = write!(out, "{attribute}{}{value:?}", op.symbol());
                }
                NativeFilter::In { attribute, values } => {
                    let _ = write!(out, "{attribute} in({})", values.len());
                }
            }
        }
        out.push(']');
        if let Some(order) = &self.order {
            let dir = if order.direction.is_ascending() {
                "asc"
            } else {
                "desc"
            };
            let _ = write!(out, " order by {} {dir}", order.attribute);
        }
        let _ = write!(out, " offset {}", self.offset);
        if let Some(limit) = self.limit {
            let _ = write!(out, " limit {limit}");
        }

        out
    }
}

///
/// TxnVerdict
///
/// Outcome a transaction body reports back: apply the buffered mutations or
/// discard them.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TxnVerdict {
    Commit,
    Rollback,
}

///
/// StoreTransaction
///
/// Key-level atomic operations available inside `Store::transact`.
///

pub trait StoreTransaction {
    fn fetch(&mut self, query: &NativeQuery) -> Result<Vec<Record>, StoreError>;

    fn get(&mut self, kind: &str, key: &RecordKey) -> Result<Option<Record>, StoreError>;

    fn put(&mut self, kind: &str, record: Record) -> Result<(), StoreError>;

    fn delete(&mut self, kind: &str, key: &RecordKey) -> Result<(), StoreError>;
}

/// Transaction body signature for [`Store::transact`].
pub type TxnBody<'b> = dyn FnMut(&mut dyn StoreTransaction) -> Result<TxnVerdict, EngineError> + 'b;

///
/// Store
///
/// The backing store's native query/transaction API. Implementations honor
/// at most one filterable-and-sortable attribute per fetch; other filters
/// must be renderable but only the sorted attribute's predicate is
/// guaranteed server-side.
///

pub trait Store: Send + Sync {
    /// One bounded fetch. Records whose sort-attribute value is null are
    /// excluded whenever an order is requested.
    fn fetch(&self, query: &NativeQuery) -> Result<Vec<Record>, StoreError>;

    fn put(&self, kind: &str, record: Record) -> Result<(), StoreError>;

    fn delete(&self, kind: &str, key: &RecordKey) -> Result<(), StoreError>;

    /// Run `body` atomically. Mutations take effect only on
    /// [`TxnVerdict::Commit`]; an error rolls back and propagates.
    fn transact(&self, body: &mut TxnBody<'_>) -> Result<TxnVerdict, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_filter_matches_with_nulls_last() {
        let record = Record::new("k1").with("age", 15i64);

        let gt = NativeFilter::Compare {
            attribute: "age".to_string(),
            op: StoreOp::Gt,
            value: Value::Int(10),
        };
        assert!(gt.matches(&record));

        // A missing attribute reads as null, which sorts after every value.
        let gt_missing = NativeFilter::Compare {
            attribute: "height".to_string(),
            op: StoreOp::Gt,
            value: Value::Int(10),
        };
        assert!(gt_missing.matches(&record));

        let eq_missing = NativeFilter::Compare {
            attribute: "height".to_string(),
            op: StoreOp::Eq,
            value: Value::Null,
        };
        assert!(eq_missing.matches(&record));
    }

    #[test]
    fn in_filter_is_an_or_of_equalities() {
        let record = Record::new("k1").with("city", "NYC");
        let filter = NativeFilter::In {
            attribute: "city".to_string(),
            values: vec![Value::from("LA"), Value::from("NYC")],
        };
        assert!(filter.matches(&record));

        let filter = NativeFilter::In {
            attribute: "city".to_string(),
            values: vec![Value::from("SF")],
        };
        assert!(!filter.matches(&record));
    }

    #[test]
    fn describe_renders_filters_and_window() {
        let mut q = NativeQuery::new("submission");
        q.filters.push(NativeFilter::Compare {
            attribute: "age".to_string(),
            op: StoreOp::Gte,
            value: Value::Int(10),
        });
        q.order = Some(NativeOrder {
            attribute: "age".to_string(),
            direction: Direction::Asc,
        });
        q.offset = 5;
        q.limit = Some(100);

        let rendered = q.describe();
        assert!(rendered.starts_with("submission["));
        assert!(rendered.contains("age>="));
        assert!(rendered.contains("order by age asc"));
        assert!(rendered.contains("offset 5"));
        assert!(rendered.contains("limit 100"));
    }
}
