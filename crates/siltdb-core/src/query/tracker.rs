use crate::{
    direction::Direction,
    error::{EngineError, ErrorOrigin},
    model::{Attribute, AttributeKind, Record},
    store::{NativeFilter, NativeOrder, NativeQuery, StoreOp},
    value::{Value, canonical_cmp, nulls_last_cmp, typed_cmp},
};
use std::cmp::Ordering;

///
/// FilterOp
///
/// Caller-facing comparison operators.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

/// Fixed operator translation into the store's native representation.
pub(crate) const fn store_op(op: FilterOp) -> StoreOp {
    match op {
        FilterOp::Eq => StoreOp::Eq,
        FilterOp::Ne => StoreOp::Ne,
        FilterOp::Lt => StoreOp::Lt,
        FilterOp::Lte => StoreOp::Lte,
        FilterOp::Gt => StoreOp::Gt,
        FilterOp::Gte => StoreOp::Gte,
    }
}

/// Validate a filter/sort attribute and normalize a literal against it.
///
/// Decimal attributes round literals to their declared scale (half-up) so
/// every later comparison sees the scaled representation.
fn normalize_literal(attribute: &Attribute, value: Value) -> Result<Value, EngineError> {
    if attribute.kind().is_large_object() {
        return Err(EngineError::precondition(
            ErrorOrigin::Query,
            format!(
                "cannot filter on large-object attribute '{}'",
                attribute.name()
            ),
        ));
    }

    if !attribute.kind().admits(&value) {
        return Err(EngineError::precondition(
            ErrorOrigin::Query,
            format!(
                "literal of kind {} does not match attribute '{}' ({:?})",
                value.kind_label(),
                attribute.name(),
                attribute.kind()
            ),
        ));
    }

    let value = match attribute.kind() {
        AttributeKind::Decimal { scale, .. } => value.rescaled(*scale),
        _ => value,
    };

    Ok(value)
}

///
/// SimpleFilter
///
/// One comparison against one attribute. Evaluated client-side for every
/// candidate; rendered into the native query only when it targets the
/// dominant sort attribute.
///

#[derive(Clone, Debug)]
pub(crate) struct SimpleFilter {
    attribute: Attribute,
    op: FilterOp,
    value: Value,
}

impl SimpleFilter {
    pub(crate) fn new(
        attribute: Attribute,
        op: FilterOp,
        value: Value,
    ) -> Result<Self, EngineError> {
        let value = normalize_literal(&attribute, value)?;

        Ok(Self {
            attribute,
            op,
            value,
        })
    }

    /// Internal constructor for boundary filters built from store-sourced
    /// values (resume cursors, implied filters); skips literal validation.
    pub(crate) const fn boundary(attribute: Attribute, op: FilterOp, value: Value) -> Self {
        Self {
            attribute,
            op,
            value,
        }
    }

    pub(crate) fn attribute(&self) -> &Attribute {
        &self.attribute
    }

    pub(crate) fn is_equality(&self) -> bool {
        self.op == FilterOp::Eq
    }

    pub(crate) fn passes(&self, record: &Record) -> bool {
        let ord = nulls_last_cmp(&record.get(self.attribute.name()), &self.value);
        match self.op {
            FilterOp::Eq => ord == Ordering::Equal,
            FilterOp::Ne => ord != Ordering::Equal,
            FilterOp::Lt => ord == Ordering::Less,
            FilterOp::Lte => ord != Ordering::Greater,
            FilterOp::Gt => ord == Ordering::Greater,
            FilterOp::Gte => ord != Ordering::Less,
        }
    }

    pub(crate) fn push_down(&self, query: &mut NativeQuery) {
        query.filters.push(NativeFilter::Compare {
            attribute: self.attribute.name().to_string(),
            op: store_op(self.op),
            value: self.value.clone(),
        });
    }
}

///
/// SetFilter
///
/// Set-membership test: an OR of equality comparisons over one attribute.
///

#[derive(Clone, Debug)]
pub(crate) struct SetFilter {
    attribute: Attribute,
    values: Vec<Value>,
}

impl SetFilter {
    pub(crate) fn new(attribute: Attribute, values: Vec<Value>) -> Result<Self, EngineError> {
        let values = values
            .into_iter()
            .map(|v| normalize_literal(&attribute, v))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { attribute, values })
    }

    pub(crate) fn attribute(&self) -> &Attribute {
        &self.attribute
    }

    pub(crate) fn passes(&self, record: &Record) -> bool {
        let field = record.get(self.attribute.name());
        self.values
            .iter()
            .any(|v| nulls_last_cmp(&field, v) == Ordering::Equal)
    }

    pub(crate) fn push_down(&self, query: &mut NativeQuery) {
        query.filters.push(NativeFilter::In {
            attribute: self.attribute.name().to_string(),
            values: self.values.clone(),
        });
    }
}

///
/// FilterTracker
///

#[derive(Clone, Debug)]
pub(crate) enum FilterTracker {
    Simple(SimpleFilter),
    Set(SetFilter),
}

impl FilterTracker {
    pub(crate) fn attribute(&self) -> &Attribute {
        match self {
            Self::Simple(f) => f.attribute(),
            Self::Set(f) => f.attribute(),
        }
    }

    pub(crate) fn passes(&self, record: &Record) -> bool {
        match self {
            Self::Simple(f) => f.passes(record),
            Self::Set(f) => f.passes(record),
        }
    }

    pub(crate) fn push_down(&self, query: &mut NativeQuery) {
        match self {
            Self::Simple(f) => f.push_down(query),
            Self::Set(f) => f.push_down(query),
        }
    }

    /// The simple non-equality view, used when synthesizing a sort from the
    /// filter list.
    pub(crate) fn as_simple(&self) -> Option<&SimpleFilter> {
        match self {
            Self::Simple(f) => Some(f),
            Self::Set(_) => None,
        }
    }
}

///
/// SortTracker
///
/// One sort criterion plus its comparators. Nulls sort after non-null
/// values regardless of direction; direction only flips the non-null
/// comparison.
///

#[derive(Clone, Debug)]
pub(crate) struct SortTracker {
    attribute: Attribute,
    direction: Direction,
}

impl SortTracker {
    pub(crate) fn new(attribute: Attribute, direction: Direction) -> Result<Self, EngineError> {
        if attribute.kind().is_large_object() {
            return Err(EngineError::precondition(
                ErrorOrigin::Query,
                format!(
                    "cannot sort on large-object attribute '{}'",
                    attribute.name()
                ),
            ));
        }

        Ok(Self {
            attribute,
            direction,
        })
    }

    pub(crate) fn attribute(&self) -> &Attribute {
        &self.attribute
    }

    pub(crate) const fn direction(&self) -> Direction {
        self.direction
    }

    pub(crate) fn compare_records(&self, a: &Record, b: &Record) -> Ordering {
        self.compare_values(&a.get(self.attribute.name()), &b.get(self.attribute.name()))
    }

    pub(crate) fn compare_values(&self, a: &Value, b: &Value) -> Ordering {
        match (a.is_null(), b.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                let ord = typed_cmp(a, b).unwrap_or_else(|| canonical_cmp(a, b));
                if self.direction.is_ascending() {
                    ord
                } else {
                    ord.reverse()
                }
            }
        }
    }

    pub(crate) fn push_down(&self, query: &mut NativeQuery) {
        query.order = Some(NativeOrder {
            attribute: self.attribute.name().to_string(),
            direction: self.direction,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn int_attr(name: &str) -> Attribute {
        Attribute::new(name, AttributeKind::Int)
    }

    fn decimal_attr(name: &str, scale: u32) -> Attribute {
        Attribute::new(
            name,
            AttributeKind::Decimal {
                scale,
                precision: 12,
            },
        )
    }

    #[test]
    fn operator_table_covers_every_operator() {
        assert_eq!(store_op(FilterOp::Eq), StoreOp::Eq);
        assert_eq!(store_op(FilterOp::Ne), StoreOp::Ne);
        assert_eq!(store_op(FilterOp::Lt), StoreOp::Lt);
        assert_eq!(store_op(FilterOp::Lte), StoreOp::Lte);
        assert_eq!(store_op(FilterOp::Gt), StoreOp::Gt);
        assert_eq!(store_op(FilterOp::Gte), StoreOp::Gte);
    }

    #[test]
    fn simple_filter_evaluates_all_operators() {
        let record = Record::new("k").with("age", 15i64);
        let cases = [
            (FilterOp::Eq, 15, true),
            (FilterOp::Eq, 10, false),
            (FilterOp::Ne, 10, true),
            (FilterOp::Lt, 20, true),
            (FilterOp::Lte, 15, true),
            (FilterOp::Gt, 10, true),
            (FilterOp::Gt, 15, false),
            (FilterOp::Gte, 15, true),
        ];
        for (op, literal, expected) in cases {
            let filter = SimpleFilter::new(int_attr("age"), op, Value::Int(literal)).unwrap();
            assert_eq!(filter.passes(&record), expected, "{op:?} {literal}");
        }
    }

    #[test]
    fn decimal_literals_are_rescaled_before_comparison() {
        let record = Record::new("k").with("price", Decimal::from_str("10.00").unwrap());

        let filter = SimpleFilter::new(
            decimal_attr("price", 2),
            FilterOp::Eq,
            Value::Decimal(Decimal::from_str("10.001").unwrap()),
        )
        .unwrap();
        assert!(filter.passes(&record));
    }

    #[test]
    fn large_object_filters_fail_fast() {
        let attr = Attribute::new("body", AttributeKind::LongText);
        let err = SimpleFilter::new(attr, FilterOp::Eq, Value::Null).unwrap_err();
        assert_eq!(err.class, crate::error::ErrorClass::Precondition);

        let attr = Attribute::new("body", AttributeKind::Blob);
        let err = SortTracker::new(attr, Direction::Asc).unwrap_err();
        assert_eq!(err.class, crate::error::ErrorClass::Precondition);
    }

    #[test]
    fn mistyped_literal_fails_fast() {
        let err = SimpleFilter::new(int_attr("age"), FilterOp::Eq, Value::from("ten")).unwrap_err();
        assert_eq!(err.class, crate::error::ErrorClass::Precondition);
    }

    #[test]
    fn set_filter_matches_any_member() {
        let record = Record::new("k").with("city", "NYC");
        let filter = SetFilter::new(
            Attribute::new("city", AttributeKind::Text),
            vec![Value::from("LA"), Value::from("NYC")],
        )
        .unwrap();
        assert!(filter.passes(&record));
    }

    #[test]
    fn sort_tracker_keeps_nulls_last_in_both_directions() {
        let with_value = Record::new("a").with("age", 5i64);
        let without_value = Record::new("b");

        for direction in [Direction::Asc, Direction::Desc] {
            let tracker = SortTracker::new(int_attr("age"), direction).unwrap();
            assert_eq!(
                tracker.compare_records(&with_value, &without_value),
                Ordering::Less,
                "{direction:?}"
            );
        }
    }

    #[test]
    fn sort_tracker_flips_non_null_comparison_only() {
        let younger = Record::new("a").with("age", 5i64);
        let older = Record::new("b").with("age", 9i64);

        let asc = SortTracker::new(int_attr("age"), Direction::Asc).unwrap();
        assert_eq!(asc.compare_records(&younger, &older), Ordering::Less);

        let desc = SortTracker::new(int_attr("age"), Direction::Desc).unwrap();
        assert_eq!(desc.compare_records(&younger, &older), Ordering::Greater);
    }
}
