use crate::{
    model::{Attribute, AttributeKind, Record},
    query::fetch::ResultContainer,
    value::Value,
};
use std::collections::BTreeSet;

///
/// DistinctContainer
///
/// Deduplicating accumulator over a single attribute's values. Decimals are
/// normalized to the attribute's declared scale before insertion so scaled
/// twins collapse to one entry.
///

pub(crate) struct DistinctContainer {
    attribute: Attribute,
    values: BTreeSet<Value>,
}

impl DistinctContainer {
    pub(crate) const fn new(attribute: Attribute) -> Self {
        Self {
            attribute,
            values: BTreeSet::new(),
        }
    }

    /// The deduplicated values in canonical ascending order.
    pub(crate) fn into_values(self) -> Vec<Value> {
        self.values.into_iter().collect()
    }
}

impl ResultContainer for DistinctContainer {
    fn add(&mut self, record: Record) {
        let mut value = record.get(self.attribute.name());
        if let AttributeKind::Decimal { scale, .. } = self.attribute.kind() {
            value = value.rescaled(*scale);
        }
        self.values.insert(value);
    }

    fn len(&self) -> usize {
        self.values.len()
    }
}
