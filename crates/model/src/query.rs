//! Query descriptors: immutable conjunctions of field predicates.
//!
//! A descriptor is built once and never mutated; every builder method consumes
//! the descriptor and returns a new one. Composition (`and`) concatenates
//! predicates, so filtering twice narrows the result like a single conjunction.
//!
//! Drivers that evaluate in-process use [`QueryDescriptor::matches`] and
//! [`QueryDescriptor::order_cmp`] so every backend agrees on comparison rules:
//!
//! - numbers compare numerically (`1 == 1.0`)
//! - strings compare lexicographically, booleans `false < true`
//! - values of different kinds never satisfy an ordering comparison
//! - a missing field reads as `null`

use core::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use stratum_core::ModelError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("filter must be a JSON object, got {0}")]
    NotAnObject(String),

    #[error("unknown comparison operator '{operator}' on field '{field}'")]
    UnknownOperator { field: String, operator: String },

    #[error("'$in' on field '{0}' expects an array")]
    InExpectsArray(String),
}

impl From<QueryError> for ModelError {
    fn from(value: QueryError) -> Self {
        ModelError::InvalidQuery(value.to_string())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    /// Field value is one of the elements of an array.
    In,
}

impl Comparison {
    fn from_operator(operator: &str) -> Option<Self> {
        Some(match operator {
            "$eq" => Self::Eq,
            "$ne" => Self::Ne,
            "$lt" => Self::Lt,
            "$lte" => Self::Lte,
            "$gt" => Self::Gt,
            "$gte" => Self::Gte,
            "$in" => Self::In,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: String,
    pub op: Comparison,
    pub value: Value,
}

impl Predicate {
    pub fn evaluate(&self, document: &Value) -> bool {
        let actual = document.get(&self.field).unwrap_or(&Value::Null);
        let expected = &self.value;

        match self.op {
            Comparison::Eq => json_eq(actual, expected),
            Comparison::Ne => !json_eq(actual, expected),
            Comparison::Lt => compare(actual, expected) == Some(Ordering::Less),
            Comparison::Lte => matches!(
                compare(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Comparison::Gt => compare(actual, expected) == Some(Ordering::Greater),
            Comparison::Gte => matches!(
                compare(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Comparison::In => expected
                .as_array()
                .is_some_and(|values| values.iter().any(|v| json_eq(actual, v))),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub field: String,
    pub direction: Direction,
}

/// Filter + ordering + window over one collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    predicates: Vec<Predicate>,
    order: Vec<Order>,
    limit: Option<usize>,
    offset: Option<usize>,
}

impl QueryDescriptor {
    /// The unfiltered descriptor (matches every record).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn predicate(mut self, field: impl Into<String>, op: Comparison, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.predicate(field, Comparison::Eq, value)
    }

    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.predicate(field, Comparison::Ne, value)
    }

    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.predicate(field, Comparison::Lt, value)
    }

    pub fn lte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.predicate(field, Comparison::Lte, value)
    }

    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.predicate(field, Comparison::Gt, value)
    }

    pub fn gte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.predicate(field, Comparison::Gte, value)
    }

    pub fn is_in(self, field: impl Into<String>, values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.predicate(field, Comparison::In, Value::Array(values))
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order.push(Order {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Conjunction with `other`.
    ///
    /// Predicates and orderings are appended; `other`'s limit and offset win when set.
    pub fn and(mut self, other: QueryDescriptor) -> Self {
        self.predicates.extend(other.predicates);
        self.order.extend(other.order);
        if other.limit.is_some() {
            self.limit = other.limit;
        }
        if other.offset.is_some() {
            self.offset = other.offset;
        }
        self
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn ordering(&self) -> &[Order] {
        &self.order
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<usize> {
        self.offset
    }

    pub fn is_unfiltered(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Whether a stored document satisfies every predicate.
    pub fn matches(&self, document: &Value) -> bool {
        self.predicates.iter().all(|p| p.evaluate(document))
    }

    /// Total order over documents following this descriptor's `order_by` list.
    ///
    /// Equal keys compare `Equal`, so a stable sort keeps driver order for ties.
    pub fn order_cmp(&self, a: &Value, b: &Value) -> Ordering {
        for order in &self.order {
            let left = a.get(&order.field).unwrap_or(&Value::Null);
            let right = b.get(&order.field).unwrap_or(&Value::Null);
            let ord = compare(left, right).unwrap_or_else(|| kind_rank(left).cmp(&kind_rank(right)));
            let ord = match order.direction {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Applies ordering, offset and limit to already-filtered documents.
    pub fn window<I>(&self, documents: I) -> Vec<Value>
    where
        I: IntoIterator<Item = Value>,
    {
        let mut docs: Vec<Value> = documents.into_iter().collect();
        if !self.order.is_empty() {
            docs.sort_by(|a, b| self.order_cmp(a, b));
        }
        let offset = self.offset.unwrap_or(0);
        let limit = self.limit.unwrap_or(usize::MAX);
        docs.into_iter().skip(offset).take(limit).collect()
    }
}

impl<K, V> FromIterator<(K, V)> for QueryDescriptor
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(QueryDescriptor::new(), |q, (field, value)| q.eq(field, value))
    }
}

impl TryFrom<Map<String, Value>> for QueryDescriptor {
    type Error = QueryError;

    /// `{"name": "Ann", "age": {"$gte": 18, "$lt": 65}}`
    ///
    /// A nested object is a comparison descriptor only when every key starts with
    /// `$`; otherwise it is an equality match against the object value.
    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        let mut query = QueryDescriptor::new();

        for (field, value) in map {
            match value {
                Value::Object(ops) if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) => {
                    for (operator, operand) in ops {
                        let op = Comparison::from_operator(&operator).ok_or_else(|| {
                            QueryError::UnknownOperator {
                                field: field.clone(),
                                operator: operator.clone(),
                            }
                        })?;
                        if op == Comparison::In && !operand.is_array() {
                            return Err(QueryError::InExpectsArray(field.clone()));
                        }
                        query = query.predicate(field.clone(), op, operand);
                    }
                }
                other => query = query.eq(field, other),
            }
        }

        Ok(query)
    }
}

impl TryFrom<Value> for QueryDescriptor {
    type Error = QueryError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Self::try_from(map),
            other => Err(QueryError::NotAnObject(other.to_string())),
        }
    }
}

fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Ordering between two values of the same kind; `None` across kinds.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return Some(x.cmp(&y));
            }
            if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                return Some(x.cmp(&y));
            }
            x.as_f64()?.partial_cmp(&y.as_f64()?)
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}
