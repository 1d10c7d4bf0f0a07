use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::model::{DocumentKey, FieldPath, IntoFieldPath, ResourcePath};
use crate::firestore::value::{FirestoreValue, ValueKind};

use super::reference::CollectionReference;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FilterOperator {
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessThanOrEqual,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = "array-contains")]
    ArrayContains,
    #[serde(rename = "array-contains-any")]
    ArrayContainsAny,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not-in")]
    NotIn,
}

impl FilterOperator {
    fn requires_array_operand(self) -> bool {
        matches!(
            self,
            FilterOperator::ArrayContainsAny | FilterOperator::In | FilterOperator::NotIn
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum OrderDirection {
    #[default]
    #[serde(rename = "asc")]
    Ascending,
    #[serde(rename = "desc")]
    Descending,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LimitType {
    #[default]
    First,
    Last,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FieldFilter {
    field: FieldPath,
    op: FilterOperator,
    value: FirestoreValue,
}

impl FieldFilter {
    pub fn new(field: FieldPath, op: FilterOperator, value: FirestoreValue) -> Self {
        Self { field, op, value }
    }

    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn operator(&self) -> FilterOperator {
        self.op
    }

    pub fn value(&self) -> &FirestoreValue {
        &self.value
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OrderBy {
    field: FieldPath,
    direction: OrderDirection,
}

impl OrderBy {
    pub fn new(field: FieldPath, direction: OrderDirection) -> Self {
        Self { field, direction }
    }

    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn direction(&self) -> OrderDirection {
        self.direction
    }
}

/// A cursor position expressed as values for the query's order-by fields.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Bound {
    values: Vec<FirestoreValue>,
    inclusive: bool,
}

impl Bound {
    pub fn new(values: Vec<FirestoreValue>, inclusive: bool) -> Self {
        Self { values, inclusive }
    }

    pub fn values(&self) -> &[FirestoreValue] {
        &self.values
    }

    pub fn inclusive(&self) -> bool {
        self.inclusive
    }
}

/// One step of a query builder chain.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryConstraint {
    Where {
        field: FieldPath,
        op: FilterOperator,
        value: FirestoreValue,
    },
    OrderBy {
        field: FieldPath,
        direction: OrderDirection,
    },
    Limit(u32),
    LimitToLast(u32),
    StartAt(Vec<FirestoreValue>),
    StartAfter(Vec<FirestoreValue>),
    EndAt(Vec<FirestoreValue>),
    EndBefore(Vec<FirestoreValue>),
}

impl QueryConstraint {
    pub fn where_field(
        field: impl IntoFieldPath,
        op: FilterOperator,
        value: impl Into<FirestoreValue>,
    ) -> FirestoreResult<Self> {
        Ok(QueryConstraint::Where {
            field: field.into_field_path()?,
            op,
            value: value.into(),
        })
    }

    pub fn order_by(field: impl IntoFieldPath, direction: OrderDirection) -> FirestoreResult<Self> {
        Ok(QueryConstraint::OrderBy {
            field: field.into_field_path()?,
            direction,
        })
    }
}

/// Internal constraint list of a query. This is what the cache key is derived from.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDefinition {
    collection_path: ResourcePath,
    filters: Vec<FieldFilter>,
    order_by: Vec<OrderBy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u32>,
    limit_type: LimitType,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_at: Option<Bound>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_at: Option<Bound>,
}

impl QueryDefinition {
    fn new(collection_path: ResourcePath) -> Self {
        Self {
            collection_path,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            limit_type: LimitType::First,
            start_at: None,
            end_at: None,
        }
    }

    pub fn collection_path(&self) -> &ResourcePath {
        &self.collection_path
    }

    pub fn filters(&self) -> &[FieldFilter] {
        &self.filters
    }

    pub fn explicit_order_by(&self) -> &[OrderBy] {
        &self.order_by
    }

    /// Explicit orderings followed by the implicit document-name tie breaker.
    pub fn result_order_by(&self) -> Vec<OrderBy> {
        let mut order = self.order_by.clone();
        let name = FieldPath::document_id();
        if !order.iter().any(|entry| entry.field == name) {
            let direction = order
                .last()
                .map(OrderBy::direction)
                .unwrap_or(OrderDirection::Ascending);
            order.push(OrderBy::new(name, direction));
        }
        order
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    pub fn limit_type(&self) -> LimitType {
        self.limit_type
    }

    pub fn start_at(&self) -> Option<&Bound> {
        self.start_at.as_ref()
    }

    pub fn end_at(&self) -> Option<&Bound> {
        self.end_at.as_ref()
    }

    /// Whether a document lives directly inside the queried collection.
    pub fn matches_collection(&self, key: &DocumentKey) -> bool {
        key.collection_path() == self.collection_path
    }
}

/// A filter/sort/pagination request over one collection.
///
/// Queries are immutable values; every builder method returns a new query with one
/// more constraint appended.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    collection: CollectionReference,
    definition: QueryDefinition,
}

impl Query {
    pub(crate) fn from_collection(collection: CollectionReference) -> Self {
        let definition = QueryDefinition::new(collection.path().clone());
        Self {
            collection,
            definition,
        }
    }

    pub fn collection(&self) -> &CollectionReference {
        &self.collection
    }

    pub fn collection_path(&self) -> &ResourcePath {
        self.collection.path()
    }

    pub fn definition(&self) -> &QueryDefinition {
        &self.definition
    }

    pub fn with_constraint(&self, constraint: QueryConstraint) -> FirestoreResult<Query> {
        let mut next = self.clone();
        let definition = &mut next.definition;
        match constraint {
            QueryConstraint::Where { field, op, value } => {
                if op.requires_array_operand() && !matches!(value.kind(), ValueKind::Array(_)) {
                    return Err(invalid_argument(format!(
                        "Filter on '{}' requires an array operand",
                        field.canonical_string()
                    )));
                }
                definition.filters.push(FieldFilter::new(field, op, value));
            }
            QueryConstraint::OrderBy { field, direction } => {
                if definition.start_at.is_some() || definition.end_at.is_some() {
                    return Err(invalid_argument(
                        "order_by must be applied before any cursor constraint",
                    ));
                }
                definition.order_by.push(OrderBy::new(field, direction));
            }
            QueryConstraint::Limit(limit) => {
                definition.limit = Some(validate_limit(limit)?);
                definition.limit_type = LimitType::First;
            }
            QueryConstraint::LimitToLast(limit) => {
                definition.limit = Some(validate_limit(limit)?);
                definition.limit_type = LimitType::Last;
            }
            QueryConstraint::StartAt(values) => {
                definition.start_at = Some(cursor(definition, values, true)?);
            }
            QueryConstraint::StartAfter(values) => {
                definition.start_at = Some(cursor(definition, values, false)?);
            }
            QueryConstraint::EndAt(values) => {
                definition.end_at = Some(cursor(definition, values, true)?);
            }
            QueryConstraint::EndBefore(values) => {
                definition.end_at = Some(cursor(definition, values, false)?);
            }
        }
        Ok(next)
    }

    pub fn where_field(
        &self,
        field: impl IntoFieldPath,
        op: FilterOperator,
        value: impl Into<FirestoreValue>,
    ) -> FirestoreResult<Query> {
        self.with_constraint(QueryConstraint::where_field(field, op, value)?)
    }

    pub fn order_by(
        &self,
        field: impl IntoFieldPath,
        direction: OrderDirection,
    ) -> FirestoreResult<Query> {
        self.with_constraint(QueryConstraint::order_by(field, direction)?)
    }

    pub fn limit(&self, limit: u32) -> FirestoreResult<Query> {
        self.with_constraint(QueryConstraint::Limit(limit))
    }

    pub fn limit_to_last(&self, limit: u32) -> FirestoreResult<Query> {
        self.with_constraint(QueryConstraint::LimitToLast(limit))
    }

    pub fn start_at(&self, values: Vec<FirestoreValue>) -> FirestoreResult<Query> {
        self.with_constraint(QueryConstraint::StartAt(values))
    }

    pub fn start_after(&self, values: Vec<FirestoreValue>) -> FirestoreResult<Query> {
        self.with_constraint(QueryConstraint::StartAfter(values))
    }

    pub fn end_at(&self, values: Vec<FirestoreValue>) -> FirestoreResult<Query> {
        self.with_constraint(QueryConstraint::EndAt(values))
    }

    pub fn end_before(&self, values: Vec<FirestoreValue>) -> FirestoreResult<Query> {
        self.with_constraint(QueryConstraint::EndBefore(values))
    }
}

// The constraint list is exposed under "query" so the store cache can key on it.
impl Serialize for Query {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Query", 1)?;
        state.serialize_field("query", &self.definition)?;
        state.end()
    }
}

fn validate_limit(limit: u32) -> FirestoreResult<u32> {
    if limit == 0 {
        return Err(invalid_argument("Query limit must be greater than zero"));
    }
    Ok(limit)
}

fn cursor(
    definition: &QueryDefinition,
    values: Vec<FirestoreValue>,
    inclusive: bool,
) -> FirestoreResult<Bound> {
    if values.is_empty() {
        return Err(invalid_argument("Cursor constraints require at least one value"));
    }
    if values.len() > definition.result_order_by().len() {
        return Err(invalid_argument(
            "Too many cursor values for the query's order_by clauses",
        ));
    }
    Ok(Bound::new(values, inclusive))
}
