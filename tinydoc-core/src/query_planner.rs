// src/query_planner.rs
// Query planner - index selection for explain()

use serde_json::{json, Map, Value};

use crate::index::{Index, IndexKey, IndexManager};
use crate::query::{Query, QueryOperator};

/// Query plan - describes how a query would be executed
#[derive(Debug, Clone, PartialEq)]
pub enum QueryPlan {
    /// Full collection scan (no index used)
    CollectionScan,

    /// Index scan over the longest usable key prefix
    IndexScan {
        index_name: String,
        /// Leading index fields constrained by the filter
        fields: Vec<String>,
        /// Equality keys for the leading fields, when every used field is
        /// an equality match
        equality_prefix: Option<Vec<IndexKey>>,
    },
}

impl QueryPlan {
    pub fn index_name(&self) -> Option<&str> {
        match self {
            QueryPlan::CollectionScan => None,
            QueryPlan::IndexScan { index_name, .. } => Some(index_name),
        }
    }
}

/// Query planner - picks the index whose key order is matched by the
/// longest prefix of constrained fields
pub struct QueryPlanner;

impl QueryPlanner {
    pub fn plan(query: &Query, indexes: &IndexManager) -> QueryPlan {
        let constrained = query.indexable_fields();
        if constrained.is_empty() {
            return QueryPlan::CollectionScan;
        }

        let mut best: Option<(&Index, usize)> = None;
        for index in indexes.iter() {
            let usable = index
                .definition
                .fields()
                .take_while(|field| constrained.iter().any(|(f, _)| f == field))
                .count();
            if usable > 0 && best.map_or(true, |(_, n)| usable > n) {
                best = Some((index, usable));
            }
        }

        let Some((index, usable)) = best else {
            return QueryPlan::CollectionScan;
        };

        let fields: Vec<String> = index.definition.fields().take(usable).map(str::to_string).collect();
        let equality_prefix = fields
            .iter()
            .map(|field| {
                constrained.iter().find_map(|(f, op)| match op {
                    QueryOperator::Eq(value) if *f == field.as_str() && !value.is_array() => Some(IndexKey::from(value)),
                    _ => None,
                })
            })
            .collect::<Option<Vec<IndexKey>>>();

        QueryPlan::IndexScan {
            index_name: index.definition.name.clone(),
            fields,
            equality_prefix,
        }
    }

    /// Conditions of `query` answered by the plan's index
    pub fn index_bounds(query: &Query, plan: &QueryPlan) -> Query {
        match plan {
            QueryPlan::CollectionScan => Query::new(),
            QueryPlan::IndexScan { fields, .. } => Query {
                conditions: query
                    .conditions
                    .iter()
                    .filter(|(field, _)| fields.contains(field))
                    .cloned()
                    .collect(),
            },
        }
    }

    /// Explain document for a plan
    pub fn explain(
        namespace: &str,
        filter: &Value,
        plan: &QueryPlan,
        indexes: &IndexManager,
        keys_examined: usize,
        docs_examined: usize,
        returned: usize,
    ) -> Value {
        let (query_plan, stage, key_pattern) = match plan {
            QueryPlan::CollectionScan => ("CollectionScan", "COLLSCAN", Value::Null),
            QueryPlan::IndexScan { index_name, equality_prefix, .. } => {
                let pattern = indexes
                    .get(index_name)
                    .map(|i| {
                        let mut key = Map::new();
                        for (field, direction) in &i.definition.keys {
                            key.insert(field.clone(), json!(direction));
                        }
                        Value::Object(key)
                    })
                    .unwrap_or(Value::Null);
                let kind = if equality_prefix.is_some() { "IndexScan" } else { "IndexRangeScan" };
                (kind, "IXSCAN", pattern)
            }
        };

        json!({
            "queryPlan": query_plan,
            "namespace": namespace,
            "parsedQuery": filter,
            "stage": stage,
            "indexUsed": plan.index_name(),
            "keyPattern": key_pattern,
            "availableIndexes": indexes.list_indexes(),
            "executionStats": {
                "nReturned": returned,
                "totalKeysExamined": keys_examined,
                "totalDocsExamined": docs_examined,
            },
        })
    }
}
