// src/aggregation.rs
// Aggregation pipeline implementation

use std::cmp::Ordering;

use ahash::RandomState;
use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::document::{get_value_path, remove_path, set_path};
use crate::error::{Result, TinyDocError};
use crate::expression::Expression;
use crate::find_options::{self, sort_order};
use crate::query::Query;

/// Aggregation pipeline
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

/// Pipeline stage
#[derive(Debug, Clone)]
pub enum Stage {
    Match(MatchStage),
    Unwind(UnwindStage),
    Project(ProjectStage),
    Group(GroupStage),
    Sort(SortStage),
    Limit(LimitStage),
    Skip(SkipStage),
    Count(CountStage),
}

/// $match stage - filter documents
#[derive(Debug, Clone)]
pub struct MatchStage {
    query: Query,
}

/// $unwind stage - one output document per array element
#[derive(Debug, Clone)]
pub struct UnwindStage {
    path: String,
    preserve_null_and_empty: bool,
}

/// $project stage - reshape documents
#[derive(Debug, Clone)]
pub struct ProjectStage {
    fields: Vec<(String, ProjectField)>,
}

#[derive(Debug, Clone)]
pub enum ProjectField {
    Include,
    Exclude,
    Computed(Expression),
}

/// $group stage - group documents and compute aggregates
#[derive(Debug, Clone)]
pub struct GroupStage {
    id: Expression,
    accumulators: Vec<(String, Accumulator)>,
}

#[derive(Debug, Clone)]
pub enum Accumulator {
    Sum(Expression),
    Avg(Expression),
    Min(Expression),
    Max(Expression),
    First(Expression),
    Last(Expression),
    Push(Expression),
    Count,
}

/// $sort stage - sort documents
#[derive(Debug, Clone)]
pub struct SortStage {
    fields: Vec<(String, i32)>,
}

/// $limit stage - limit number of documents
#[derive(Debug, Clone)]
pub struct LimitStage {
    limit: usize,
}

/// $skip stage - skip documents
#[derive(Debug, Clone)]
pub struct SkipStage {
    skip: usize,
}

/// $count stage - replace the stream with `{field: n}`
#[derive(Debug, Clone)]
pub struct CountStage {
    field: String,
}

impl Pipeline {
    /// Create pipeline from JSON array. An empty pipeline returns its input.
    pub fn from_json(pipeline_json: &Value) -> Result<Self> {
        if let Value::Array(stages_array) = pipeline_json {
            let stages = stages_array
                .iter()
                .map(Stage::from_json)
                .collect::<Result<Vec<_>>>()?;
            Ok(Pipeline { stages })
        } else {
            Err(TinyDocError::AggregationError("Pipeline must be an array".to_string()))
        }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Execute pipeline on documents
    pub fn execute(&self, mut docs: Vec<Value>) -> Result<Vec<Value>> {
        for stage in &self.stages {
            let before = docs.len();
            docs = stage.execute(docs)?;
            log::trace!("{} stage: {} -> {} documents", stage.name(), before, docs.len());
        }
        Ok(docs)
    }
}

impl Stage {
    /// Parse stage from JSON
    fn from_json(stage_json: &Value) -> Result<Self> {
        let obj = stage_json
            .as_object()
            .ok_or_else(|| TinyDocError::AggregationError("Stage must be an object".to_string()))?;

        // Each stage should have exactly one key
        let (stage_name, stage_spec) = match obj.iter().next() {
            Some(entry) if obj.len() == 1 => entry,
            _ => {
                return Err(TinyDocError::AggregationError(
                    "Each stage must have exactly one operator".to_string(),
                ))
            }
        };

        match stage_name.as_str() {
            "$match" => Ok(Stage::Match(MatchStage::from_json(stage_spec)?)),
            "$unwind" => Ok(Stage::Unwind(UnwindStage::from_json(stage_spec)?)),
            "$project" => Ok(Stage::Project(ProjectStage::from_json(stage_spec)?)),
            "$group" => Ok(Stage::Group(GroupStage::from_json(stage_spec)?)),
            "$sort" => Ok(Stage::Sort(SortStage::from_json(stage_spec)?)),
            "$limit" => Ok(Stage::Limit(LimitStage::from_json(stage_spec)?)),
            "$skip" => Ok(Stage::Skip(SkipStage::from_json(stage_spec)?)),
            "$count" => Ok(Stage::Count(CountStage::from_json(stage_spec)?)),
            _ => Err(TinyDocError::AggregationError(format!(
                "Unknown pipeline stage: {}",
                stage_name
            ))),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Unwind(_) => "$unwind",
            Stage::Project(_) => "$project",
            Stage::Group(_) => "$group",
            Stage::Sort(_) => "$sort",
            Stage::Limit(_) => "$limit",
            Stage::Skip(_) => "$skip",
            Stage::Count(_) => "$count",
        }
    }

    /// Execute this stage
    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        match self {
            Stage::Match(stage) => stage.execute(docs),
            Stage::Unwind(stage) => stage.execute(docs),
            Stage::Project(stage) => stage.execute(docs),
            Stage::Group(stage) => stage.execute(docs),
            Stage::Sort(stage) => stage.execute(docs),
            Stage::Limit(stage) => stage.execute(docs),
            Stage::Skip(stage) => stage.execute(docs),
            Stage::Count(stage) => stage.execute(docs),
        }
    }
}

impl MatchStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let query = Query::from_json(spec)?;
        Ok(MatchStage { query })
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        Ok(docs.into_iter().filter(|doc| self.query.matches_value(doc)).collect())
    }
}

impl UnwindStage {
    /// `"$path"` or `{"path": "$path", "preserveNullAndEmptyArrays": bool}`
    fn from_json(spec: &Value) -> Result<Self> {
        let (path, preserve_null_and_empty) = match spec {
            Value::String(path) => (path.as_str(), false),
            Value::Object(obj) => {
                let path = obj.get("path").and_then(Value::as_str).ok_or_else(|| {
                    TinyDocError::AggregationError("$unwind requires a path".to_string())
                })?;
                let preserve = obj
                    .get("preserveNullAndEmptyArrays")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                (path, preserve)
            }
            _ => {
                return Err(TinyDocError::AggregationError(
                    "$unwind must be a field path or an object".to_string(),
                ))
            }
        };

        let path = path.strip_prefix('$').filter(|p| !p.is_empty()).ok_or_else(|| {
            TinyDocError::AggregationError("$unwind path must start with $".to_string())
        })?;

        Ok(UnwindStage {
            path: path.to_string(),
            preserve_null_and_empty,
        })
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        let mut results = Vec::with_capacity(docs.len());

        for doc in docs {
            match get_value_path(&doc, &self.path) {
                Some(Value::Array(items)) if !items.is_empty() => {
                    let items = items.clone();
                    for item in items {
                        let mut unwound = doc.clone();
                        if let Value::Object(map) = &mut unwound {
                            set_path(map, &self.path, item)?;
                        }
                        results.push(unwound);
                    }
                }
                Some(Value::Array(_)) => {
                    if self.preserve_null_and_empty {
                        let mut kept = doc;
                        if let Value::Object(map) = &mut kept {
                            remove_path(map, &self.path);
                        }
                        results.push(kept);
                    }
                }
                None | Some(Value::Null) => {
                    if self.preserve_null_and_empty {
                        results.push(doc);
                    }
                }
                // A scalar behaves like a one-element array
                Some(_) => results.push(doc),
            }
        }

        Ok(results)
    }
}

impl ProjectStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec
            .as_object()
            .ok_or_else(|| TinyDocError::AggregationError("$project must be an object".to_string()))?;
        if obj.is_empty() {
            return Err(TinyDocError::AggregationError(
                "$project requires at least one field".to_string(),
            ));
        }

        let mut fields = Vec::with_capacity(obj.len());
        for (field, value) in obj {
            let project_field = match value {
                Value::Bool(true) => ProjectField::Include,
                Value::Bool(false) => ProjectField::Exclude,
                Value::Number(n) if n.as_f64() == Some(0.0) => ProjectField::Exclude,
                Value::Number(_) => ProjectField::Include,
                other => ProjectField::Computed(Expression::parse(other)?),
            };
            fields.push((field.clone(), project_field));
        }

        let shapes = fields
            .iter()
            .any(|(_, f)| matches!(f, ProjectField::Include | ProjectField::Computed(_)));
        let excludes_fields = fields
            .iter()
            .any(|(name, f)| matches!(f, ProjectField::Exclude) && name != "_id");
        if shapes && excludes_fields {
            return Err(TinyDocError::AggregationError(
                "$project cannot mix inclusion and exclusion".to_string(),
            ));
        }

        Ok(ProjectStage { fields })
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        docs.iter().map(|doc| self.project_document(doc)).collect()
    }

    fn project_document(&self, doc: &Value) -> Result<Value> {
        let Value::Object(obj) = doc else {
            return Ok(doc.clone());
        };

        let include_mode = self
            .fields
            .iter()
            .any(|(_, f)| matches!(f, ProjectField::Include | ProjectField::Computed(_)));

        if !include_mode {
            let mut result = obj.clone();
            for (field, _) in &self.fields {
                remove_path(&mut result, field);
            }
            return Ok(Value::Object(result));
        }

        let mut result = Map::new();
        let id_excluded = self
            .fields
            .iter()
            .any(|(name, f)| name == "_id" && matches!(f, ProjectField::Exclude));
        let id_listed = self.fields.iter().any(|(name, _)| name == "_id");
        if !id_excluded && !id_listed {
            if let Some(id) = obj.get("_id") {
                result.insert("_id".to_string(), id.clone());
            }
        }

        for (field, action) in &self.fields {
            match action {
                ProjectField::Include => {
                    if let Some(value) = get_value_path(doc, field) {
                        set_path(&mut result, field, value.clone())?;
                    }
                }
                ProjectField::Computed(expr) => {
                    set_path(&mut result, field, expr.evaluate(doc)?)?;
                }
                ProjectField::Exclude => {}
            }
        }

        Ok(Value::Object(result))
    }
}

/// Running state of one accumulator inside one group
#[derive(Debug)]
enum AccumulatorState {
    Sum { int: i64, float: f64, is_float: bool },
    Avg { sum: f64, count: usize },
    Extreme(Option<Value>),
    First(Option<Value>),
    Last(Value),
    Push(Vec<Value>),
    Count(i64),
}

impl GroupStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec
            .as_object()
            .ok_or_else(|| TinyDocError::AggregationError("$group must be an object".to_string()))?;

        let id_spec = obj.get("_id").ok_or_else(|| {
            TinyDocError::AggregationError("Group stage must have _id field".to_string())
        })?;
        let id = Expression::parse(id_spec)?;

        let mut accumulators = Vec::new();
        for (field, value) in obj {
            if field == "_id" {
                continue;
            }
            accumulators.push((field.clone(), Accumulator::from_json(value)?));
        }

        Ok(GroupStage { id, accumulators })
    }

    /// Groups are emitted in the order their key was first seen
    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        let mut groups: IndexMap<String, (Value, Vec<AccumulatorState>), RandomState> =
            IndexMap::with_hasher(RandomState::new());

        for doc in &docs {
            let key_value = self.id.evaluate(doc)?;
            let key = serde_json::to_string(&canonical_key(&key_value))?;

            let (_, states) = groups.entry(key).or_insert_with(|| {
                let states = self.accumulators.iter().map(|(_, acc)| acc.initial_state()).collect();
                (key_value, states)
            });

            for ((_, accumulator), state) in self.accumulators.iter().zip(states.iter_mut()) {
                accumulator.accumulate(state, doc)?;
            }
        }

        let mut results = Vec::with_capacity(groups.len());
        for (_, (key_value, states)) in groups {
            let mut result = Map::new();
            result.insert("_id".to_string(), key_value);
            for ((field, _), state) in self.accumulators.iter().zip(states) {
                result.insert(field.clone(), state.finish());
            }
            results.push(Value::Object(result));
        }

        Ok(results)
    }
}

impl Accumulator {
    fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec.as_object().ok_or_else(|| {
            TinyDocError::AggregationError("Accumulator must be an object".to_string())
        })?;

        let (op, value) = match obj.iter().next() {
            Some(entry) if obj.len() == 1 => entry,
            _ => {
                return Err(TinyDocError::AggregationError(
                    "Accumulator must have exactly one operator".to_string(),
                ))
            }
        };

        match op.as_str() {
            "$sum" => Ok(Accumulator::Sum(Expression::parse(value)?)),
            "$avg" => Ok(Accumulator::Avg(Expression::parse(value)?)),
            "$min" => Ok(Accumulator::Min(Expression::parse(value)?)),
            "$max" => Ok(Accumulator::Max(Expression::parse(value)?)),
            "$first" => Ok(Accumulator::First(Expression::parse(value)?)),
            "$last" => Ok(Accumulator::Last(Expression::parse(value)?)),
            "$push" => Ok(Accumulator::Push(Expression::parse(value)?)),
            "$count" => Ok(Accumulator::Count),
            _ => Err(TinyDocError::AggregationError(format!("Unknown accumulator: {}", op))),
        }
    }

    fn initial_state(&self) -> AccumulatorState {
        match self {
            Accumulator::Sum(_) => AccumulatorState::Sum { int: 0, float: 0.0, is_float: false },
            Accumulator::Avg(_) => AccumulatorState::Avg { sum: 0.0, count: 0 },
            Accumulator::Min(_) | Accumulator::Max(_) => AccumulatorState::Extreme(None),
            Accumulator::First(_) => AccumulatorState::First(None),
            Accumulator::Last(_) => AccumulatorState::Last(Value::Null),
            Accumulator::Push(_) => AccumulatorState::Push(Vec::new()),
            Accumulator::Count => AccumulatorState::Count(0),
        }
    }

    fn accumulate(&self, state: &mut AccumulatorState, doc: &Value) -> Result<()> {
        match (self, state) {
            (Accumulator::Sum(expr), AccumulatorState::Sum { int, float, is_float }) => {
                // Non-numeric values are ignored
                let value = expr.evaluate(doc)?;
                if let Some(n) = value.as_i64() {
                    match int.checked_add(n) {
                        Some(sum) if !*is_float => *int = sum,
                        _ => {
                            *float += n as f64;
                            *is_float = true;
                        }
                    }
                } else if let Some(f) = value.as_f64() {
                    *float += f;
                    *is_float = true;
                }
            }
            (Accumulator::Avg(expr), AccumulatorState::Avg { sum, count }) => {
                if let Some(n) = expr.evaluate(doc)?.as_f64() {
                    *sum += n;
                    *count += 1;
                }
            }
            (Accumulator::Min(expr), AccumulatorState::Extreme(current)) => {
                keep_extreme(current, expr.evaluate(doc)?, Ordering::Less);
            }
            (Accumulator::Max(expr), AccumulatorState::Extreme(current)) => {
                keep_extreme(current, expr.evaluate(doc)?, Ordering::Greater);
            }
            (Accumulator::First(expr), AccumulatorState::First(first)) => {
                if first.is_none() {
                    *first = Some(expr.evaluate(doc)?);
                }
            }
            (Accumulator::Last(expr), AccumulatorState::Last(last)) => {
                *last = expr.evaluate(doc)?;
            }
            (Accumulator::Push(expr), AccumulatorState::Push(items)) => {
                items.push(expr.evaluate(doc)?);
            }
            (Accumulator::Count, AccumulatorState::Count(n)) => *n += 1,
            _ => {
                return Err(TinyDocError::AggregationError(
                    "accumulator state does not match its operator".to_string(),
                ))
            }
        }
        Ok(())
    }
}

/// Group identity: integral floats collapse to integers so `5` and `5.0`
/// share a group, as they compare equal in filters and index keys
fn canonical_key(value: &Value) -> Value {
    match value {
        Value::Number(n) if n.as_i64().is_none() && n.as_u64().is_none() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Value::from(f as i64),
            _ => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(canonical_key).collect()),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), canonical_key(v))).collect()),
        _ => value.clone(),
    }
}

fn keep_extreme(current: &mut Option<Value>, candidate: Value, wanted: Ordering) {
    if candidate.is_null() {
        return;
    }
    let replace = match current.as_ref() {
        None => true,
        Some(existing) => sort_order(Some(&candidate), Some(existing)) == wanted,
    };
    if replace {
        *current = Some(candidate);
    }
}

impl AccumulatorState {
    fn finish(self) -> Value {
        match self {
            AccumulatorState::Sum { int, float, is_float } => {
                if is_float {
                    Value::from(float + int as f64)
                } else {
                    Value::from(int)
                }
            }
            AccumulatorState::Avg { sum, count } => {
                if count > 0 {
                    Value::from(sum / count as f64)
                } else {
                    Value::Null
                }
            }
            AccumulatorState::Extreme(value) | AccumulatorState::First(value) => value.unwrap_or(Value::Null),
            AccumulatorState::Last(value) => value,
            AccumulatorState::Push(items) => Value::Array(items),
            AccumulatorState::Count(n) => Value::from(n),
        }
    }
}

impl SortStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let fields = find_options::parse_sort(spec)
            .map_err(|e| TinyDocError::AggregationError(format!("$sort: {}", e)))?;
        if fields.is_empty() {
            return Err(TinyDocError::AggregationError(
                "$sort requires at least one field".to_string(),
            ));
        }
        Ok(SortStage { fields })
    }

    fn execute(&self, mut docs: Vec<Value>) -> Result<Vec<Value>> {
        find_options::apply_sort(&mut docs, &self.fields);
        Ok(docs)
    }
}

impl LimitStage {
    fn from_json(spec: &Value) -> Result<Self> {
        match spec.as_u64() {
            Some(n) if n > 0 => Ok(LimitStage { limit: n as usize }),
            _ => Err(TinyDocError::AggregationError("$limit must be a positive number".to_string())),
        }
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        Ok(docs.into_iter().take(self.limit).collect())
    }
}

impl SkipStage {
    fn from_json(spec: &Value) -> Result<Self> {
        if let Some(n) = spec.as_u64() {
            Ok(SkipStage { skip: n as usize })
        } else {
            Err(TinyDocError::AggregationError("$skip must be a non-negative number".to_string()))
        }
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        Ok(docs.into_iter().skip(self.skip).collect())
    }
}

impl CountStage {
    fn from_json(spec: &Value) -> Result<Self> {
        match spec.as_str() {
            Some(field) if !field.is_empty() && !field.starts_with('$') && !field.contains('.') => {
                Ok(CountStage { field: field.to_string() })
            }
            _ => Err(TinyDocError::AggregationError(
                "$count must be a non-empty field name".to_string(),
            )),
        }
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let mut result = Map::new();
        result.insert(self.field.clone(), Value::from(docs.len() as i64));
        Ok(vec![Value::Object(result)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::date_value;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn run(pipeline: Value, docs: Vec<Value>) -> Vec<Value> {
        Pipeline::from_json(&pipeline).unwrap().execute(docs).unwrap()
    }

    fn ventas() -> Vec<Value> {
        let fecha = |m| date_value(Utc.with_ymd_and_hms(2024, m, 10, 0, 0, 0).unwrap());
        vec![
            json!({"_id": 1, "fecha": fecha(1), "total": 12000,
                   "productos": [{"productoId": 1, "cantidad": 2}, {"productoId": 3, "cantidad": 1}]}),
            json!({"_id": 2, "fecha": fecha(2), "total": 8000,
                   "productos": [{"productoId": 1, "cantidad": 1}]}),
            json!({"_id": 3, "fecha": fecha(1), "total": 5000,
                   "productos": [{"productoId": 2, "cantidad": 4}]}),
        ]
    }

    #[test]
    fn test_match_stage() {
        let docs = vec![
            json!({"nombre": "Ana", "edad": 25}),
            json!({"nombre": "Luis", "edad": 30}),
            json!({"nombre": "Sofía", "edad": 35}),
        ];

        let results = run(json!([{"$match": {"edad": {"$gte": 30}}}]), docs);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["nombre"], "Luis");
        assert_eq!(results[1]["nombre"], "Sofía");
    }

    #[test]
    fn test_unwind_stage() {
        let results = run(json!([{"$unwind": "$productos"}]), ventas());

        assert_eq!(results.len(), 4);
        assert_eq!(results[0]["productos"], json!({"productoId": 1, "cantidad": 2}));
        assert_eq!(results[1]["productos"], json!({"productoId": 3, "cantidad": 1}));
        assert_eq!(results[1]["_id"], 1);
    }

    #[test]
    fn test_unwind_drops_empty_unless_preserved() {
        let docs = vec![
            json!({"_id": 1, "tags": []}),
            json!({"_id": 2}),
            json!({"_id": 3, "tags": ["a"]}),
        ];

        let dropped = run(json!([{"$unwind": "$tags"}]), docs.clone());
        assert_eq!(dropped, vec![json!({"_id": 3, "tags": "a"})]);

        let kept = run(
            json!([{"$unwind": {"path": "$tags", "preserveNullAndEmptyArrays": true}}]),
            docs,
        );
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0], json!({"_id": 1}));
    }

    #[test]
    fn test_group_sum_by_product() {
        let results = run(
            json!([
                {"$unwind": "$productos"},
                {"$group": {"_id": "$productos.productoId", "totalVendido": {"$sum": "$productos.cantidad"}}}
            ]),
            ventas(),
        );

        // First-seen order
        assert_eq!(
            results,
            vec![
                json!({"_id": 1, "totalVendido": 3}),
                json!({"_id": 3, "totalVendido": 1}),
                json!({"_id": 2, "totalVendido": 4}),
            ]
        );
    }

    #[test]
    fn test_group_by_month_expression() {
        let results = run(
            json!([
                {"$group": {"_id": {"mes": {"$month": "$fecha"}}, "ingresos": {"$sum": "$total"}, "ventas": {"$sum": 1}}},
                {"$sort": {"_id.mes": 1}}
            ]),
            ventas(),
        );

        assert_eq!(
            results,
            vec![
                json!({"_id": {"mes": 1}, "ingresos": 17000, "ventas": 2}),
                json!({"_id": {"mes": 2}, "ingresos": 8000, "ventas": 1}),
            ]
        );
    }

    #[test]
    fn test_group_accumulators() {
        let docs = vec![
            json!({"c": "x", "v": 4}),
            json!({"c": "x", "v": 1.5}),
            json!({"c": "x", "v": "no numérico"}),
            json!({"c": "y", "v": 10}),
        ];

        let results = run(
            json!([{"$group": {
                "_id": "$c",
                "suma": {"$sum": "$v"},
                "promedio": {"$avg": "$v"},
                "minimo": {"$min": "$v"},
                "maximo": {"$max": "$v"},
                "primero": {"$first": "$v"},
                "ultimo": {"$last": "$v"},
                "todos": {"$push": "$v"},
                "n": {"$count": {}}
            }}]),
            docs,
        );

        assert_eq!(results.len(), 2);
        let x = &results[0];
        assert_eq!(x["suma"], json!(5.5));
        assert_eq!(x["promedio"], json!(2.75));
        assert_eq!(x["minimo"], json!(1.5));
        assert_eq!(x["maximo"], json!("no numérico"));
        assert_eq!(x["primero"], json!(4));
        assert_eq!(x["ultimo"], json!("no numérico"));
        assert_eq!(x["todos"], json!([4, 1.5, "no numérico"]));
        assert_eq!(x["n"], json!(3));
        assert_eq!(results[1]["suma"], json!(10));
    }

    #[test]
    fn test_group_null_id_single_group() {
        let results = run(
            json!([{"$group": {"_id": null, "total": {"$sum": "$total"}, "promedio": {"$avg": "$total"}}}]),
            ventas(),
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["_id"], Value::Null);
        assert_eq!(results[0]["total"], json!(25000));
    }

    #[test]
    fn test_group_numeric_keys_compare_by_value() {
        let docs = vec![
            json!({"k": 5, "v": 1}),
            json!({"k": 5.0, "v": 2}),
            json!({"k": {"n": 2.0}, "v": 3}),
            json!({"k": {"n": 2}, "v": 4}),
            json!({"k": 5.5, "v": 5}),
        ];
        let results = run(json!([{"$group": {"_id": "$k", "n": {"$sum": 1}, "v": {"$sum": "$v"}}}]), docs);

        assert_eq!(
            results,
            vec![
                json!({"_id": 5, "n": 2, "v": 3}),
                json!({"_id": {"n": 2.0}, "n": 2, "v": 7}),
                json!({"_id": 5.5, "n": 1, "v": 5}),
            ]
        );
    }

    #[test]
    fn test_project_computed_size() {
        let docs = vec![json!({"_id": 7, "nombre": "Ana", "compras": [1, 2, 3]})];

        let results = run(
            json!([{"$project": {"nombre": 1, "numCompras": {"$size": "$compras"}, "_id": 0}}]),
            docs,
        );

        assert_eq!(results, vec![json!({"nombre": "Ana", "numCompras": 3})]);
    }

    #[test]
    fn test_project_exclusion_mode() {
        let docs = vec![json!({"_id": 1, "a": 1, "b": 2})];
        assert_eq!(run(json!([{"$project": {"b": 0}}]), docs), vec![json!({"_id": 1, "a": 1})]);
        assert!(Pipeline::from_json(&json!([{"$project": {"a": 1, "b": 0}}])).is_err());
    }

    #[test]
    fn test_sort_limit_is_stable() {
        let docs = vec![
            json!({"n": "a", "precio": 5000}),
            json!({"n": "b", "precio": 9000}),
            json!({"n": "c", "precio": 5000}),
            json!({"n": "d", "precio": 5000}),
        ];

        let results = run(json!([{"$sort": {"precio": -1}}, {"$limit": 3}]), docs);

        let names: Vec<_> = results.iter().map(|d| d["n"].clone()).collect();
        assert_eq!(names, vec![json!("b"), json!("a"), json!("c")]);
    }

    #[test]
    fn test_skip_and_count() {
        let docs: Vec<Value> = (1..=5).map(|n| json!({"n": n})).collect();

        let results = run(json!([{"$skip": 2}, {"$count": "restantes"}]), docs);
        assert_eq!(results, vec![json!({"restantes": 3})]);

        assert!(run(json!([{"$count": "nada"}]), Vec::new()).is_empty());
    }

    #[test]
    fn test_empty_pipeline_is_identity() {
        let docs = vec![json!({"a": 1})];
        assert_eq!(run(json!([]), docs.clone()), docs);
    }

    #[test]
    fn test_invalid_stages() {
        assert!(Pipeline::from_json(&json!({"$match": {}})).is_err());
        assert!(Pipeline::from_json(&json!([{"$lookup": {}}])).is_err());
        assert!(Pipeline::from_json(&json!([{"$match": {}, "$limit": 1}])).is_err());
        assert!(Pipeline::from_json(&json!([{"$limit": 0}])).is_err());
        assert!(Pipeline::from_json(&json!([{"$group": {"total": {"$sum": 1}}}])).is_err());
        assert!(Pipeline::from_json(&json!([{"$group": {"_id": null, "x": {"$median": "$v"}}}])).is_err());
        assert!(Pipeline::from_json(&json!([{"$unwind": "productos"}])).is_err());
    }
}
