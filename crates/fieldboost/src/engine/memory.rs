//! A local [`DataEngine`] backed by an in-process column store.
//!
//! Expressions are evaluated row-wise, bootstrap samples are drawn with a
//! `StdRng` seeded from the request seed and regression trees are fit with
//! the `gbdt` crate (a single SquaredError round with shrinkage 1.0).
//! Columns are shared between datasets behind `Arc`s, so derivations only
//! copy what they add.
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use gbdt::config::Config;
use gbdt::decision_tree::{Data, DataVec, VALUE_TYPE_UNKNOWN};
use gbdt::gradient_boost::GBDT;
use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::config::TreeParams;
use crate::engine::{
    DataEngine, DatasetId, DatasetMeta, DeriveRequest, EngineError, EngineResult, FieldId,
    FieldMeta, FieldSummary, FitRequest, ModelId, Optype, ResourceId, SampleRequest, ScoreRequest,
};
use crate::expr::Expr;

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Numeric(Vec<f64>),
    Categorical(Vec<String>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Numeric(v) => v.len(),
            ColumnData::Categorical(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn optype(&self) -> Optype {
        match self {
            ColumnData::Numeric(_) => Optype::Numeric,
            ColumnData::Categorical(_) => Optype::Categorical,
        }
    }

    fn summarize(&self) -> FieldSummary {
        match self {
            ColumnData::Numeric(values) => {
                let mut summary = FieldSummary::default();
                for v in values.iter().filter(|v| !v.is_nan()) {
                    summary.sum += v;
                    summary.sum_squares += v * v;
                    summary.population += 1;
                }
                summary
            }
            ColumnData::Categorical(values) => {
                let mut counts: HashMap<&str, u64> = HashMap::new();
                for v in values {
                    *counts.entry(v.as_str()).or_insert(0) += 1;
                }
                let mut categories: Vec<(String, u64)> =
                    counts.into_iter().map(|(k, c)| (k.to_string(), c)).collect();
                categories.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                FieldSummary {
                    sum: 0.0,
                    sum_squares: 0.0,
                    population: values.len() as u64,
                    categories,
                }
            }
        }
    }

    fn gather(&self, rows: &[usize]) -> ColumnData {
        match self {
            ColumnData::Numeric(v) => ColumnData::Numeric(rows.iter().map(|&r| v[r]).collect()),
            ColumnData::Categorical(v) => {
                ColumnData::Categorical(rows.iter().map(|&r| v[r].clone()).collect())
            }
        }
    }

    fn render(&self, row: usize) -> String {
        match self {
            ColumnData::Numeric(v) if v[row].is_nan() => String::new(),
            ColumnData::Numeric(v) => v[row].to_string(),
            ColumnData::Categorical(v) => v[row].clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredField {
    meta: FieldMeta,
    column: Arc<ColumnData>,
}

#[derive(Debug, Clone)]
struct StoredDataset {
    name: String,
    rows: usize,
    tags: Vec<String>,
    fields: Vec<StoredField>,
}

impl StoredDataset {
    fn meta(&self, id: &DatasetId) -> DatasetMeta {
        DatasetMeta {
            id: id.clone(),
            name: self.name.clone(),
            rows: self.rows as u64,
            tags: self.tags.clone(),
            fields: self.fields.iter().map(|f| f.meta.clone()).collect(),
        }
    }

    fn column(&self, id: &FieldId) -> Option<&StoredField> {
        self.fields.iter().find(|f| &f.meta.id == id)
    }

    fn has_name(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.meta.name == name)
    }
}

/// Categorical inputs are fed to the tree as their position in the training
/// histogram; unseen categories map past the end. Missing numbers and
/// mismatched column types become gbdt's unknown-value marker.
#[derive(Debug, Clone)]
enum InputEncoding {
    Numeric,
    Categorical(Vec<String>),
}

impl InputEncoding {
    fn encode(&self, column: &ColumnData, row: usize) -> f32 {
        match (self, column) {
            (InputEncoding::Numeric, ColumnData::Numeric(v)) if v[row].is_nan() => {
                VALUE_TYPE_UNKNOWN
            }
            (InputEncoding::Numeric, ColumnData::Numeric(v)) => v[row] as f32,
            (InputEncoding::Categorical(categories), ColumnData::Categorical(v)) => categories
                .iter()
                .position(|c| c == &v[row])
                .unwrap_or(categories.len()) as f32,
            _ => VALUE_TYPE_UNKNOWN,
        }
    }
}

struct TreeModel {
    inputs: Vec<FieldId>,
    encodings: Vec<InputEncoding>,
    tree: GBDT,
}

#[derive(Default)]
struct Store {
    datasets: HashMap<DatasetId, Arc<StoredDataset>>,
    models: HashMap<ModelId, Arc<TreeModel>>,
    model_names: HashMap<ModelId, String>,
    next_dataset: usize,
    next_model: usize,
    next_field: usize,
}

impl Store {
    fn dataset(&self, operation: &'static str, id: &DatasetId) -> EngineResult<Arc<StoredDataset>> {
        self.datasets
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::new(operation, id, "no such dataset"))
    }

    fn field_id(&mut self) -> FieldId {
        let id = FieldId::new(format!("{:06x}", self.next_field));
        self.next_field += 1;
        id
    }

    fn insert(&mut self, dataset: StoredDataset) -> DatasetId {
        let id = DatasetId::new(format!("dataset/{}", self.next_dataset));
        self.next_dataset += 1;
        debug!(
            "Created {} ({}, {} rows, {} fields)",
            id,
            dataset.name,
            dataset.rows,
            dataset.fields.len()
        );
        self.datasets.insert(id.clone(), Arc::new(dataset));
        id
    }

    fn new_field(&mut self, name: &str, column: ColumnData) -> StoredField {
        StoredField {
            meta: FieldMeta {
                id: self.field_id(),
                name: name.to_string(),
                optype: column.optype(),
                preferred: true,
                summary: column.summarize(),
            },
            column: Arc::new(column),
        }
    }
}

/// In-process engine used by the CLI and in tests.
pub struct InMemoryEngine {
    params: TreeParams,
    store: RwLock<Store>,
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new(TreeParams::default())
    }
}

impl InMemoryEngine {
    pub fn new(params: TreeParams) -> Self {
        InMemoryEngine {
            params,
            store: RwLock::new(Store::default()),
        }
    }

    fn read(&self, operation: &'static str) -> EngineResult<RwLockReadGuard<'_, Store>> {
        self.store
            .read()
            .map_err(|_| EngineError::new(operation, "engine", "store lock poisoned"))
    }

    fn write(&self, operation: &'static str) -> EngineResult<RwLockWriteGuard<'_, Store>> {
        self.store
            .write()
            .map_err(|_| EngineError::new(operation, "engine", "store lock poisoned"))
    }

    /// Register a source dataset. All fields start out preferred.
    pub fn insert_dataset(
        &self,
        name: &str,
        columns: Vec<(String, ColumnData)>,
    ) -> EngineResult<DatasetId> {
        let rows = columns.first().map(|(_, c)| c.len()).unwrap_or(0);
        if let Some((bad, _)) = columns.iter().find(|(_, c)| c.len() != rows) {
            return Err(EngineError::new(
                "insert_dataset",
                name,
                format!("column `{}` does not have {} rows", bad, rows),
            ));
        }
        let mut store = self.write("insert_dataset")?;
        let fields = columns
            .into_iter()
            .map(|(field_name, column)| store.new_field(&field_name, column))
            .collect();
        Ok(store.insert(StoredDataset {
            name: name.to_string(),
            rows,
            tags: Vec::new(),
            fields,
        }))
    }

    /// Flag a field as (non-)preferred, producing a new dataset.
    pub fn set_preferred(
        &self,
        dataset: &DatasetId,
        field: &str,
        preferred: bool,
    ) -> EngineResult<DatasetId> {
        let mut store = self.write("set_preferred")?;
        let mut copy = (*store.dataset("set_preferred", dataset)?).clone();
        let target = copy
            .fields
            .iter_mut()
            .find(|f| f.meta.name == field)
            .ok_or_else(|| {
                EngineError::new("set_preferred", dataset, format!("no field `{}`", field))
            })?;
        target.meta.preferred = preferred;
        Ok(store.insert(copy))
    }

    pub fn column(&self, dataset: &DatasetId, field: &str) -> EngineResult<ColumnData> {
        let store = self.read("column")?;
        let ds = store.dataset("column", dataset)?;
        ds.fields
            .iter()
            .find(|f| f.meta.name == field)
            .map(|f| (*f.column).clone())
            .ok_or_else(|| EngineError::new("column", dataset, format!("no field `{}`", field)))
    }

    pub fn numeric_column(&self, dataset: &DatasetId, field: &str) -> EngineResult<Vec<f64>> {
        match self.column(dataset, field)? {
            ColumnData::Numeric(values) => Ok(values),
            ColumnData::Categorical(_) => Err(EngineError::new(
                "numeric_column",
                dataset,
                format!("field `{}` is categorical", field),
            )),
        }
    }

    pub fn categorical_column(
        &self,
        dataset: &DatasetId,
        field: &str,
    ) -> EngineResult<Vec<String>> {
        match self.column(dataset, field)? {
            ColumnData::Categorical(values) => Ok(values),
            ColumnData::Numeric(_) => Err(EngineError::new(
                "categorical_column",
                dataset,
                format!("field `{}` is numeric", field),
            )),
        }
    }

    /// Header and rendered rows, for writing a dataset out.
    pub fn rows(&self, dataset: &DatasetId) -> EngineResult<(Vec<String>, Vec<Vec<String>>)> {
        let store = self.read("rows")?;
        let ds = store.dataset("rows", dataset)?;
        let header = ds.fields.iter().map(|f| f.meta.name.clone()).collect();
        let rows = (0..ds.rows)
            .map(|r| ds.fields.iter().map(|f| f.column.render(r)).collect())
            .collect();
        Ok((header, rows))
    }

    pub fn model_name(&self, model: &ModelId) -> EngineResult<String> {
        let store = self.read("model_name")?;
        store
            .model_names
            .get(model)
            .cloned()
            .ok_or_else(|| EngineError::new("model_name", model, "no such model"))
    }

    pub fn model_count(&self) -> EngineResult<usize> {
        Ok(self.read("model_count")?.models.len())
    }

    fn fit(&self, ds: &StoredDataset, request: &FitRequest) -> EngineResult<TreeModel> {
        let fail = |message: String| EngineError::new("fit_tree", &request.dataset, message);
        if ds.rows == 0 {
            return Err(fail("cannot fit a tree on an empty dataset".to_string()));
        }
        if request.inputs.is_empty() {
            return Err(fail("no input fields".to_string()));
        }
        let objective = match ds.column(&request.objective).map(|f| f.column.as_ref()) {
            Some(ColumnData::Numeric(values)) => values,
            Some(ColumnData::Categorical(_)) => {
                return Err(fail(format!("objective {} is not numeric", request.objective)))
            }
            None => return Err(fail(format!("no objective field {}", request.objective))),
        };
        if let Some(row) = objective.iter().position(|v| v.is_nan()) {
            return Err(fail(format!(
                "objective {} is missing at row {}",
                request.objective, row
            )));
        }
        let mut inputs = Vec::with_capacity(request.inputs.len());
        let mut encodings = Vec::with_capacity(request.inputs.len());
        for id in &request.inputs {
            let field = ds.column(id).ok_or_else(|| fail(format!("no input field {}", id)))?;
            encodings.push(match field.column.as_ref() {
                ColumnData::Numeric(_) => InputEncoding::Numeric,
                ColumnData::Categorical(_) => InputEncoding::Categorical(
                    field.meta.summary.categories.iter().map(|(c, _)| c.clone()).collect(),
                ),
            });
            inputs.push(field.column.clone());
        }

        let mut config = Config::new();
        config.set_feature_size(inputs.len());
        config.set_shrinkage(1.0);
        config.set_max_depth(self.params.max_depth);
        config.set_iterations(1);
        config.set_debug(self.params.debug);
        config.set_training_optimization_level(self.params.training_optimization_level);
        config.set_loss("SquaredError");

        let mut train_x = DataVec::new();
        for row in 0..ds.rows {
            let features = encodings
                .iter()
                .zip(&inputs)
                .map(|(enc, col)| enc.encode(col, row))
                .collect();
            train_x.push(Data::new_training_data(features, 1.0, objective[row] as f32, None));
        }

        let mut tree = GBDT::new(&config);
        tree.fit(&mut train_x);

        Ok(TreeModel {
            inputs: request.inputs.clone(),
            encodings,
            tree,
        })
    }
}

impl DataEngine for InMemoryEngine {
    fn fetch_metadata(&self, dataset: &DatasetId) -> EngineResult<DatasetMeta> {
        let store = self.read("fetch_metadata")?;
        Ok(store.dataset("fetch_metadata", dataset)?.meta(dataset))
    }

    fn derive_dataset(
        &self,
        origin: &DatasetId,
        request: &DeriveRequest,
    ) -> EngineResult<DatasetId> {
        let ds = self.read("derive_dataset")?.dataset("derive_dataset", origin)?;

        for id in request.input_fields.iter().flatten().chain(&request.excluded_fields) {
            if ds.column(id).is_none() {
                return Err(EngineError::new("derive_dataset", origin, format!("no field {}", id)));
            }
        }

        let kept: Vec<StoredField> = ds
            .fields
            .iter()
            .filter(|f| {
                request
                    .input_fields
                    .as_ref()
                    .map_or(true, |inputs| inputs.contains(&f.meta.id))
            })
            .filter(|f| !request.excluded_fields.contains(&f.meta.id))
            .cloned()
            .collect();

        let mut evaluated = Vec::with_capacity(request.new_fields.len());
        for new_field in &request.new_fields {
            if ds.has_name(&new_field.name) || evaluated.iter().any(|(n, _)| n == &new_field.name) {
                return Err(EngineError::new(
                    "derive_dataset",
                    origin,
                    format!("field `{}` already exists", new_field.name),
                ));
            }
            let column = evaluate_column(&new_field.expr, &ds)
                .map_err(|e| {
                    EngineError::new(
                        "derive_dataset",
                        origin,
                        format!("{}: {}", new_field.name, e),
                    )
                })?;
            evaluated.push((new_field.name.clone(), column));
        }

        let mut store = self.write("derive_dataset")?;
        let mut fields = kept;
        for (name, column) in evaluated {
            fields.push(store.new_field(&name, column));
        }
        Ok(store.insert(StoredDataset {
            name: request.name.clone(),
            rows: ds.rows,
            tags: ds.tags.clone(),
            fields,
        }))
    }

    fn sample_dataset(
        &self,
        origin: &DatasetId,
        request: &SampleRequest,
    ) -> EngineResult<DatasetId> {
        let ds = self.read("sample_dataset")?.dataset("sample_dataset", origin)?;
        if request.rate.is_nan() || request.rate <= 0.0 {
            return Err(EngineError::new("sample_dataset", origin, "sample rate must be positive"));
        }
        if !request.replacement && request.rate > 1.0 {
            return Err(EngineError::new(
                "sample_dataset",
                origin,
                "rates above 1.0 need sampling with replacement",
            ));
        }

        let n = ds.rows;
        let draws = (request.rate * n as f64).round() as usize;
        let mut rng = StdRng::seed_from_u64(seed_value(&request.seed));
        let mut drawn: Vec<usize> = if n == 0 {
            Vec::new()
        } else if request.replacement {
            (0..draws).map(|_| rng.gen_range(0..n)).collect()
        } else {
            let all: Vec<usize> = (0..n).collect();
            all.choose_multiple(&mut rng, draws).copied().collect()
        };
        drawn.sort_unstable();

        let rows = if request.out_of_bag {
            let mut in_bag = vec![false; n];
            for &r in &drawn {
                in_bag[r] = true;
            }
            (0..n).filter(|&r| !in_bag[r]).collect()
        } else {
            drawn
        };

        let fields = ds
            .fields
            .iter()
            .map(|f| {
                let column = f.column.gather(&rows);
                let mut meta = f.meta.clone();
                meta.summary = column.summarize();
                StoredField {
                    meta,
                    column: Arc::new(column),
                }
            })
            .collect();

        let mut store = self.write("sample_dataset")?;
        Ok(store.insert(StoredDataset {
            name: request.name.clone(),
            rows: rows.len(),
            tags: ds.tags.clone(),
            fields,
        }))
    }

    fn fit_tree(&self, request: &FitRequest) -> EngineResult<ModelId> {
        let ds = self.read("fit_tree")?.dataset("fit_tree", &request.dataset)?;
        let model = self.fit(&ds, request)?;

        let mut store = self.write("fit_tree")?;
        let id = ModelId::new(format!("model/{}", store.next_model));
        store.next_model += 1;
        debug!("Fit {} ({}) on {} rows of {}", id, request.name, ds.rows, request.dataset);
        store.models.insert(id.clone(), Arc::new(model));
        store.model_names.insert(id.clone(), request.name.clone());
        Ok(id)
    }

    fn score_batch(&self, request: &ScoreRequest) -> EngineResult<DatasetId> {
        let (ds, model, model_name) = {
            let store = self.read("score_batch")?;
            let ds = store.dataset("score_batch", &request.dataset)?;
            let model = store
                .models
                .get(&request.model)
                .cloned()
                .ok_or_else(|| EngineError::new("score_batch", &request.model, "no such model"))?;
            let model_name = store.model_names.get(&request.model).cloned().unwrap_or_default();
            (ds, model, model_name)
        };
        if ds.has_name(&request.prediction_name) {
            return Err(EngineError::new(
                "score_batch",
                &request.dataset,
                format!("field `{}` already exists", request.prediction_name),
            ));
        }

        let mut inputs = Vec::with_capacity(model.inputs.len());
        for id in &model.inputs {
            let field = ds.column(id).ok_or_else(|| {
                EngineError::new(
                    "score_batch",
                    &request.dataset,
                    format!("missing model input {}", id),
                )
            })?;
            inputs.push(field.column.clone());
        }

        let predictions = if ds.rows == 0 {
            Vec::new()
        } else {
            let mut test_x = DataVec::new();
            for row in 0..ds.rows {
                let features = model
                    .encodings
                    .iter()
                    .zip(&inputs)
                    .map(|(enc, col)| enc.encode(col, row))
                    .collect();
                test_x.push(Data::new_training_data(features, 1.0, 0.0, None));
            }
            model.tree.predict(&test_x).into_iter().map(f64::from).collect()
        };

        let mut store = self.write("score_batch")?;
        let mut fields = if request.all_fields {
            ds.fields.clone()
        } else {
            Vec::new()
        };
        fields.push(store.new_field(&request.prediction_name, ColumnData::Numeric(predictions)));
        Ok(store.insert(StoredDataset {
            name: format!("{} scored by {}", ds.name, model_name),
            rows: ds.rows,
            tags: ds.tags.clone(),
            fields,
        }))
    }

    fn set_resource_name(&self, resource: &ResourceId, name: &str) -> EngineResult<()> {
        let mut store = self.write("set_resource_name")?;
        match resource {
            ResourceId::Dataset(id) => {
                let mut copy = (*store.dataset("set_resource_name", id)?).clone();
                copy.name = name.to_string();
                store.datasets.insert(id.clone(), Arc::new(copy));
            }
            ResourceId::Model(id) => {
                if !store.models.contains_key(id) {
                    return Err(EngineError::new("set_resource_name", id, "no such model"));
                }
                store.model_names.insert(id.clone(), name.to_string());
            }
        }
        Ok(())
    }
}

/// FNV-1a, so a seed string maps to the same RNG stream on every platform.
fn seed_value(seed: &str) -> u64 {
    seed.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Value<'a> {
    Num(f64),
    Text(&'a str),
    Bool(bool),
}

impl<'a> Value<'a> {
    fn num(self) -> Result<f64, String> {
        match self {
            Value::Num(v) => Ok(v),
            Value::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
            Value::Text(t) => Err(format!("expected a number, found \"{}\"", t)),
        }
    }
}

fn evaluate_column(expr: &Expr, ds: &StoredDataset) -> Result<ColumnData, String> {
    let values = (0..ds.rows)
        .map(|row| eval(expr, ds, row))
        .collect::<Result<Vec<_>, _>>()?;
    if !values.is_empty() && values.iter().all(|v| matches!(v, Value::Text(_))) {
        let texts = values
            .into_iter()
            .map(|v| match v {
                Value::Text(t) => t.to_string(),
                _ => String::new(),
            })
            .collect();
        return Ok(ColumnData::Categorical(texts));
    }
    values
        .into_iter()
        .map(Value::num)
        .collect::<Result<Vec<_>, _>>()
        .map(ColumnData::Numeric)
}

fn eval<'a>(expr: &'a Expr, ds: &'a StoredDataset, row: usize) -> Result<Value<'a>, String> {
    Ok(match expr {
        Expr::Field(id) => match ds.column(id).map(|f| f.column.as_ref()) {
            Some(ColumnData::Numeric(v)) => Value::Num(v[row]),
            Some(ColumnData::Categorical(v)) => Value::Text(v[row].as_str()),
            None => return Err(format!("unknown field {}", id)),
        },
        Expr::Number(v) => Value::Num(*v),
        Expr::Text(s) => Value::Text(s.as_str()),
        Expr::Sum(terms) => {
            let mut total = 0.0;
            for term in terms {
                total += eval(term, ds, row)?.num()?;
            }
            Value::Num(total)
        }
        Expr::Sub(a, b) => Value::Num(eval(a, ds, row)?.num()? - eval(b, ds, row)?.num()?),
        Expr::Div(a, b) => Value::Num(eval(a, ds, row)?.num()? / eval(b, ds, row)?.num()?),
        Expr::Exp(a) => Value::Num(eval(a, ds, row)?.num()?.exp()),
        Expr::Eq(a, b) => match (eval(a, ds, row)?, eval(b, ds, row)?) {
            (Value::Text(x), Value::Text(y)) => Value::Bool(x == y),
            (Value::Text(_), _) | (_, Value::Text(_)) => {
                return Err("cannot compare text with a number".to_string())
            }
            (x, y) => Value::Bool(x.num()? == y.num()?),
        },
        Expr::Ge(a, b) => Value::Bool(eval(a, ds, row)?.num()? >= eval(b, ds, row)?.num()?),
        Expr::And(conds) => {
            let mut all = true;
            for cond in conds {
                match eval(cond, ds, row)? {
                    Value::Bool(b) => all &= b,
                    other => return Err(format!("operand of and is not boolean: {:?}", other)),
                }
            }
            Value::Bool(all)
        }
        Expr::If { cond, then, otherwise } => match eval(cond, ds, row)? {
            Value::Bool(true) => eval(then, ds, row)?,
            Value::Bool(false) => eval(otherwise, ds, row)?,
            other => return Err(format!("condition is not boolean: {:?}", other)),
        },
    })
}
