//! Engines used by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use fieldboost::engine::memory::{ColumnData, InMemoryEngine};
use fieldboost::engine::{
    DataEngine, DatasetId, DatasetMeta, DeriveRequest, EngineError, EngineResult, FieldId,
    FieldMeta, FieldSummary, FitRequest, ModelId, Optype, ResourceId, SampleRequest, ScoreRequest,
};

/// Three well separated clusters along `x`, 20 rows each.
pub fn clusters(engine: &InMemoryEngine) -> DatasetId {
    let labels = ["low", "mid", "high"];
    let mut x = Vec::new();
    let mut y = Vec::new();
    let mut species = Vec::new();
    for (class, label) in labels.iter().enumerate() {
        for i in 0..20 {
            x.push(class as f64 * 10.0 + i as f64 * 0.1);
            y.push((i % 5) as f64);
            species.push(label.to_string());
        }
    }
    engine
        .insert_dataset(
            "clusters",
            vec![
                ("x".to_string(), ColumnData::Numeric(x)),
                ("y".to_string(), ColumnData::Numeric(y)),
                ("species".to_string(), ColumnData::Categorical(species)),
            ],
        )
        .unwrap()
}

#[derive(Default)]
struct StubState {
    datasets: HashMap<DatasetId, Vec<FieldMeta>>,
    next_dataset: usize,
    next_field: usize,
    next_model: usize,
    models: Vec<ModelId>,
    renamed: Vec<(ResourceId, String)>,
}

impl StubState {
    fn insert(&mut self, fields: Vec<FieldMeta>) -> DatasetId {
        let id = DatasetId::new(format!("dataset/{}", self.next_dataset));
        self.next_dataset += 1;
        self.datasets.insert(id.clone(), fields);
        id
    }

    fn field(&mut self, name: &str, summary: FieldSummary) -> FieldMeta {
        let id = FieldId::new(format!("{:06x}", self.next_field));
        self.next_field += 1;
        FieldMeta {
            id,
            name: name.to_string(),
            optype: Optype::Numeric,
            preferred: true,
            summary,
        }
    }

    fn fields(&self, op: &'static str, id: &DatasetId) -> EngineResult<Vec<FieldMeta>> {
        self.datasets
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::new(op, id, "no such dataset"))
    }
}

/// A metadata-only engine that reports scripted holdout impurities.
///
/// Gradient fields of iteration `j` summarize to `impurities[j] / K` per
/// class, so the holdout impurity of iteration `j` is `impurities[j]` no
/// matter which rows were sampled. Derivations check that every referenced
/// field exists on the origin and that new names are unique.
pub struct ScriptedEngine {
    classes: Vec<String>,
    impurities: Vec<f64>,
    state: Mutex<StubState>,
}

impl ScriptedEngine {
    /// `improvements[i]` is the holdout gain of iteration `i + 1`.
    pub fn with_improvements(classes: &[&str], improvements: &[f64]) -> Self {
        let mut impurities = vec![100.0];
        for imp in improvements {
            let last = impurities[impurities.len() - 1];
            impurities.push(last - imp);
        }
        ScriptedEngine {
            classes: classes.iter().map(|c| c.to_string()).collect(),
            impurities,
            state: Mutex::new(StubState::default()),
        }
    }

    /// Source dataset with two numeric inputs and the categorical `label`.
    pub fn source(&self) -> DatasetId {
        let mut state = self.state.lock().unwrap();
        let x = state.field("x", FieldSummary::default());
        let y = state.field("y", FieldSummary::default());
        let mut label = state.field(
            "label",
            FieldSummary {
                population: 30,
                categories: self.classes.iter().map(|c| (c.clone(), 10)).collect(),
                ..Default::default()
            },
        );
        label.optype = Optype::Categorical;
        state.insert(vec![x, y, label])
    }

    pub fn fitted_models(&self) -> usize {
        self.state.lock().unwrap().models.len()
    }

    pub fn renamed(&self) -> Vec<(ResourceId, String)> {
        self.state.lock().unwrap().renamed.clone()
    }

    fn summary_for(&self, name: &str) -> FieldSummary {
        let iteration = name
            .strip_prefix("__fb_gradient_")
            .and_then(|rest| rest.split("_iter_").nth(1))
            .and_then(|i| i.parse::<usize>().ok());
        match iteration {
            Some(j) => {
                let impurity = self.impurities[j.min(self.impurities.len() - 1)];
                FieldSummary {
                    sum: 0.0,
                    sum_squares: impurity / self.classes.len() as f64,
                    population: 1,
                    categories: Vec::new(),
                }
            }
            None => FieldSummary::default(),
        }
    }
}

impl DataEngine for ScriptedEngine {
    fn fetch_metadata(&self, dataset: &DatasetId) -> EngineResult<DatasetMeta> {
        let state = self.state.lock().unwrap();
        Ok(DatasetMeta {
            id: dataset.clone(),
            name: dataset.to_string(),
            rows: 30,
            tags: Vec::new(),
            fields: state.fields("fetch_metadata", dataset)?,
        })
    }

    fn derive_dataset(
        &self,
        origin: &DatasetId,
        request: &DeriveRequest,
    ) -> EngineResult<DatasetId> {
        let mut state = self.state.lock().unwrap();
        let fields = state.fields("derive_dataset", origin)?;
        for new_field in &request.new_fields {
            for id in new_field.expr.referenced_fields() {
                if !fields.iter().any(|f| &f.id == id) {
                    return Err(EngineError::new(
                        "derive_dataset",
                        origin,
                        format!("unknown field {}", id),
                    ));
                }
            }
            if fields.iter().any(|f| f.name == new_field.name) {
                return Err(EngineError::new("derive_dataset", origin, "duplicate name"));
            }
        }
        let mut kept: Vec<FieldMeta> = fields
            .into_iter()
            .filter(|f| !request.excluded_fields.contains(&f.id))
            .collect();
        for new_field in &request.new_fields {
            let summary = self.summary_for(&new_field.name);
            kept.push(state.field(&new_field.name, summary));
        }
        Ok(state.insert(kept))
    }

    fn sample_dataset(
        &self,
        origin: &DatasetId,
        _request: &SampleRequest,
    ) -> EngineResult<DatasetId> {
        let mut state = self.state.lock().unwrap();
        let fields = state.fields("sample_dataset", origin)?;
        Ok(state.insert(fields))
    }

    fn fit_tree(&self, request: &FitRequest) -> EngineResult<ModelId> {
        let mut state = self.state.lock().unwrap();
        let fields = state.fields("fit_tree", &request.dataset)?;
        for id in request.inputs.iter().chain(std::iter::once(&request.objective)) {
            if !fields.iter().any(|f| &f.id == id) {
                return Err(EngineError::new(
                    "fit_tree",
                    &request.dataset,
                    format!("unknown field {}", id),
                ));
            }
        }
        let id = ModelId::new(format!("model/{}", state.next_model));
        state.next_model += 1;
        state.models.push(id.clone());
        Ok(id)
    }

    fn score_batch(&self, request: &ScoreRequest) -> EngineResult<DatasetId> {
        let mut state = self.state.lock().unwrap();
        if !state.models.contains(&request.model) {
            return Err(EngineError::new("score_batch", &request.model, "no such model"));
        }
        let mut fields = state.fields("score_batch", &request.dataset)?;
        let prediction = state.field(&request.prediction_name, FieldSummary::default());
        fields.push(prediction);
        Ok(state.insert(fields))
    }

    fn set_resource_name(&self, resource: &ResourceId, name: &str) -> EngineResult<()> {
        let mut state = self.state.lock().unwrap();
        state.renamed.push((resource.clone(), name.to_string()));
        Ok(())
    }
}

/// Passes everything through but fails the `fail_on`-th (1-based) tree fit.
pub struct FailingFits<E> {
    pub inner: E,
    fail_on: usize,
    calls: AtomicUsize,
}

impl<E> FailingFits<E> {
    pub fn new(inner: E, fail_on: usize) -> Self {
        FailingFits {
            inner,
            fail_on,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<E: DataEngine> DataEngine for FailingFits<E> {
    fn fetch_metadata(&self, dataset: &DatasetId) -> EngineResult<DatasetMeta> {
        self.inner.fetch_metadata(dataset)
    }

    fn derive_dataset(
        &self,
        origin: &DatasetId,
        request: &DeriveRequest,
    ) -> EngineResult<DatasetId> {
        self.inner.derive_dataset(origin, request)
    }

    fn sample_dataset(
        &self,
        origin: &DatasetId,
        request: &SampleRequest,
    ) -> EngineResult<DatasetId> {
        self.inner.sample_dataset(origin, request)
    }

    fn fit_tree(&self, request: &FitRequest) -> EngineResult<ModelId> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(EngineError::new("fit_tree", &request.dataset, "injected failure"));
        }
        self.inner.fit_tree(request)
    }

    fn score_batch(&self, request: &ScoreRequest) -> EngineResult<DatasetId> {
        self.inner.score_batch(request)
    }

    fn set_resource_name(&self, resource: &ResourceId, name: &str) -> EngineResult<()> {
        self.inner.set_resource_name(resource, name)
    }
}

/// Records score calls as `(input, output)` pairs and counts derivations.
pub struct Recording<E> {
    pub inner: E,
    scores: Mutex<Vec<(DatasetId, DatasetId)>>,
    derives: AtomicUsize,
}

impl<E> Recording<E> {
    pub fn new(inner: E) -> Self {
        Recording {
            inner,
            scores: Mutex::new(Vec::new()),
            derives: AtomicUsize::new(0),
        }
    }

    pub fn scores(&self) -> Vec<(DatasetId, DatasetId)> {
        self.scores.lock().unwrap().clone()
    }

    pub fn derives(&self) -> usize {
        self.derives.load(Ordering::SeqCst)
    }
}

impl<E: DataEngine> DataEngine for Recording<E> {
    fn fetch_metadata(&self, dataset: &DatasetId) -> EngineResult<DatasetMeta> {
        self.inner.fetch_metadata(dataset)
    }

    fn derive_dataset(
        &self,
        origin: &DatasetId,
        request: &DeriveRequest,
    ) -> EngineResult<DatasetId> {
        self.derives.fetch_add(1, Ordering::SeqCst);
        self.inner.derive_dataset(origin, request)
    }

    fn sample_dataset(
        &self,
        origin: &DatasetId,
        request: &SampleRequest,
    ) -> EngineResult<DatasetId> {
        self.inner.sample_dataset(origin, request)
    }

    fn fit_tree(&self, request: &FitRequest) -> EngineResult<ModelId> {
        self.inner.fit_tree(request)
    }

    fn score_batch(&self, request: &ScoreRequest) -> EngineResult<DatasetId> {
        let output = self.inner.score_batch(request)?;
        self.scores
            .lock()
            .unwrap()
            .push((request.dataset.clone(), output.clone()));
        Ok(output)
    }

    fn set_resource_name(&self, resource: &ResourceId, name: &str) -> EngineResult<()> {
        self.inner.set_resource_name(resource, name)
    }
}
