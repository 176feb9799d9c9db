use serde::{Deserialize, Serialize};

use crate::engine::ModelId;

/// Trees of a boosted run, indexed `[iteration][class]`.
///
/// Scoring convention: sum each class's tree outputs over all iterations and
/// take the softmax across classes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ensemble {
    /// Class labels in class-index order.
    pub classes: Vec<String>,
    pub iterations: Vec<Vec<ModelId>>,
}

impl Ensemble {
    pub fn new(classes: Vec<String>) -> Self {
        Ensemble {
            classes,
            iterations: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.iterations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iterations.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub(crate) fn push(&mut self, models: Vec<ModelId>) {
        debug_assert_eq!(models.len(), self.classes.len());
        self.iterations.push(models);
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelId> {
        self.iterations.iter().flatten()
    }
}
