use std::collections::BTreeMap;
use std::sync::Arc;

use crate::models::ExperimentRef;
use crate::traits::dependent::Dependent;

/// 实验选择器，向助手批量提供待入队的实验
pub trait ExperimentSelector: Send + Sync {
    fn select(&self) -> Vec<ExperimentRef>;
}

impl ExperimentSelector for Vec<ExperimentRef> {
    fn select(&self) -> Vec<ExperimentRef> {
        self.clone()
    }
}

/// 选择一组依赖对象传递依赖的全部实验
pub struct DependencySelector {
    dependents: Vec<Arc<dyn Dependent>>,
}

impl DependencySelector {
    pub fn new(dependents: Vec<Arc<dyn Dependent>>) -> Self {
        Self { dependents }
    }

    pub fn add(&mut self, dependent: Arc<dyn Dependent>) {
        self.dependents.push(dependent);
    }
}

impl ExperimentSelector for DependencySelector {
    fn select(&self) -> Vec<ExperimentRef> {
        let mut by_id = BTreeMap::new();
        for dependent in &self.dependents {
            for experiment in dependent.dependency_experiments() {
                by_id.entry(experiment.id()).or_insert(experiment);
            }
        }
        by_id.into_values().collect()
    }
}
