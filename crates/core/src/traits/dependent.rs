use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::models::ExperimentRef;

/// 依赖项：实验本身，或另一个依赖于实验的对象
#[derive(Clone)]
pub enum Dependency {
    Experiment(ExperimentRef),
    Dependent(Arc<dyn Dependent>),
}

/// 声明自己依赖哪些实验的外部对象（例如图表、表格）
///
/// 均衡调度策略以它们为"覆盖"的对象。
pub trait Dependent: Send + Sync {
    fn name(&self) -> String;

    /// 直接依赖项
    fn dependencies(&self) -> Vec<Dependency>;

    /// 传递闭包中的全部实验，按 id 去重并排序
    fn dependency_experiments(&self) -> Vec<ExperimentRef> {
        let mut visited: HashSet<*const ()> = HashSet::new();
        let mut seen_ids = HashSet::new();
        let mut experiments = Vec::new();
        let mut frontier: VecDeque<Dependency> = self.dependencies().into();

        while let Some(dependency) = frontier.pop_front() {
            match dependency {
                Dependency::Experiment(experiment) => {
                    if seen_ids.insert(experiment.id()) {
                        experiments.push(experiment);
                    }
                }
                Dependency::Dependent(dependent) => {
                    if visited.insert(Arc::as_ptr(&dependent) as *const ()) {
                        frontier.extend(dependent.dependencies());
                    }
                }
            }
        }

        experiments.sort_by_key(|experiment| experiment.id());
        experiments
    }
}

/// 持有固定依赖列表的依赖对象
pub struct DependencyGroup {
    name: String,
    dependencies: Vec<Dependency>,
}

impl DependencyGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_experiments<I>(mut self, experiments: I) -> Self
    where
        I: IntoIterator<Item = ExperimentRef>,
    {
        self.dependencies
            .extend(experiments.into_iter().map(Dependency::Experiment));
        self
    }

    pub fn with_dependent(mut self, dependent: Arc<dyn Dependent>) -> Self {
        self.dependencies.push(Dependency::Dependent(dependent));
        self
    }
}

impl Dependent for DependencyGroup {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn dependencies(&self) -> Vec<Dependency> {
        self.dependencies.clone()
    }
}
