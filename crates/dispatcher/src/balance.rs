//! 基于依赖对象的调度策略
//!
//! `BalanceObjects` 交错排列实验，使每个依赖对象的实验在整个运行过程中被大致均匀地覆盖；
//! `CoverageSubsample` 只保留让每个依赖对象达到给定覆盖率所需的实验。

use std::collections::HashSet;
use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::debug;

use lab_core::{Dependent, ExperimentId, ExperimentRef, LabError, LabResult};

use crate::strategies::{RandomSource, SchedulingStrategy};

fn position_of(experiments: &[ExperimentRef], id: ExperimentId) -> Option<usize> {
    experiments.iter().position(|experiment| experiment.id() == id)
}

/// 依赖对象、其尚未放置的实验子集以及陈旧计数
struct BalanceTriplet {
    name: String,
    remaining: Vec<ExperimentRef>,
    staleness: usize,
}

impl BalanceTriplet {
    /// 若包含该实验则移除并清零计数，否则计数加一
    fn pick(&mut self, id: ExperimentId) {
        match position_of(&self.remaining, id) {
            Some(index) => {
                self.remaining.remove(index);
                self.staleness = 0;
            }
            None => self.staleness += 1,
        }
    }
}

/// 依赖均衡贪心策略
///
/// 每一步选择最久未被覆盖的依赖对象，放置其下一个实验；
/// 没有任何依赖对象引用的实验按输入顺序追加在末尾。
pub struct BalanceObjects {
    dependents: Vec<Arc<dyn Dependent>>,
}

impl BalanceObjects {
    pub fn new(dependents: Vec<Arc<dyn Dependent>>) -> Self {
        Self { dependents }
    }

    /// 追加一组依赖对象
    pub fn add_dependents<I>(&mut self, dependents: I)
    where
        I: IntoIterator<Item = Arc<dyn Dependent>>,
    {
        self.dependents.extend(dependents);
    }

    fn triplets(&self, experiments: &[ExperimentRef]) -> Vec<BalanceTriplet> {
        self.dependents
            .iter()
            .filter_map(|dependent| {
                let ids: HashSet<ExperimentId> = dependent
                    .dependency_experiments()
                    .iter()
                    .map(|experiment| experiment.id())
                    .collect();
                let mut seen = HashSet::new();
                let remaining: Vec<ExperimentRef> = experiments
                    .iter()
                    .filter(|experiment| {
                        ids.contains(&experiment.id()) && seen.insert(experiment.id())
                    })
                    .cloned()
                    .collect();
                (!remaining.is_empty()).then(|| BalanceTriplet {
                    name: dependent.name(),
                    remaining,
                    staleness: 0,
                })
            })
            .collect()
    }
}

impl SchedulingStrategy for BalanceObjects {
    fn name(&self) -> &str {
        "BalanceObjects"
    }

    fn schedule(&self, experiments: &[ExperimentRef]) -> Vec<ExperimentRef> {
        let mut triplets = self.triplets(experiments);
        let mut placed: HashSet<ExperimentId> = HashSet::new();
        let mut scheduled = Vec::with_capacity(experiments.len());

        while !triplets.is_empty() {
            triplets.sort_by(|a, b| b.staleness.cmp(&a.staleness));

            let Some(next) = triplets[0].remaining.first().cloned() else {
                debug!("依赖对象 {} 的实验已全部放置", triplets[0].name);
                triplets.remove(0);
                continue;
            };

            let id = next.id();
            for triplet in triplets.iter_mut() {
                triplet.pick(id);
            }
            placed.insert(id);
            scheduled.push(next);
        }

        for experiment in experiments {
            if placed.insert(experiment.id()) {
                scheduled.push(experiment.clone());
            }
        }

        scheduled
    }
}

/// 依赖对象、剩余实验以及已选取数量
struct CoverageTriplet {
    remaining: Vec<ExperimentRef>,
    total: usize,
    picked: usize,
}

impl CoverageTriplet {
    fn pick(&mut self, id: ExperimentId) {
        if let Some(index) = position_of(&self.remaining, id) {
            self.remaining.remove(index);
            self.picked += 1;
        }
    }

    fn coverage(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.picked as f64 / self.total as f64
    }

    /// 剩余实验全部选中时可达到的覆盖率
    fn max_coverage(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.remaining.len() as f64 / self.total as f64
    }
}

/// 覆盖率子采样
///
/// 丢弃实验，直到每个依赖对象恰好达到覆盖率阈值。
/// 输出按选取顺序排列，不被任何依赖对象引用的实验会被丢弃。
pub struct CoverageSubsample {
    dependents: Vec<Arc<dyn Dependent>>,
    threshold: f64,
    max_iterations: usize,
    shuffle_first: bool,
    random: RandomSource,
}

impl CoverageSubsample {
    pub fn new(threshold: f64, dependents: Vec<Arc<dyn Dependent>>) -> LabResult<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(LabError::InvalidConfiguration(format!(
                "覆盖率阈值必须在0到1之间: {threshold}"
            )));
        }
        Ok(Self {
            dependents,
            threshold,
            max_iterations: 3,
            shuffle_first: true,
            random: RandomSource::new(None),
        })
    }

    /// 是否先打乱每个依赖对象的实验列表
    pub fn shuffle_first(mut self, shuffle: bool) -> Self {
        self.shuffle_first = shuffle;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.random = RandomSource::new(Some(seed));
        self
    }

    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations.max(1);
        self
    }

    fn triplets(&self, working: &[ExperimentRef], first_pass: bool) -> Vec<CoverageTriplet> {
        let working_ids: HashSet<ExperimentId> =
            working.iter().map(|experiment| experiment.id()).collect();

        let mut triplets = Vec::new();
        for dependent in &self.dependents {
            let mut dependencies = dependent.dependency_experiments();
            if self.shuffle_first {
                self.random.with(|rng| dependencies.shuffle(rng));
            }
            let total = dependencies.len();
            dependencies.retain(|experiment| working_ids.contains(&experiment.id()));

            let triplet = CoverageTriplet {
                remaining: dependencies,
                total,
                picked: 0,
            };
            // 初始就无法达到阈值的对象不参与本轮选取
            if !triplet.remaining.is_empty()
                && (!first_pass || triplet.max_coverage() >= self.threshold)
            {
                triplets.push(triplet);
            }
        }
        triplets
    }

    fn sort_by_coverage(triplets: &mut [CoverageTriplet]) {
        triplets.sort_by(|a, b| a.coverage().total_cmp(&b.coverage()));
    }
}

impl SchedulingStrategy for CoverageSubsample {
    fn name(&self) -> &str {
        "CoverageSubsample"
    }

    fn schedule(&self, experiments: &[ExperimentRef]) -> Vec<ExperimentRef> {
        let mut working = experiments.to_vec();

        for iteration in 0..self.max_iterations {
            let mut triplets = self.triplets(&working, iteration == 0);
            let mut selected: Vec<ExperimentRef> = Vec::with_capacity(working.len());
            Self::sort_by_coverage(&mut triplets);

            while !triplets.is_empty() {
                let Some(next) = triplets[0].remaining.first().cloned() else {
                    triplets.remove(0);
                    continue;
                };

                let id = next.id();
                selected.push(next);
                for triplet in triplets.iter_mut() {
                    triplet.pick(id);
                }
                triplets.retain(|triplet| triplet.coverage() < self.threshold);
                Self::sort_by_coverage(&mut triplets);
            }

            debug!(
                "覆盖率子采样第 {} 轮: {} -> {} 个实验",
                iteration + 1,
                working.len(),
                selected.len()
            );

            if selected.len() == working.len() {
                break;
            }
            working = selected;
        }

        working
    }

    fn restart(&self) {
        self.random.reseed();
    }
}
