use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::debug;

use lab_core::{ExperimentRef, LabError, LabResult, SchedulerConfig};

/// 调度策略：在派发前对一批实验重新排序或筛选
///
/// 实现不得修改输入，输出必须是输入子集的一个排列。
pub trait SchedulingStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn schedule(&self, experiments: &[ExperimentRef]) -> Vec<ExperimentRef>;

    /// 重置内部随机源或状态，以便在下一批次复用
    fn restart(&self) {}
}

/// 带可选固定种子的随机源
pub(crate) struct RandomSource {
    seed: Option<u64>,
    rng: Mutex<StdRng>,
}

impl RandomSource {
    pub(crate) fn new(seed: Option<u64>) -> Self {
        Self {
            seed,
            rng: Mutex::new(Self::fresh(seed)),
        }
    }

    fn fresh(seed: Option<u64>) -> StdRng {
        match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }

    pub(crate) fn reseed(&self) {
        *self.rng.lock().unwrap_or_else(PoisonError::into_inner) = Self::fresh(self.seed);
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut StdRng) -> R) -> R {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut rng)
    }
}

/// 未配置策略时使用：保持输入顺序的副本
#[derive(Debug, Default)]
pub struct IdentityStrategy;

impl SchedulingStrategy for IdentityStrategy {
    fn name(&self) -> &str {
        "Identity"
    }

    fn schedule(&self, experiments: &[ExperimentRef]) -> Vec<ExperimentRef> {
        experiments.to_vec()
    }
}

/// 固定步长子采样：保留位置 0, k, 2k, ... 上的实验
#[derive(Debug)]
pub struct SubsampleStrategy {
    stride: usize,
}

impl SubsampleStrategy {
    pub fn new() -> Self {
        Self { stride: 2 }
    }

    pub fn with_stride(stride: usize) -> LabResult<Self> {
        if stride == 0 {
            return Err(LabError::InvalidConfiguration(
                "子采样步长必须大于0".to_string(),
            ));
        }
        Ok(Self { stride })
    }

    pub fn stride(&self) -> usize {
        self.stride
    }
}

impl Default for SubsampleStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulingStrategy for SubsampleStrategy {
    fn name(&self) -> &str {
        "Subsample"
    }

    fn schedule(&self, experiments: &[ExperimentRef]) -> Vec<ExperimentRef> {
        let selected: Vec<ExperimentRef> = experiments
            .iter()
            .step_by(self.stride)
            .cloned()
            .collect();
        debug!(
            "子采样策略从 {} 个实验中保留 {} 个 (步长: {})",
            experiments.len(),
            selected.len(),
            self.stride
        );
        selected
    }
}

/// 随机打乱全部实验的顺序
pub struct ShuffleStrategy {
    random: RandomSource,
}

impl ShuffleStrategy {
    pub fn new() -> Self {
        Self {
            random: RandomSource::new(None),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            random: RandomSource::new(Some(seed)),
        }
    }
}

impl Default for ShuffleStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulingStrategy for ShuffleStrategy {
    fn name(&self) -> &str {
        "Shuffle"
    }

    fn schedule(&self, experiments: &[ExperimentRef]) -> Vec<ExperimentRef> {
        let mut shuffled = experiments.to_vec();
        self.random.with(|rng| shuffled.shuffle(rng));
        shuffled
    }

    fn restart(&self) {
        self.random.reseed();
    }
}

/// 随机抽取：对每个实验独立地以固定概率决定保留或丢弃
pub struct RandomDecimateStrategy {
    probability: f64,
    random: RandomSource,
}

impl RandomDecimateStrategy {
    pub fn new() -> Self {
        Self {
            probability: 0.5,
            random: RandomSource::new(None),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            probability: 0.5,
            random: RandomSource::new(Some(seed)),
        }
    }

    /// 设置保留概率，必须位于 [0, 1]
    pub fn with_probability(mut self, probability: f64) -> LabResult<Self> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(LabError::InvalidConfiguration(format!(
                "保留概率必须在0到1之间: {probability}"
            )));
        }
        self.probability = probability;
        Ok(self)
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }
}

impl Default for RandomDecimateStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulingStrategy for RandomDecimateStrategy {
    fn name(&self) -> &str {
        "RandomDecimate"
    }

    fn schedule(&self, experiments: &[ExperimentRef]) -> Vec<ExperimentRef> {
        self.random.with(|rng| {
            experiments
                .iter()
                .filter(|_| rng.random_bool(self.probability))
                .cloned()
                .collect()
        })
    }

    fn restart(&self) {
        self.random.reseed();
    }
}

/// 可由配置构造的策略类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Identity,
    Subsample,
    Shuffle,
    RandomDecimate,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Identity => "identity",
            StrategyKind::Subsample => "subsample",
            StrategyKind::Shuffle => "shuffle",
            StrategyKind::RandomDecimate => "random_decimate",
        }
    }

    /// 按调度配置构造策略实例
    pub fn build(&self, config: &SchedulerConfig) -> LabResult<Arc<dyn SchedulingStrategy>> {
        let strategy: Arc<dyn SchedulingStrategy> = match self {
            StrategyKind::Identity => Arc::new(IdentityStrategy),
            StrategyKind::Subsample => {
                Arc::new(SubsampleStrategy::with_stride(config.subsample_stride)?)
            }
            StrategyKind::Shuffle => match config.seed {
                Some(seed) => Arc::new(ShuffleStrategy::with_seed(seed)),
                None => Arc::new(ShuffleStrategy::new()),
            },
            StrategyKind::RandomDecimate => {
                let strategy = match config.seed {
                    Some(seed) => RandomDecimateStrategy::with_seed(seed),
                    None => RandomDecimateStrategy::new(),
                };
                Arc::new(strategy.with_probability(config.decimate_probability)?)
            }
        };
        Ok(strategy)
    }

    pub fn from_config(config: &SchedulerConfig) -> LabResult<Arc<dyn SchedulingStrategy>> {
        config.strategy.parse::<StrategyKind>()?.build(config)
    }
}

impl FromStr for StrategyKind {
    type Err = LabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "identity" => Ok(StrategyKind::Identity),
            "subsample" => Ok(StrategyKind::Subsample),
            "shuffle" => Ok(StrategyKind::Shuffle),
            "random_decimate" => Ok(StrategyKind::RandomDecimate),
            other => Err(LabError::InvalidConfiguration(format!(
                "不支持的调度策略: {other}"
            ))),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
