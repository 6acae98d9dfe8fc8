use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lab_core::*;
use lab_dispatcher::*;
use lab_worker::PoolShape;

/// 记录开始顺序的模拟实验
struct RecordingExperiment {
    id: ExperimentId,
    duration: Duration,
    state: ExperimentState,
    log: Arc<Mutex<Vec<ExperimentId>>>,
}

impl RecordingExperiment {
    fn new(id: ExperimentId, duration: Duration, log: Arc<Mutex<Vec<ExperimentId>>>) -> Self {
        Self {
            id,
            duration,
            state: ExperimentState::default(),
            log,
        }
    }
}

#[async_trait]
impl Experiment for RecordingExperiment {
    fn id(&self) -> ExperimentId {
        self.id
    }

    fn status(&self) -> ExperimentStatus {
        self.state.status()
    }

    fn set_status(&self, status: ExperimentStatus) {
        self.state.set_status(status);
    }

    fn declare_timeout(&self) {
        self.state.declare_timeout();
    }

    fn has_timed_out(&self) -> bool {
        self.state.has_timed_out()
    }

    async fn execute(&self) {
        self.state
            .run(async {
                self.log.lock().unwrap().push(self.id);
                tokio::time::sleep(self.duration).await;
                Ok(())
            })
            .await;
    }
}

/// 每次执行耗时递增的模拟实验：第 n 次执行休眠 100ms * (1 + 3n)
struct StaggeredExperiment {
    id: ExperimentId,
    calls: AtomicUsize,
    state: ExperimentState,
}

#[async_trait]
impl Experiment for StaggeredExperiment {
    fn id(&self) -> ExperimentId {
        self.id
    }

    fn status(&self) -> ExperimentStatus {
        self.state.status()
    }

    fn set_status(&self, status: ExperimentStatus) {
        self.state.set_status(status);
    }

    fn declare_timeout(&self) {
        self.state.declare_timeout();
    }

    fn has_timed_out(&self) -> bool {
        self.state.has_timed_out()
    }

    async fn execute(&self) {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as u64;
        tokio::time::sleep(Duration::from_millis(100 * (1 + 3 * call))).await;
    }
}

fn sleeper(id: ExperimentId, millis: u64) -> Arc<SleepExperiment> {
    Arc::new(SleepExperiment::new(id, Duration::from_millis(millis)))
}

fn refs(experiments: &[Arc<SleepExperiment>]) -> Vec<ExperimentRef> {
    experiments
        .iter()
        .map(|e| e.clone() as ExperimentRef)
        .collect()
}

fn fixed_pool_assistant(workers: usize) -> Assistant {
    Assistant::builder()
        .pool_factory(Arc::new(PoolShape::fixed(workers).unwrap()))
        .build()
}

#[test]
fn test_enqueue_skips_duplicates() {
    let assistant = Assistant::new();
    let e1 = sleeper(1, 0);
    let e2 = sleeper(2, 0);
    let e3 = sleeper(3, 0);

    assert_eq!(assistant.enqueue(refs(&[e1.clone(), e2.clone()])), 2);
    assert_eq!(assistant.enqueue(refs(&[e2.clone(), e3.clone(), e3.clone()])), 1);
    assert_eq!(assistant.enqueue(refs(&[e1, e2, e3])), 0);

    let queued: Vec<i64> = assistant
        .queued_experiments()
        .iter()
        .map(|e| e.id())
        .collect();
    assert_eq!(queued, vec![1, 2, 3]);
}

#[test]
fn test_enqueue_selected_and_remove() {
    let assistant = Assistant::new();
    let experiments = refs(&[sleeper(1, 0), sleeper(2, 0), sleeper(3, 0)]);
    let group: Arc<dyn Dependent> =
        Arc::new(DependencyGroup::new("plot").with_experiments(experiments.clone()));
    let selector = DependencySelector::new(vec![group]);
    let explicit: Vec<ExperimentRef> = vec![experiments[0].clone()];

    let selectors: [&dyn ExperimentSelector; 2] = [&explicit, &selector];

    assert_eq!(assistant.enqueue_selected(&selectors), 3);
    assert_eq!(assistant.remove_from_queue(&[2, 9]), 1);
    assert_eq!(assistant.queue_len(), 2);
}

#[test]
fn test_apply_reorders_queue() {
    let assistant = Assistant::new();
    let experiments: Vec<ExperimentRef> = (0..6)
        .map(|id| sleeper(id, 0) as ExperimentRef)
        .collect();
    assistant.enqueue(experiments);

    let dropped = assistant.apply(&SubsampleStrategy::new());
    assert_eq!(dropped, 3);

    let queued: Vec<i64> = assistant
        .queued_experiments()
        .iter()
        .map(|e| e.id())
        .collect();
    assert_eq!(queued, vec![0, 2, 4]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_worker_queue_runs_in_order() {
    let assistant = Assistant::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let experiments: Vec<ExperimentRef> = (1..=3)
        .map(|id| {
            Arc::new(RecordingExperiment::new(id, Duration::from_millis(50), log.clone()))
                as ExperimentRef
        })
        .collect();

    assert_eq!(assistant.enqueue(experiments.clone()), 3);
    let run = assistant.dispatch().unwrap();
    assert_eq!(assistant.queue_len(), 0);

    run.join().await;

    assert!(!run.is_running());
    assert_eq!(run.state(), RunState::Terminated);
    assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);
    for experiment in &experiments {
        assert_eq!(experiment.status(), ExperimentStatus::Done);
    }
    assert!(run.elapsed() >= Duration::from_millis(150));
    assert!(run.ended_at().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_worker_queue_runs_in_parallel() {
    let assistant = fixed_pool_assistant(2);
    let experiments = [sleeper(1, 300), sleeper(2, 300), sleeper(3, 300)];

    let run = assistant.dispatch_experiments(&refs(&experiments)).unwrap();
    run.join().await;

    for experiment in &experiments {
        assert_eq!(experiment.status(), ExperimentStatus::Done);
    }
    // 两个工作者：三个实验需要两轮
    assert!(run.elapsed() >= Duration::from_millis(600));
    assert!(run.elapsed() < Duration::from_millis(900));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dispatch_explicit_experiments_leaves_queue() {
    let assistant = Assistant::new();
    let queued = sleeper(1, 0);
    let explicit = sleeper(2, 10);
    assistant.enqueue(refs(&[queued.clone()]));

    let run = assistant.dispatch_experiments(&refs(&[explicit.clone()])).unwrap();
    run.join().await;

    assert_eq!(assistant.queue_len(), 1);
    assert_eq!(explicit.status(), ExperimentStatus::Done);
    assert_eq!(queued.status(), ExperimentStatus::Ready);
}

#[tokio::test]
async fn test_empty_dispatch_terminates_immediately() {
    let assistant = Assistant::new();
    let run = assistant.dispatch().unwrap();

    tokio::time::timeout(Duration::from_secs(2), run.join())
        .await
        .unwrap();

    assert!(run.experiments().is_empty());
    assert!(!run.is_running());
    assert_eq!(run.progression(), 1.0);
    assert_eq!(run.status(), ExperimentStatus::Done);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timeouts() {
    let assistant = Assistant::new();
    let slow = Arc::new(
        SleepExperiment::new(1, Duration::from_millis(500)).with_timeout(Duration::from_millis(200)),
    );
    let quick = Arc::new(
        SleepExperiment::new(2, Duration::from_millis(50)).with_timeout(Duration::from_millis(200)),
    );

    let run = assistant
        .dispatch_experiments(&refs(&[slow.clone(), quick.clone()]))
        .unwrap();
    run.join().await;

    assert_eq!(slow.status(), ExperimentStatus::Interrupted);
    assert!(slow.has_timed_out());
    assert!(!slow.body_completed());
    assert_eq!(quick.status(), ExperimentStatus::Done);
    assert!(!quick.has_timed_out());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timeout_hook_invoked_once() {
    let assistant = Assistant::new();
    let blocking = Arc::new(
        SleepExperiment::new(1, Duration::from_secs(10)).with_timeout(Duration::from_millis(100)),
    );

    let run = assistant
        .dispatch_experiments(&refs(&[blocking.clone()]))
        .unwrap();
    tokio::time::timeout(Duration::from_secs(3), run.join())
        .await
        .unwrap();

    assert_eq!(blocking.status(), ExperimentStatus::Interrupted);
    assert_eq!(blocking.state().timeout_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_soft_stop() {
    let assistant = fixed_pool_assistant(2);
    let experiments = [sleeper(1, 400), sleeper(2, 400), sleeper(3, 400)];

    let run = assistant.dispatch_experiments(&refs(&experiments)).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    run.stop(false).await;
    run.join().await;

    assert_eq!(experiments[0].status(), ExperimentStatus::Done);
    assert_eq!(experiments[1].status(), ExperimentStatus::Done);
    assert_eq!(experiments[2].status(), ExperimentStatus::Ready);
    assert_eq!(experiments[2].executions(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hard_stop() {
    let assistant = fixed_pool_assistant(2);
    let experiments = [sleeper(1, 2000), sleeper(2, 2000), sleeper(3, 2000)];

    let run = assistant.dispatch_experiments(&refs(&experiments)).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    run.stop(true).await;
    tokio::time::timeout(Duration::from_secs(2), run.join())
        .await
        .unwrap();

    assert_eq!(experiments[0].status(), ExperimentStatus::Interrupted);
    assert_eq!(experiments[1].status(), ExperimentStatus::Interrupted);
    assert_eq!(experiments[2].status(), ExperimentStatus::Ready);
    assert!(!experiments[0].body_completed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_finish_running_only_leaves_unstarted_untouched() {
    let assistant = fixed_pool_assistant(2);
    let experiments: Vec<Arc<SleepExperiment>> = (1..=5).map(|id| sleeper(id, 300)).collect();

    let run = assistant.dispatch_experiments(&refs(&experiments)).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    run.stop(false).await;
    run.join().await;

    let started: Vec<_> = experiments.iter().filter(|e| e.executions() > 0).collect();
    assert_eq!(started.len(), 2);
    for experiment in &experiments {
        if experiment.executions() > 0 {
            assert!(experiment.status().is_finished());
        } else {
            assert_eq!(experiment.status(), ExperimentStatus::Ready);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multiple_runs_are_sequential() {
    let assistant = fixed_pool_assistant(2);
    let first = [sleeper(1, 300), sleeper(2, 300)];
    let second = [sleeper(3, 50)];

    let run_a = assistant.dispatch_experiments(&refs(&first)).unwrap();
    let run_b = assistant.dispatch_experiments(&refs(&second)).unwrap();
    assert!(run_b.id() > run_a.id());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(second[0].executions(), 0);
    assert!(run_b.started_at().is_none());

    run_b.join().await;
    assert!(!run_a.is_running());

    let a_end = run_a.ended_at().unwrap();
    let b_start = run_b.started_at().unwrap();
    assert!(b_start >= a_end);
    assert_eq!(second[0].status(), ExperimentStatus::Done);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_running_experiments_are_tracked() {
    let assistant = fixed_pool_assistant(2);
    let experiments = [sleeper(1, 300), sleeper(2, 300), sleeper(3, 300)];

    let run = assistant.dispatch_experiments(&refs(&experiments)).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut running: Vec<i64> = run.running_experiments().iter().map(|e| e.id()).collect();
    running.sort();
    assert_eq!(running, vec![1, 2]);
    assert!(run.is_queued(experiments[2].as_ref()));
    assert!(assistant.is_queued(experiments[2].as_ref()));
    assert!(!assistant.is_queued(experiments[0].as_ref()));

    run.join().await;
    assert!(run.running_experiments().is_empty());
    assert!(!assistant.is_queued(experiments[2].as_ref()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_condition_stops_remaining_experiments() {
    let experiments = [sleeper(1, 50), sleeper(2, 50), sleeper(3, 50)];
    let first = experiments[0].clone();
    let condition = move || {
        if first.status() == ExperimentStatus::Done {
            Troolean::True
        } else {
            Troolean::Inconclusive
        }
    };
    let assistant = Assistant::builder().condition(Arc::new(condition)).build();

    let run = assistant.dispatch_experiments(&refs(&experiments)).unwrap();
    run.join().await;

    assert_eq!(experiments[0].status(), ExperimentStatus::Done);
    assert_eq!(experiments[1].status(), ExperimentStatus::Ready);
    assert_eq!(experiments[2].status(), ExperimentStatus::Ready);
    assert_eq!(experiments[1].executions(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_scheduler_applied_on_dispatch() {
    let assistant = Assistant::new();
    assistant.set_scheduler(Some(Arc::new(SubsampleStrategy::new())));
    let experiments: Vec<Arc<SleepExperiment>> = (0..6).map(|id| sleeper(id, 1)).collect();
    assistant.enqueue(refs(&experiments));

    let run = assistant.dispatch().unwrap();
    let ids: Vec<i64> = run.experiments().iter().map(|e| e.id()).collect();
    assert_eq!(ids, vec![0, 2, 4]);

    run.join().await;
    assert_eq!(experiments[1].status(), ExperimentStatus::Ready);

    assistant.set_scheduler(None);
    let run = assistant.dispatch_experiments(&refs(&experiments)).unwrap();
    assert_eq!(run.experiments().len(), 6);
    run.join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_run_registry() {
    let assistant = Assistant::new();
    let run_a = assistant.dispatch_experiments(&refs(&[sleeper(1, 50)])).unwrap();
    let run_b = assistant.dispatch_experiments(&refs(&[sleeper(2, 50)])).unwrap();

    let mut snapshot = assistant.list_runs();
    assert_eq!(snapshot.len(), 2);
    snapshot.clear();
    assert_eq!(assistant.list_runs().len(), 2);

    assert_eq!(assistant.get_run(run_a.id()).unwrap().id(), run_a.id());
    assert!(assistant.get_run(99).is_none());

    run_b.join().await;
    assert!(assistant.cumulative_execution_time() >= Duration::from_millis(100));

    assistant.delete_run(run_a.id()).await.unwrap();
    assert!(assistant.get_run(run_a.id()).is_none());
    assert!(matches!(
        assistant.delete_run(run_a.id()).await,
        Err(LabError::RunNotFound { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_delete_run_interrupts() {
    let assistant = Assistant::new();
    let long = sleeper(1, 5000);

    let run = assistant.dispatch_experiments(&refs(&[long.clone()])).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assistant.delete_run(run.id()).await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), run.join())
        .await
        .unwrap();
    assert_eq!(long.status(), ExperimentStatus::Interrupted);
    assert!(assistant.list_runs().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_rejects_further_dispatch() {
    let assistant = Assistant::new();
    let long = sleeper(1, 5000);
    let run = assistant.dispatch_experiments(&refs(&[long.clone()])).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    tokio::time::timeout(Duration::from_secs(3), assistant.shutdown(true))
        .await
        .unwrap();

    assert!(!run.is_running());
    assert_eq!(long.status(), ExperimentStatus::Interrupted);
    assert!(matches!(
        assistant.dispatch(),
        Err(LabError::PoolShutdown { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_from_config() {
    let mut config = AppConfig::default();
    config.assistant.pool = "fixed".to_string();
    config.assistant.workers = 3;
    config.scheduler.strategy = "subsample".to_string();

    let assistant = Assistant::from_config(&config).unwrap();
    let experiments: Vec<Arc<SleepExperiment>> = (0..4).map(|id| sleeper(id, 1)).collect();
    let run = assistant.dispatch_experiments(&refs(&experiments)).unwrap();

    assert_eq!(run.pool_name(), "fixed-3");
    assert_eq!(run.experiments().len(), 2);
    run.join().await;

    config.assistant.workers = 0;
    assert!(Assistant::from_config(&config).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_run_summary_serializes() {
    let assistant = Assistant::new();
    let failing = Arc::new(SleepExperiment::new(1, Duration::from_millis(1)).failing("boom"));
    let fine = sleeper(2, 1);

    let run = assistant
        .dispatch_experiments(&refs(&[failing.clone(), fine.clone()]))
        .unwrap();
    run.join().await;

    let summary = run.summary();
    assert_eq!(summary.status, ExperimentStatus::Failed);
    assert_eq!(summary.state, RunState::Terminated);
    assert_eq!(summary.experiments.len(), 2);

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["state"], "TERMINATED");
    assert_eq!(json["experiments"][1]["status"], "DONE");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queued_run_is_reported_running() {
    let assistant = Assistant::new();
    let blocker = sleeper(1, 300);
    let run_a = assistant.dispatch_experiments(&refs(&[blocker])).unwrap();
    let run_b = assistant.dispatch_experiments(&refs(&[sleeper(2, 1)])).unwrap();

    // 等待序列器的批次同样视为运行中
    assert!(run_b.is_running());
    assert_eq!(run_b.state(), RunState::Created);
    assert_eq!(run_b.elapsed(), Duration::ZERO);

    let flag = Arc::new(AtomicBool::new(false));
    let observed = flag.clone();
    let run_a_clone = run_a.clone();
    let waiter = tokio::spawn(async move {
        run_a_clone.join().await;
        observed.store(true, Ordering::SeqCst);
    });

    run_b.join().await;
    waiter.await.unwrap();
    assert!(flag.load(Ordering::SeqCst));
}

#[test]
fn test_failed_dispatch_keeps_queue() {
    let assistant = Assistant::new();
    assistant.enqueue(refs(&[sleeper(1, 0), sleeper(2, 0)]));

    // 没有Tokio运行时，序列器拒绝提交
    let result = assistant.dispatch();

    assert!(matches!(result, Err(LabError::Internal(_))));
    assert_eq!(assistant.queue_len(), 2);
    let queued: Vec<i64> = assistant
        .queued_experiments()
        .iter()
        .map(|e| e.id())
        .collect();
    assert_eq!(queued, vec![1, 2]);
    assert!(assistant.list_runs().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_repeated_experiment_tracked_per_submission() {
    let assistant = fixed_pool_assistant(2);
    let experiment: ExperimentRef = Arc::new(StaggeredExperiment {
        id: 1,
        calls: AtomicUsize::new(0),
        state: ExperimentState::default(),
    });

    let run = assistant
        .dispatch_experiments(&[experiment.clone(), experiment.clone()])
        .unwrap();

    // 第一次执行 100ms 后结束，第二次执行持续 400ms
    tokio::time::sleep(Duration::from_millis(250)).await;
    let running: Vec<i64> = run.running_experiments().iter().map(|e| e.id()).collect();
    assert_eq!(running, vec![1]);

    run.join().await;
    assert!(run.running_experiments().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_delete_pending_run_removes_it_from_lane() {
    let assistant = Assistant::new();
    let blocker = sleeper(1, 5000);
    let waiting = sleeper(2, 10);

    let run_a = assistant.dispatch_experiments(&refs(&[blocker.clone()])).unwrap();
    let run_b = assistant.dispatch_experiments(&refs(&[waiting.clone()])).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(run_b.is_running());

    assistant.delete_run(run_b.id()).await.unwrap();

    assert!(!run_b.is_running());
    assert_eq!(run_b.state(), RunState::Created);
    tokio::time::timeout(Duration::from_secs(1), run_b.join())
        .await
        .unwrap();

    assistant.delete_run(run_a.id()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), run_a.join())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(run_b.state(), RunState::Created);
    assert!(run_b.started_at().is_none());
    assert_eq!(waiting.executions(), 0);
    assert_eq!(waiting.status(), ExperimentStatus::Ready);
    assert_eq!(blocker.status(), ExperimentStatus::Interrupted);
}
