use oncpu::config::TaskConfig;
use oncpu::domain::{ConfigError, Pid, ProfilerError};
use oncpu::profiling::{LocalProcess, ProfilingTask, Runner, TargetProcess};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn config(period: &str) -> TaskConfig {
    TaskConfig { period: period.to_string(), ..TaskConfig::default() }
}

fn own_process() -> Arc<dyn TargetProcess> {
    Arc::new(LocalProcess::try_open(Pid(std::process::id())).expect("own symbols should load"))
}

#[test]
fn test_period_validation() {
    assert!(matches!(Runner::new(config("")), Err(ConfigError::EmptyPeriod)));
    assert!(matches!(Runner::new(config("abc")), Err(ConfigError::InvalidPeriod(_))));
    assert!(matches!(Runner::new(config("500us")), Err(ConfigError::PeriodTooSmall(_))));

    let runner = Runner::new(config("10ms")).expect("10ms is valid");
    assert_eq!(runner.settings().frequency_hz, 100);
    let runner = Runner::new(config("1ms")).expect("1ms is the lower bound");
    assert_eq!(runner.settings().frequency_hz, 1000);

    println!("✅ Period validation matches the documented bounds");
}

#[test]
fn test_init_rejects_process_count() {
    let mut runner = Runner::new(config("10ms")).unwrap();
    let task = ProfilingTask::new("lifecycle", vec![]);

    let err = runner.init(task.clone(), &[]).unwrap_err();
    assert!(matches!(err, ProfilerError::Config(ConfigError::ProcessCount(0))));
    assert_eq!(err.to_string(), "the processes count must be 1, current is: 0");

    let err = runner.init(task, &[own_process(), own_process()]).unwrap_err();
    assert!(matches!(err, ProfilerError::Config(ConfigError::ProcessCount(2))));
}

#[test]
fn test_flush_without_sessions_waits_for_timeout() {
    let mut runner = Runner::new(TaskConfig {
        wait_timeout: Duration::from_millis(200),
        ..config("10ms")
    })
    .unwrap();
    runner.init(ProfilingTask::new("lifecycle", vec![]), &[own_process()]).unwrap();
    runner.run_with_threads(&[], || {}).unwrap();
    assert!(runner.is_running());
    assert_eq!(runner.session_count(), 0);

    let start = Instant::now();
    let result = runner.flush_data().unwrap();
    let elapsed = start.elapsed();

    println!("Empty flush returned after {elapsed:?}");
    assert!(result.is_empty());
    assert_eq!(result.lost_total, 0);
    assert!(elapsed >= Duration::from_millis(180));
    assert!(elapsed < Duration::from_secs(5));
}

#[test]
fn test_stop_from_any_state() {
    let runner = Runner::new(config("10ms")).unwrap();
    runner.stop().unwrap();
    runner.stop().unwrap();
    assert!(!runner.is_running());

    // flushing a stopped runner does not wait
    let start = Instant::now();
    assert!(runner.flush_data().unwrap().is_empty());
    assert!(start.elapsed() < Duration::from_millis(100));
}

#[test]
fn test_run_requires_init() {
    let mut runner = Runner::new(config("10ms")).unwrap();
    let err = runner.run(|| {}).unwrap_err();
    assert_eq!(err.to_string(), "invalid runner state: run called while uninitialized");
}
