//! The stage scheduler.
//!
//! One worker task runs per stage. A worker waits for its inputs'
//! completion broadcasts, refreshes the cache decision, and only then takes
//! a worker-pool slot to drive the container through create, start (with
//! retry), and wait. Completion is broadcast as soon as the container has
//! terminated, so downstream stages never begin container creation before
//! their inputs' containers have stopped.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, mpsc, watch};
use tracing::{debug, info, warn};

use walrus_core::{ContainerRuntime, ContainerSpec, Error, Pipeline, Result, Stage};

use crate::{cache, profile};

/// Name of the per-stage log file inside the stage's output directory.
pub const LOG_FILENAME: &str = "walrus.log";

/// Tunables for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Worker-pool capacity: how many containers may execute at once.
    pub workers: usize,
    /// Container start attempts before giving up.
    pub start_retries: u32,
    /// Delay between start attempts.
    pub start_retry_delay: Duration,
    /// Deadline for collecting a stopped container's logs.
    pub log_deadline: Duration,
    /// Sample container stats into a profile file per stage.
    pub profile: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            workers: 5,
            start_retries: 10,
            start_retry_delay: Duration::from_secs(10),
            log_deadline: Duration::from_secs(5),
            profile: false,
        }
    }
}

/// Terminal state a stage broadcasts to its dependents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Succeeded,
    Failed,
}

/// What a stage worker reports back to the scheduler.
#[derive(Debug)]
pub enum StageReport {
    Completed {
        stage: String,
        runtime: Duration,
        cached: bool,
    },
    /// The stage did not execute because an input failed.
    Skipped { stage: String, failed_input: String },
}

/// Broadcasts a stage's terminal outcome exactly once. Dropping without an
/// explicit signal broadcasts `Failed` so dependents of a crashed worker
/// are never left waiting.
struct Completion {
    tx: watch::Sender<Option<StageOutcome>>,
    sent: bool,
}

impl Completion {
    fn new(tx: watch::Sender<Option<StageOutcome>>) -> Self {
        Self { tx, sent: false }
    }

    fn signal(&mut self, outcome: StageOutcome) {
        if !self.sent {
            self.sent = true;
            self.tx.send_replace(Some(outcome));
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.sent {
            self.tx.send_replace(Some(StageOutcome::Failed));
        }
    }
}

/// Everything a stage worker needs besides its own stage.
struct WorkerContext {
    runtime: Arc<dyn ContainerRuntime>,
    rootpath: PathBuf,
    opts: RunOptions,
    pool: Arc<Semaphore>,
}

/// Schedules one pipeline run. All run state (completion channels, the
/// worker-pool semaphore, the name→index map) is owned by the run, so
/// concurrent runs do not interfere.
pub struct Scheduler {
    runtime: Arc<dyn ContainerRuntime>,
    rootpath: PathBuf,
    opts: RunOptions,
}

impl Scheduler {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        rootpath: impl Into<PathBuf>,
        opts: RunOptions,
    ) -> Self {
        Self {
            runtime,
            rootpath: rootpath.into(),
            opts,
        }
    }

    /// Run every stage of the pipeline, respecting input dependencies and
    /// the worker-pool bound. Stage and pipeline runtimes are recorded on
    /// success; the first stage error becomes the run's result after all
    /// workers have reported.
    pub async fn run(&self, pipeline: &mut Pipeline) -> Result<()> {
        let started = Instant::now();
        let stages = pipeline.stages.clone();
        let count = stages.len();
        if count == 0 {
            pipeline.runtime = started.elapsed();
            return Ok(());
        }

        let index: HashMap<String, usize> = stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();

        let mut senders = Vec::with_capacity(count);
        let mut receivers = Vec::with_capacity(count);
        for _ in 0..count {
            let (tx, rx) = watch::channel(None);
            senders.push(tx);
            receivers.push(rx);
        }

        // Resolve every input to its completion channel up front; scheduling
        // must not start with an inconsistent name mapping.
        let mut input_sets = Vec::with_capacity(count);
        for stage in &stages {
            let mut inputs = Vec::with_capacity(stage.inputs.len());
            for name in &stage.inputs {
                let idx = index.get(name).ok_or_else(|| {
                    Error::Internal(format!(
                        "stage '{}' depends on unknown stage '{}'",
                        stage.name, name
                    ))
                })?;
                inputs.push((name.clone(), receivers[*idx].clone()));
            }
            input_sets.push(inputs);
        }

        let pool = Arc::new(Semaphore::new(self.opts.workers));
        let (reports_tx, mut reports_rx) = mpsc::channel(count);

        for ((stage, done_tx), inputs) in stages
            .into_iter()
            .zip(senders.into_iter())
            .zip(input_sets.into_iter())
        {
            let ctx = WorkerContext {
                runtime: self.runtime.clone(),
                rootpath: self.rootpath.clone(),
                opts: self.opts.clone(),
                pool: pool.clone(),
            };
            let reports = reports_tx.clone();

            tokio::spawn(async move {
                let mut completion = Completion::new(done_tx);
                let result = run_stage(&ctx, &stage, inputs, &mut completion).await;
                if result.is_err() {
                    completion.signal(StageOutcome::Failed);
                }
                drop(completion);
                let _ = reports.send(result).await;
            });
        }
        drop(reports_tx);

        let mut first_error: Option<Error> = None;
        let mut durations: HashMap<String, Duration> = HashMap::new();

        for _ in 0..count {
            match reports_rx.recv().await {
                Some(Ok(StageReport::Completed {
                    stage,
                    runtime,
                    cached,
                })) => {
                    info!(stage = %stage, cached, elapsed = ?runtime, "Stage completed");
                    if !cached {
                        durations.insert(stage, runtime);
                    }
                }
                Some(Ok(StageReport::Skipped {
                    stage,
                    failed_input,
                })) => {
                    warn!(stage = %stage, input = %failed_input, "Stage skipped: input failed");
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Stage failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                None => {
                    first_error.get_or_insert(Error::Internal(
                        "a stage worker exited without reporting".to_string(),
                    ));
                    break;
                }
            }
        }

        for stage in pipeline.stages.iter_mut() {
            if let Some(elapsed) = durations.get(&stage.name) {
                stage.runtime = *elapsed;
            }
        }
        pipeline.runtime = started.elapsed();

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// The per-stage worker protocol.
async fn run_stage(
    ctx: &WorkerContext,
    stage: &Stage,
    inputs: Vec<(String, watch::Receiver<Option<StageOutcome>>)>,
    completion: &mut Completion,
) -> Result<StageReport> {
    ensure_image(ctx.runtime.as_ref(), stage).await?;

    // Dependency wait. Holds no worker-pool slot.
    for (name, mut rx) in inputs {
        let outcome = *rx.wait_for(|o| o.is_some()).await.map_err(|_| {
            Error::Internal(format!(
                "input '{}' of stage '{}' went away before completing",
                name, stage.name
            ))
        })?;
        if outcome == Some(StageOutcome::Failed) {
            completion.signal(StageOutcome::Failed);
            return Ok(StageReport::Skipped {
                stage: stage.name.clone(),
                failed_input: name,
            });
        }
    }

    let hostpath = cache::host_path(&ctx.rootpath, stage);

    if cache::refresh_cache(ctx.runtime.as_ref(), stage, &hostpath).await {
        info!(stage = %stage.name, "Serving stage from cache");
        completion.signal(StageOutcome::Succeeded);
        return Ok(StageReport::Completed {
            stage: stage.name.clone(),
            runtime: Duration::ZERO,
            cached: true,
        });
    }

    // The worker-pool slot is taken only when a container will actually
    // run, and the permit guard releases it on every exit path.
    let permit = ctx
        .pool
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| Error::Internal("worker pool closed".to_string()))?;

    let started = Instant::now();

    if let Err(e) = ctx.runtime.remove_container(&stage.name).await {
        if !e.is_benign_cleanup() {
            debug!(stage = %stage.name, error = %e, "Stale container removal failed");
        }
    }

    create_output_dir(&hostpath)?;

    let spec = container_spec(stage, &hostpath);
    ctx.runtime.create_container(&spec).await?;

    start_with_retry(ctx, &stage.name).await?;

    let profiler = ctx.opts.profile.then(|| {
        profile::spawn_profiler(
            ctx.runtime.clone(),
            stage.name.clone(),
            hostpath.join(format!("profile-{}.json", stage.name)),
        )
    });

    let wait_result = ctx.runtime.wait_container(&stage.name).await;

    if let Some(handle) = profiler {
        handle.abort();
    }

    drop(permit);

    let exit_code = wait_result?;

    // Unblock descendants as soon as the container has terminated; log
    // collection below is not part of the dependency contract.
    let outcome = if exit_code == 0 {
        StageOutcome::Succeeded
    } else {
        StageOutcome::Failed
    };
    completion.signal(outcome);

    let state = ctx
        .runtime
        .inspect_container(&stage.name)
        .await
        .unwrap_or_default();

    let logs = fetch_logs(ctx, &stage.name).await?;
    write_log_file(&hostpath, &logs)?;

    if exit_code != 0 {
        return Err(Error::StageFailure {
            stage: stage.name.clone(),
            exit_code,
            detail: stage.to_string(),
            message: state.error,
            logs,
        });
    }

    Ok(StageReport::Completed {
        stage: stage.name.clone(),
        runtime: started.elapsed(),
        cached: false,
    })
}

async fn ensure_image(runtime: &dyn ContainerRuntime, stage: &Stage) -> Result<()> {
    let image = stage.image_ref();
    let present = runtime.list_images().await?.iter().any(|i| *i == image);
    if !present {
        info!(image = %image, "Pulling image");
        runtime.pull_image(&image).await?;
    }
    Ok(())
}

async fn start_with_retry(ctx: &WorkerContext, name: &str) -> Result<()> {
    let attempts = ctx.opts.start_retries.max(1);
    let mut last = String::new();

    for attempt in 1..=attempts {
        match ctx.runtime.start_container(name).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(container = %name, attempt, error = %e, "Container start failed");
                last = e.to_string();
                if attempt < attempts {
                    tokio::time::sleep(ctx.opts.start_retry_delay).await;
                }
            }
        }
    }

    Err(Error::ContainerStart {
        attempts,
        message: last,
    })
}

async fn fetch_logs(ctx: &WorkerContext, name: &str) -> Result<String> {
    tokio::time::timeout(ctx.opts.log_deadline, ctx.runtime.read_logs(name))
        .await
        .map_err(|_| Error::Log(format!("timed out reading logs for '{}'", name)))?
}

fn container_spec(stage: &Stage, hostpath: &Path) -> ContainerSpec {
    let mut bind = format!("{}:{}", hostpath.display(), cache::mountpoint(stage));
    if !stage.mount_propagation.is_empty() {
        bind.push(':');
        bind.push_str(&stage.mount_propagation);
    }

    let mut binds = vec![bind];
    binds.extend(stage.volumes.iter().cloned());

    ContainerSpec {
        name: stage.name.clone(),
        image: stage.image_ref(),
        entrypoint: stage.entrypoint.clone(),
        cmd: stage.cmd.clone(),
        env: stage.env.clone(),
        binds,
        volumes_from: stage.inputs.clone(),
        ports: Vec::new(),
    }
}

fn create_output_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o777);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

fn write_log_file(hostpath: &Path, logs: &str) -> Result<()> {
    let path = hostpath.join(LOG_FILENAME);
    std::fs::write(&path, logs)?;
    let mut perms = std::fs::metadata(&path)?.permissions();
    perms.set_mode(0o777);
    std::fs::set_permissions(&path, perms)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRuntime;
    use std::sync::atomic::Ordering;
    use walrus_core::ContainerState;

    fn stage(name: &str, inputs: &[&str]) -> Stage {
        Stage {
            name: name.to_string(),
            image: "busybox".to_string(),
            cmd: vec!["true".to_string()],
            inputs: inputs.iter().map(|i| i.to_string()).collect(),
            ..Default::default()
        }
    }

    fn pipeline(stages: Vec<Stage>) -> Pipeline {
        Pipeline {
            name: "test".to_string(),
            stages,
            ..Default::default()
        }
    }

    fn quick_options(workers: usize) -> RunOptions {
        RunOptions {
            workers,
            start_retries: 1,
            start_retry_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_linear_two_stage_runs_in_dependency_order() {
        let runtime = Arc::new(MockRuntime::new().with_delay(Duration::from_millis(20)));
        let out = tempfile::tempdir().unwrap();
        let mut p = pipeline(vec![stage("a", &[]), stage("b", &["a"])]);

        let scheduler = Scheduler::new(runtime.clone(), out.path(), quick_options(5));
        scheduler.run(&mut p).await.unwrap();

        // b's container is created only after a's has terminated.
        let a_stopped = runtime.event_index("wait", "a").unwrap();
        let b_created = runtime.event_index("create", "b").unwrap();
        assert!(a_stopped < b_created);

        assert!(out.path().join("a").join(LOG_FILENAME).is_file());
        assert!(out.path().join("b").join(LOG_FILENAME).is_file());

        for s in &p.stages {
            assert!(s.runtime > Duration::ZERO);
        }
        assert!(p.runtime > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_diamond_waits_for_both_branches() {
        let runtime = Arc::new(MockRuntime::new().with_delay(Duration::from_millis(20)));
        let out = tempfile::tempdir().unwrap();
        let mut p = pipeline(vec![
            stage("a", &[]),
            stage("b", &["a"]),
            stage("c", &["a"]),
            stage("d", &["b", "c"]),
        ]);

        let scheduler = Scheduler::new(runtime.clone(), out.path(), quick_options(5));
        scheduler.run(&mut p).await.unwrap();

        let d_created = runtime.event_index("create", "d").unwrap();
        assert!(runtime.event_index("wait", "b").unwrap() < d_created);
        assert!(runtime.event_index("wait", "c").unwrap() < d_created);
    }

    #[tokio::test]
    async fn test_worker_pool_bounds_concurrent_execution() {
        let runtime = Arc::new(MockRuntime::new().with_delay(Duration::from_millis(30)));
        let out = tempfile::tempdir().unwrap();
        let mut p = pipeline(vec![
            stage("a", &[]),
            stage("b", &[]),
            stage("c", &[]),
            stage("d", &[]),
        ]);

        let scheduler = Scheduler::new(runtime.clone(), out.path(), quick_options(2));
        scheduler.run(&mut p).await.unwrap();

        assert!(runtime.max_running.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_single_worker_serializes_execution() {
        let runtime = Arc::new(MockRuntime::new().with_delay(Duration::from_millis(10)));
        let out = tempfile::tempdir().unwrap();
        let mut p = pipeline(vec![stage("a", &[]), stage("b", &[]), stage("c", &[])]);

        let scheduler = Scheduler::new(runtime.clone(), out.path(), quick_options(1));
        scheduler.run(&mut p).await.unwrap();

        assert_eq!(runtime.max_running.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_stage_reports_exit_code_and_skips_descendants() {
        let runtime = Arc::new(
            MockRuntime::new()
                .with_exit_code("a", 7)
                .with_delay(Duration::from_millis(10)),
        );
        let out = tempfile::tempdir().unwrap();
        let mut p = pipeline(vec![stage("a", &[]), stage("b", &["a"])]);

        let scheduler = Scheduler::new(runtime.clone(), out.path(), quick_options(5));
        let err = scheduler.run(&mut p).await.unwrap_err();

        match err {
            Error::StageFailure {
                stage,
                exit_code,
                logs,
                ..
            } => {
                assert_eq!(stage, "a");
                assert_eq!(exit_code, 7);
                assert!(logs.contains("logs from a"));
            }
            other => panic!("expected stage failure, got {}", other),
        }

        // The failed stage still gets its log file; the dependent stage
        // never starts a container.
        assert!(out.path().join("a").join(LOG_FILENAME).is_file());
        assert!(!runtime.has_event("create", "b"));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_execution() {
        let runtime = Arc::new(MockRuntime::new());
        let out = tempfile::tempdir().unwrap();

        let mut cached = stage("a", &[]);
        cached.cache = true;
        let mut p = pipeline(vec![cached]);

        runtime.set_state(
            "a",
            ContainerState {
                running: false,
                exit_code: Some(0),
                error: String::new(),
            },
        );
        std::fs::create_dir_all(out.path().join("a")).unwrap();

        let scheduler = Scheduler::new(runtime.clone(), out.path(), quick_options(5));
        scheduler.run(&mut p).await.unwrap();

        assert!(!runtime.has_event("create", "a"));
        assert!(!runtime.has_event("start", "a"));
        // The cached run leaves the prior log file alone.
        assert!(!out.path().join("a").join(LOG_FILENAME).exists());
    }

    #[tokio::test]
    async fn test_second_run_with_cache_reuses_the_first() {
        let runtime = Arc::new(MockRuntime::new().with_delay(Duration::from_millis(5)));
        let out = tempfile::tempdir().unwrap();

        let mut cached = stage("a", &[]);
        cached.cache = true;
        let mut p = pipeline(vec![cached]);

        let scheduler = Scheduler::new(runtime.clone(), out.path(), quick_options(5));
        scheduler.run(&mut p).await.unwrap();
        assert!(runtime.has_event("create", "a"));

        let before = std::fs::read_to_string(out.path().join("a").join(LOG_FILENAME)).unwrap();

        let runtime2 = Arc::new(MockRuntime::new());
        runtime2.set_state(
            "a",
            ContainerState {
                running: false,
                exit_code: Some(0),
                error: String::new(),
            },
        );
        let scheduler2 = Scheduler::new(runtime2.clone(), out.path(), quick_options(5));
        let mut p2 = p.clone();
        scheduler2.run(&mut p2).await.unwrap();

        assert!(!runtime2.has_event("create", "a"));
        let after = std::fs::read_to_string(out.path().join("a").join(LOG_FILENAME)).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_missing_image_is_pulled_once_needed() {
        let runtime = Arc::new(MockRuntime::new());
        let out = tempfile::tempdir().unwrap();

        let mut s = stage("a", &[]);
        s.image = "ghcr.io/example/tool:2".to_string();
        let mut p = pipeline(vec![s]);

        let scheduler = Scheduler::new(runtime.clone(), out.path(), quick_options(5));
        scheduler.run(&mut p).await.unwrap();

        assert!(runtime.has_event("pull", "ghcr.io/example/tool:2"));
    }

    #[tokio::test]
    async fn test_variable_fan_out_pipeline_schedules_clones() {
        // End-to-end: description bytes → expansion → scheduling.
        let json = r#"{
            "Name": "regions",
            "Variables": [{"Name": "region", "Values": ["us", "eu"]}],
            "Stages": [
                {"Name": "ingest", "Image": "busybox", "Cmd": ["echo", "{{region}}"]},
                {"Name": "aggregate", "Image": "busybox", "Cmd": ["true"], "Inputs": ["ingest"]}
            ]
        }"#;
        let file = {
            use std::io::Write;
            let mut f = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
            f.write_all(json.as_bytes()).unwrap();
            f
        };
        let mut p = walrus_config::parse_config(file.path()).unwrap();

        let aggregate = p.stages.iter().find(|s| s.name == "aggregate").unwrap();
        assert_eq!(
            aggregate.inputs,
            vec!["ingest_parallel_us", "ingest_parallel_eu"]
        );

        let runtime = Arc::new(MockRuntime::new().with_delay(Duration::from_millis(10)));
        let out = tempfile::tempdir().unwrap();
        let scheduler = Scheduler::new(runtime.clone(), out.path(), quick_options(5));
        scheduler.run(&mut p).await.unwrap();

        let agg_created = runtime.event_index("create", "aggregate").unwrap();
        assert!(runtime.event_index("wait", "ingest_parallel_us").unwrap() < agg_created);
        assert!(runtime.event_index("wait", "ingest_parallel_eu").unwrap() < agg_created);

        // Each clone owns its own output slot.
        assert!(out.path().join("ingest_parallel_us").is_dir());
        assert!(out.path().join("ingest_parallel_eu").is_dir());
    }
}
