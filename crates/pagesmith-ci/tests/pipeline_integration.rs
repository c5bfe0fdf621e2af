//! Integration tests for the run pipeline against a local git origin and
//! in-memory / filesystem hosting targets.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pagesmith_ci::{Builder, DeploymentSlot, Dispatcher, GateDecision, Pipeline, TriggerGate};
use pagesmith_core::{BuildConfig, RunStatus, TriggerConfig, TriggerEvent};
use pagesmith_state::fakes::{MemoryHostingTarget, MemoryRunLog};
use pagesmith_state::{
    FsHostingTarget, HostingTarget, RunLog, RunOutcome, RunRecord, StateResult,
};
use tempfile::TempDir;

/// A git repository acting as the build source.
struct Origin {
    dir: TempDir,
}

impl Origin {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let origin = Self { dir };
        origin.git(&["init", "--quiet"]);
        origin.git(&["checkout", "--quiet", "-b", "main"]);
        origin
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn git(&self, args: &[&str]) -> String {
        let output = Command::new("git")
            .args([
                "-c",
                "user.name=pagesmith",
                "-c",
                "user.email=pagesmith@example.test",
                "-c",
                "commit.gpgsign=false",
            ])
            .args(args)
            .current_dir(self.path())
            .output()
            .expect("run git");
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    /// Commit `index.html` with `content` and return the new SHA.
    fn commit_page(&self, content: &str) -> String {
        std::fs::write(self.path().join("index.html"), content).expect("write page");
        self.git(&["add", "index.html"]);
        self.git(&["commit", "--quiet", "-m", content]);
        self.git(&["rev-parse", "HEAD"])
    }
}

fn build_config(script: &str) -> BuildConfig {
    BuildConfig {
        toolchain: None,
        target: None,
        tools: vec![],
        working_dir: PathBuf::from("."),
        output_dir: PathBuf::from("dist"),
        command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
        env: BTreeMap::new(),
        timeout_secs: 0,
    }
}

const COPY_PAGE: &str = "mkdir -p dist && cp index.html dist/index.html";

fn pipeline(
    origin: &Origin,
    script: &str,
    target: Arc<dyn HostingTarget>,
    run_log: Arc<dyn RunLog>,
) -> Pipeline {
    let builder = Builder::new(origin.path().to_string_lossy().into_owned(), build_config(script));
    Pipeline::new(builder, DeploymentSlot::new(target), run_log)
}

fn live_page(target: &MemoryHostingTarget) -> Option<String> {
    target
        .live_content()
        .and_then(|files| files.get("index.html").cloned())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

/// Test: a push builds the commit and the slot serves exactly its output
#[tokio::test]
async fn test_push_publishes_built_content() {
    let origin = Origin::new();
    let sha = origin.commit_page("<h1>v1</h1>");
    let target = Arc::new(MemoryHostingTarget::new());
    let run_log = Arc::new(MemoryRunLog::new());
    let pipeline = pipeline(&origin, COPY_PAGE, target.clone(), run_log.clone());

    let run = pipeline.execute(&TriggerEvent::push("main", sha.as_str())).await;

    assert_eq!(run.status(), RunStatus::Succeeded, "failure: {:?}", run.failure());
    assert_eq!(run.url(), Some("memory://live/"));
    assert_eq!(run.resolved_sha(), Some(sha.as_str()));
    assert!(run.bundle_id().is_some());
    assert_eq!(live_page(&target).as_deref(), Some("<h1>v1</h1>"));

    let records = run_log.list().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, RunOutcome::Succeeded);
    assert_eq!(records[0].run_id, run.run_id().to_string());
}

/// Test: an empty ref builds the branch tip
#[tokio::test]
async fn test_branch_tip_when_ref_is_empty() {
    let origin = Origin::new();
    origin.commit_page("old");
    let tip = origin.commit_page("tip");
    let target = Arc::new(MemoryHostingTarget::new());
    let pipeline = pipeline(&origin, COPY_PAGE, target.clone(), Arc::new(MemoryRunLog::new()));

    let run = pipeline.execute(&TriggerEvent::manual("main", "")).await;
    assert_eq!(run.status(), RunStatus::Succeeded, "failure: {:?}", run.failure());
    assert_eq!(run.resolved_sha(), Some(tip.as_str()));
    assert_eq!(live_page(&target).as_deref(), Some("tip"));
}

/// Test: non-zero build exit fails the run and never reaches the publisher
#[tokio::test]
async fn test_build_failure_never_publishes() {
    let origin = Origin::new();
    let sha = origin.commit_page("v1");
    let target = Arc::new(MemoryHostingTarget::new());
    let run_log = Arc::new(MemoryRunLog::new());

    let good = pipeline(&origin, COPY_PAGE, target.clone(), run_log.clone());
    assert_eq!(
        good.execute(&TriggerEvent::push("main", sha.as_str())).await.status(),
        RunStatus::Succeeded
    );
    let live_before = target.live().await.unwrap();
    let uploads_before = target.upload_count();

    let broken = pipeline(&origin, "echo 'compile error' >&2; exit 7", target.clone(), run_log.clone());
    let run = broken.execute(&TriggerEvent::push("main", sha.as_str())).await;

    assert_eq!(run.status(), RunStatus::Failed);
    let failure = run.failure().expect("failure recorded");
    assert_eq!(failure.stage, "build");
    assert!(failure.message.contains("compile error"));
    assert!(run.url().is_none());
    assert_eq!(target.upload_count(), uploads_before);
    assert_eq!(target.live().await.unwrap(), live_before);

    let records = run_log.list().await.unwrap();
    assert_eq!(records[0].outcome, RunOutcome::Failed);
    assert_eq!(records[0].failed_stage.as_deref(), Some("build"));
}

/// Test: a ref that does not exist fails at checkout
#[tokio::test]
async fn test_unknown_ref_fails_checkout() {
    let origin = Origin::new();
    origin.commit_page("v1");
    let target = Arc::new(MemoryHostingTarget::new());
    let pipeline = pipeline(&origin, COPY_PAGE, target.clone(), Arc::new(MemoryRunLog::new()));

    let run = pipeline.execute(&TriggerEvent::push("main", "no-such-ref")).await;
    assert_eq!(run.status(), RunStatus::Failed);
    assert_eq!(run.failure().map(|f| f.stage.as_str()), Some("checkout"));
    assert_eq!(target.upload_count(), 0);
}

/// Test: a build that produces no output fails at collect
#[tokio::test]
async fn test_missing_output_fails_collect() {
    let origin = Origin::new();
    let sha = origin.commit_page("v1");
    let target = Arc::new(MemoryHostingTarget::new());
    let pipeline = pipeline(&origin, "mkdir -p dist", target.clone(), Arc::new(MemoryRunLog::new()));

    let run = pipeline.execute(&TriggerEvent::push("main", sha.as_str())).await;
    assert_eq!(run.status(), RunStatus::Failed);
    assert_eq!(run.failure().map(|f| f.stage.as_str()), Some("collect"));
    assert!(target.live().await.unwrap().is_none());
}

/// Test: upload succeeds, repoint fails, previous bundle stays live
#[tokio::test]
async fn test_set_live_failure_keeps_previous_bundle() {
    let origin = Origin::new();
    let v1 = origin.commit_page("v1");
    let v2 = origin.commit_page("v2");
    let target = Arc::new(MemoryHostingTarget::new());
    let pipeline = pipeline(&origin, COPY_PAGE, target.clone(), Arc::new(MemoryRunLog::new()));

    let first = pipeline.execute(&TriggerEvent::push("main", v1.as_str())).await;
    assert_eq!(first.status(), RunStatus::Succeeded);

    target.set_fail_set_live(true);
    let second = pipeline.execute(&TriggerEvent::push("main", v2.as_str())).await;

    assert_eq!(second.status(), RunStatus::Failed);
    assert_eq!(second.failure().map(|f| f.stage.as_str()), Some("set_live"));
    assert_eq!(target.bundle_count(), 2, "v2 was uploaded");
    assert_eq!(live_page(&target).as_deref(), Some("v1"));
    assert_eq!(
        target.live().await.unwrap().map(|r| r.bundle_id.to_string()).as_deref(),
        first.bundle_id()
    );
}

/// Test: pushes arriving during a build queue and run in order, one at a time
#[tokio::test]
async fn test_queued_pushes_run_in_order_without_overlap() {
    let origin = Origin::new();
    let shas = vec![
        origin.commit_page("v1"),
        origin.commit_page("v2"),
        origin.commit_page("v3"),
    ];
    let target = Arc::new(MemoryHostingTarget::new().with_upload_delay(Duration::from_millis(50)));
    let run_log = Arc::new(MemoryRunLog::new());
    let pipeline = Arc::new(pipeline(
        &origin,
        "sleep 0.2 && mkdir -p dist && cp index.html dist/index.html",
        target.clone(),
        run_log.clone(),
    ));
    let gate = Arc::new(TriggerGate::new(&TriggerConfig::default()));
    let (dispatcher, mut finished) = Dispatcher::spawn(gate.clone(), pipeline);

    assert!(matches!(
        dispatcher.submit(TriggerEvent::push("main", shas[0].as_str())),
        GateDecision::Admit(_)
    ));
    assert!(matches!(
        dispatcher.submit(TriggerEvent::push("main", shas[1].as_str())),
        GateDecision::Queued { position: 1 }
    ));
    assert!(matches!(
        dispatcher.submit(TriggerEvent::push("main", shas[2].as_str())),
        GateDecision::Queued { position: 2 }
    ));
    assert!(matches!(
        dispatcher.submit(TriggerEvent::push("feature", shas[2].as_str())),
        GateDecision::Reject(_)
    ));

    dispatcher.drain().await.expect("drain");

    let mut runs = Vec::new();
    while let Ok(run) = finished.try_recv() {
        runs.push(run);
    }
    assert_eq!(runs.len(), 3);
    for (run, sha) in runs.iter().zip(&shas) {
        assert_eq!(run.status(), RunStatus::Succeeded, "failure: {:?}", run.failure());
        assert_eq!(run.resolved_sha(), Some(sha.as_str()));
    }
    for pair in runs.windows(2) {
        let previous_end = pair[0].finished_at().expect("terminal");
        assert!(pair[1].started_at() >= previous_end, "runs overlapped");
    }

    assert_eq!(target.max_concurrent_writers(), 1);
    assert_eq!(live_page(&target).as_deref(), Some("v3"));
    assert!(!gate.is_active());
    assert_eq!(run_log.list().await.unwrap().len(), 3);
}

/// Run log whose first append panics, then behaves.
#[derive(Default)]
struct PanicOnceRunLog {
    tripped: AtomicBool,
    inner: MemoryRunLog,
}

#[async_trait]
impl RunLog for PanicOnceRunLog {
    async fn append(&self, record: &RunRecord) -> StateResult<()> {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            panic!("run log exploded");
        }
        self.inner.append(record).await
    }

    async fn list(&self) -> StateResult<Vec<RunRecord>> {
        self.inner.list().await
    }
}

/// Test: a run that panics is reported failed and the queue keeps draining
#[tokio::test]
async fn test_panicking_run_does_not_strand_queue() {
    let origin = Origin::new();
    let first = origin.commit_page("v1");
    let second = origin.commit_page("v2");
    let target = Arc::new(MemoryHostingTarget::new());
    let run_log = Arc::new(PanicOnceRunLog::default());
    let pipeline = Arc::new(pipeline(&origin, COPY_PAGE, target.clone(), run_log.clone()));
    let gate = Arc::new(TriggerGate::new(&TriggerConfig::default()));
    let (dispatcher, mut finished) = Dispatcher::spawn(gate.clone(), pipeline);

    assert!(matches!(
        dispatcher.submit(TriggerEvent::push("main", first.as_str())),
        GateDecision::Admit(_)
    ));
    assert!(matches!(
        dispatcher.submit(TriggerEvent::push("main", second.as_str())),
        GateDecision::Queued { position: 1 }
    ));

    dispatcher.drain().await.expect("drain");

    let mut runs = Vec::new();
    while let Ok(run) = finished.try_recv() {
        runs.push(run);
    }
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].status(), RunStatus::Failed);
    assert_eq!(runs[0].failure().map(|f| f.stage.as_str()), Some("pipeline"));
    assert_eq!(runs[1].status(), RunStatus::Succeeded, "failure: {:?}", runs[1].failure());
    assert_eq!(runs[1].resolved_sha(), Some(second.as_str()));

    assert_eq!(live_page(&target).as_deref(), Some("v2"));
    assert!(!gate.is_active());
    assert_eq!(run_log.list().await.unwrap().len(), 1);
}

/// Test: the filesystem target serves the built tree through its live pointer
#[tokio::test]
async fn test_fs_target_serves_published_tree() {
    let origin = Origin::new();
    let sha = origin.commit_page("<p>from disk</p>");
    let site = tempfile::tempdir().unwrap();
    let target = Arc::new(FsHostingTarget::new(site.path(), None).unwrap());
    let pipeline = pipeline(&origin, COPY_PAGE, target.clone(), Arc::new(MemoryRunLog::new()));

    let run = pipeline.execute(&TriggerEvent::push("main", sha.as_str())).await;
    assert_eq!(run.status(), RunStatus::Succeeded, "failure: {:?}", run.failure());
    assert!(run.url().unwrap().starts_with("file://"));

    let live_dir = target.live_dir().unwrap().expect("live bundle");
    let served = std::fs::read_to_string(live_dir.join("index.html")).unwrap();
    assert_eq!(served, "<p>from disk</p>");
}
