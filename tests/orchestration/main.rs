use std::{
    cell::{Cell, RefCell},
    num::NonZeroUsize,
    rc::Rc,
    time::Duration,
};

use nestrun::{
    CaseApi, CaseFailure, CaseOptions, Config, Group, Orchestrator, Parallel, SnapshotStore,
    UsageError, formatter::pretty::PrettyFormatter,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::time::sleep;

mod lib;

async fn unreachable_body(_: CaseApi) {
    panic!("this body must not run")
}

#[tokio::test(start_paused = true)]
async fn renders_a_sequential_run() {
    let dir = tempfile::tempdir().unwrap();
    let (report, output) = lib::run_in(dir.path(), async |root: Group| {
        root.describe_with("math", Parallel::Sequential, async |group: Group| {
            group.test("adds", async |_| assert_eq!(1 + 1, 2));
            group.test("divides", async |_| -> anyhow::Result<()> {
                anyhow::bail!("division by zero")
            });
            group.test("slow", async |_| sleep(Duration::from_millis(120)).await);
            group.test("later", async |api: CaseApi| api.skip("not today"));
        });
    })
    .await;

    assert_eq!(
        lib::sanitize_durations(&output),
        "✔ math › adds\n\
         ✖ math › divides\n    Error: division by zero\n\
         ✔ math › slow (<duration>)\n\
         ○ math › later: not today\n\
         \n\
         Completed in <duration>\n\
         2 passed\n\
         1 failed\n\
         1 skipped\n\
         \n"
    );
    assert!(report.failed);
}

#[tokio::test(start_paused = true)]
async fn titles_are_chained_through_groups() {
    let dir = tempfile::tempdir().unwrap();
    let (report, _) = lib::run_in(dir.path(), async |root: Group| {
        root.test("top", async |_| {});
        root.describe("a", async |a: Group| {
            a.describe("b", async |b: Group| {
                b.test("c", async |api: CaseApi| assert_eq!(api.title(), "a › b › c"));
            });
        });
    })
    .await;

    let titles: Vec<_> = report.records.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(titles, vec!["top", "a › b › c"]);
    assert!(!report.failed);
}

#[tokio::test(start_paused = true)]
async fn sequential_groups_run_one_child_at_a_time() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let dir = tempfile::tempdir().unwrap();

    let (report, _) = lib::run_in(dir.path(), {
        let log = Rc::clone(&log);
        move |root: Group| async move {
            root.describe_with("outer", Parallel::Sequential, move |outer: Group| async move {
                for name in ["first", "second"] {
                    let log = Rc::clone(&log);
                    outer.describe(name, move |group: Group| async move {
                        for case in ["x", "y"] {
                            let log = Rc::clone(&log);
                            group.test(case, move |api: CaseApi| {
                                let log = Rc::clone(&log);
                                async move {
                                    log.borrow_mut().push(format!("start {}", api.title()));
                                    sleep(Duration::from_millis(10)).await;
                                    log.borrow_mut().push(format!("end {}", api.title()));
                                }
                            });
                        }
                    });
                }
            });
        }
    })
    .await;

    assert_eq!(report.summary.passed, 4);
    let log = log.borrow();
    let first_done = log
        .iter()
        .rposition(|line| line.starts_with("end outer › first"))
        .unwrap();
    let second_start = log
        .iter()
        .position(|line| line.starts_with("start outer › second"))
        .unwrap();
    assert!(first_done < second_start, "{log:#?}");
}

async fn peak_concurrency(parallel: Parallel, cases: usize) -> usize {
    let running = Rc::new(Cell::new(0usize));
    let peak = Rc::new(Cell::new(0usize));
    let dir = tempfile::tempdir().unwrap();

    let (report, _) = lib::run_in(dir.path(), {
        let peak = Rc::clone(&peak);
        move |root: Group| async move {
            root.describe_with("bounded", parallel, move |group: Group| async move {
                for i in 0..cases {
                    let running = Rc::clone(&running);
                    let peak = Rc::clone(&peak);
                    group.test(&format!("case {i}"), move |_| {
                        let running = Rc::clone(&running);
                        let peak = Rc::clone(&peak);
                        async move {
                            running.set(running.get() + 1);
                            peak.set(peak.get().max(running.get()));
                            sleep(Duration::from_millis(10)).await;
                            running.set(running.get() - 1);
                        }
                    });
                }
            });
        }
    })
    .await;

    assert_eq!(report.summary.passed, cases);
    peak.get()
}

#[tokio::test(start_paused = true)]
async fn fixed_parallelism_bounds_running_cases() {
    let two = NonZeroUsize::new(2).unwrap();
    assert_eq!(peak_concurrency(Parallel::Fixed(two), 6).await, 2);
    assert_eq!(peak_concurrency(Parallel::Sequential, 4).await, 1);
    assert_eq!(peak_concurrency(Parallel::Unbounded, 5).await, 5);
}

#[tokio::test(start_paused = true)]
async fn auto_parallelism_stays_within_the_machine() {
    let cpus = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
    let peak = peak_concurrency(Parallel::Auto, 2 * cpus).await;
    assert!((1..=cpus).contains(&peak), "peak {peak} with {cpus} cpus");
}

#[tokio::test(start_paused = true)]
async fn retries_until_success_or_exhaustion() {
    let dir = tempfile::tempdir().unwrap();
    let (report, output) = lib::run_in(dir.path(), async |root: Group| {
        root.test_with(
            "flaky",
            CaseOptions::default().with_retry(3),
            async |api: CaseApi| -> anyhow::Result<()> {
                if api.attempt() < 2 {
                    anyhow::bail!("not yet");
                }
                Ok(())
            },
        );
        root.test_with(
            "broken",
            CaseOptions::default().with_retry(3),
            async |_| -> anyhow::Result<()> { anyhow::bail!("never") },
        );
    })
    .await;

    let flaky = report.record("flaky").unwrap();
    assert!(flaky.outcome.passed());
    assert_eq!(flaky.attempts.len(), 2);

    let broken = report.record("broken").unwrap();
    assert_eq!(broken.attempts.len(), 3);
    assert_eq!(
        broken.outcome.failure(),
        Some(&CaseFailure::Error("never".to_string()))
    );

    assert!(output.contains("✖ flaky (1/3)\n    Error: not yet\n"));
    assert!(output.contains("✔ flaky (2/3)\n"));
    assert!(output.contains("✖ broken (3/3)\n    Error: never\n"));
    assert!(report.failed);
}

#[tokio::test(start_paused = true)]
async fn group_timeout_wins_over_case_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let (report, output) = lib::run_in(dir.path(), async |root: Group| {
        root.describe_with("slow", Duration::from_millis(50), async |group: Group| {
            group.test_with("waits", Duration::from_secs(1), async |_| {
                sleep(Duration::from_secs(10)).await
            });
        });
    })
    .await;

    let waits = report.record("slow › waits").unwrap();
    assert_eq!(
        waits.outcome.failure(),
        Some(&CaseFailure::TimedOut(Duration::from_millis(50)))
    );
    assert!(report.summary.elapsed < Duration::from_secs(1));
    assert!(output.contains("✖ slow\n    Timeout: 50ms\n"));
    assert!(report.failed);
}

#[tokio::test(start_paused = true)]
async fn skipped_groups_skip_their_cases() {
    let dir = tempfile::tempdir().unwrap();
    let (report, output) = lib::run_in(dir.path(), async |root: Group| {
        root.describe("off", async |group: Group| -> Result<(), UsageError> {
            group.skip("not on CI")?;
            group.test("a", unreachable_body);
            group.describe("inner", async |inner: Group| {
                assert!(inner.is_skipped());
                inner.test("b", unreachable_body);
            });
            Ok(())
        });
    })
    .await;

    assert!(!report.failed);
    assert_eq!(report.summary.skipped, 2);
    assert!(output.contains("○ off › a: not on CI\n"));
    assert!(output.contains("○ off › inner › b: not on CI\n"));
}

#[tokio::test(start_paused = true)]
async fn skipping_after_registration_fails_the_group() {
    let dir = tempfile::tempdir().unwrap();
    let (report, output) = lib::run_in(dir.path(), async |root: Group| {
        root.describe("late", async |group: Group| {
            group.test("a", async |_| {});
            group.skip("too late")
        });
    })
    .await;

    assert!(report.failed);
    assert!(report.record("late › a").unwrap().outcome.passed());
    assert!(output.contains("✖ late\n    Error: skip() must be called before any tests\n"));
}

async fn shape(root: Group) {
    root.test("shape", async |api: CaseApi| {
        api.expect_snapshot(&json!({ "name": "disk", "sizes": [1, 2] }))
    });
}

async fn changed_shape(root: Group) {
    root.test("shape", async |api: CaseApi| {
        api.expect_snapshot(&json!({ "name": "disk", "sizes": [1, 2, 3] }))
    });
}

#[tokio::test(start_paused = true)]
async fn snapshots_survive_between_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("values.snap");
    let store = || SnapshotStore::new(&path);

    let (first, output) = lib::run_at(store(), shape).await;
    assert!(!first.failed);
    assert_eq!(first.snapshots.new, 1);
    assert!(output.contains("Snapshots: 📸 1 new\n"));

    let (second, _) = lib::run_at(store(), shape).await;
    assert!(!second.failed);
    assert!(second.snapshots.is_empty());

    let (third, output) = lib::run_at(store(), changed_shape).await;
    assert!(third.failed);
    assert!(matches!(
        third.record("shape").unwrap().outcome.failure(),
        Some(CaseFailure::Usage(UsageError::SnapshotMismatch { .. }))
    ));
    assert!(output.contains("Snapshot mismatch for \"shape 1\""));

    let (fourth, _) = lib::run_at(store().with_update(true), changed_shape).await;
    assert!(!fourth.failed);
    assert_eq!(fourth.snapshots.updated, 1);
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "{\n  \"shape 1\": \"{ name: 'disk', sizes: [ 1, 2, 3 ] }\"\n}\n"
    );
}

#[tokio::test(start_paused = true)]
async fn duplicate_titles_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (report, _) = lib::run_in(dir.path(), async |root: Group| {
        root.test("same", async |_| {});
        root.test("same", async |_| {});
    })
    .await;

    assert!(report.records[0].outcome.passed());
    assert_eq!(
        report.records[1].outcome.failure(),
        Some(&CaseFailure::Usage(UsageError::DuplicateTitle(
            "same".to_string()
        )))
    );
}

#[tokio::test(start_paused = true)]
async fn summary_counts_add_up() {
    let dir = tempfile::tempdir().unwrap();
    let (report, _) = lib::run_in(dir.path(), async |root: Group| {
        for i in 0..9 {
            root.test(&format!("case {i}"), move |api: CaseApi| async move {
                match i % 3 {
                    0 => Ok(()),
                    1 => api.skip("every third").map_err(anyhow::Error::from),
                    _ => Err(anyhow::anyhow!("every other third")),
                }
            });
        }
    })
    .await;

    let summary = &report.summary;
    assert_eq!(summary.total, 9);
    assert_eq!(summary.total, report.records.len());
    assert_eq!(
        summary.passed + summary.failed + summary.skipped + summary.pending,
        summary.total
    );
    assert_eq!((summary.passed, summary.failed, summary.skipped), (3, 3, 3));
}

#[tokio::test(start_paused = true)]
async fn filter_only_runs_matching_cases() {
    lib::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let output = lib::Buffer::default();

    let report = Orchestrator::new()
        .with_config(Config::default().with_filter("keep"))
        .with_formatter(
            PrettyFormatter::default()
                .with_target(output.clone())
                .with_color_setting(false),
        )
        .with_snapshot_store(SnapshotStore::new(dir.path().join("snap")))
        .run(async |root: Group| {
            root.describe("keep", async |group: Group| {
                group.test("this", async |_| {});
            });
            root.test("drop this", unreachable_body);
        })
        .await;

    let output = output.try_to_string().unwrap();
    assert!(output.starts_with("Only running tests that match: \"keep\"\n\n✔ keep › this\n"));
    assert_eq!(report.records.len(), 1);
    assert!(!report.failed);
}
