//! Bounded concurrency, group timeouts and awaited handles.

use std::{num::NonZeroUsize, process::ExitCode, time::Duration};

use nestrun::{CaseApi, Group, GroupOptions, Orchestrator, Parallel, TestSuite};
use tokio::time::sleep;

const DOWNLOAD_SLOTS: NonZeroUsize = NonZeroUsize::new(2).unwrap();

fn download_suite() -> TestSuite<u64> {
    TestSuite::named("downloads", async |group: Group, delay_ms: u64| {
        for file in ["a.bin", "b.bin", "c.bin", "d.bin"] {
            group.test(file, move |_: CaseApi| async move {
                sleep(Duration::from_millis(delay_ms)).await
            });
        }
    })
    .with_options(Parallel::Fixed(DOWNLOAD_SLOTS))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let report = Orchestrator::from_env()
        .with_process_timeout(Duration::from_secs(30))
        .run_blocking(async |root: Group| {
            root.run_test_suite(&download_suite(), 100);

            root.describe_with(
                "machine sized",
                GroupOptions::default().with_parallel(Parallel::Auto),
                async |group: Group| {
                    for n in 0..8u64 {
                        group.test(&format!("job {n}"), move |_: CaseApi| async move {
                            sleep(Duration::from_millis(20 * n)).await
                        });
                    }
                },
            );

            root.describe_with(
                "deadline",
                Duration::from_millis(250),
                async |group: Group| {
                    // awaiting a handle does not wait for a free slot
                    let setup = group.test("setup", async |_| sleep(Duration::from_millis(50)).await);
                    setup.await;
                    group.test("too slow", async |_| sleep(Duration::from_secs(5)).await);
                },
            );
        });

    match report {
        Ok(report) => report.exit_code(),
        Err(err) => {
            eprintln!("cannot start the runtime: {err}");
            ExitCode::FAILURE
        }
    }
}
