use std::{process::ExitCode, time::Duration};

use nestrun::{CaseApi, CaseFailure, CaseOptions, Group, Orchestrator};
use tokio::time::sleep;

async fn arithmetic(group: Group) {
    group.test("adds", async |_| assert_eq!(2 + 2, 4));
    group.test("multiplies", async |api: CaseApi| {
        api.expect_snapshot(&[3 * 3, 4 * 4])
    });
    group.test("divides by zero", async |api: CaseApi| {
        api.skip("integer division by zero panics")?;
        let _ = 1 / std::hint::black_box(0);
        Ok::<_, anyhow::Error>(())
    });
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let report = Orchestrator::from_env().run_blocking(async |root: Group| {
        root.describe("arithmetic", arithmetic);

        root.describe("network", async |group: Group| {
            group.on_finish(async || println!("closing connections"));

            group.test_with(
                "reconnects",
                CaseOptions::default()
                    .with_retry(3)
                    .with_timeout(Duration::from_millis(200)),
                async |api: CaseApi| -> anyhow::Result<()> {
                    api.on_test_fail(async |failure: CaseFailure| {
                        eprintln!("attempt failed: {failure}");
                    });
                    sleep(Duration::from_millis(60)).await;
                    if api.attempt() < 2 {
                        anyhow::bail!("connection reset");
                    }
                    Ok(())
                },
            );
        });
    });

    match report {
        Ok(report) => report.exit_code(),
        Err(err) => {
            eprintln!("cannot start the runtime: {err}");
            ExitCode::FAILURE
        }
    }
}
