use std::{
    cell::RefCell,
    future::Future,
    io,
    path::Path,
    rc::Rc,
    string::FromUtf8Error,
    sync::Once,
};

use nestrun::{
    BodyResult, Group, Orchestrator, RunReport, SnapshotStore,
    formatter::{common::color::SupportsColor, pretty::PrettyFormatter},
};

mod sanitize;

pub use sanitize::*;

#[derive(Debug, Default, Clone)]
pub struct Buffer(Rc<RefCell<Vec<u8>>>);

impl io::Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SupportsColor for Buffer {
    fn supports_color(&self) -> bool {
        false
    }
}

impl Buffer {
    pub fn try_to_string(&self) -> Result<String, FromUtf8Error> {
        String::from_utf8(self.0.borrow().to_vec())
    }
}

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

/// Run `body` with captured output and the snapshot file at `snapshots`.
pub async fn run_at<F, Fut, R>(snapshots: SnapshotStore, body: F) -> (RunReport, String)
where
    F: FnOnce(Group) -> Fut + 'static,
    Fut: Future<Output = R> + 'static,
    R: Into<BodyResult>,
{
    init_tracing();
    let output = Buffer::default();
    let report = Orchestrator::new()
        .with_formatter(
            PrettyFormatter::default()
                .with_target(output.clone())
                .with_color_setting(false),
        )
        .with_snapshot_store(snapshots)
        .run(body)
        .await;

    (report, output.try_to_string().unwrap())
}

pub async fn run_in<F, Fut, R>(dir: &Path, body: F) -> (RunReport, String)
where
    F: FnOnce(Group) -> Fut + 'static,
    Fut: Future<Output = R> + 'static,
    R: Into<BodyResult>,
{
    run_at(SnapshotStore::new(dir.join(".nestrun.snap")), body).await
}
